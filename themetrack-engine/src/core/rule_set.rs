use super::rule::{Rule, RuleOrigin};

/// 有序规则集，顺序即规则表中的行序，决定重叠匹配时的先后
/// 解析后不可变，可通过 Arc 在线程间共享
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    origin: RuleOrigin,
    label: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(origin: RuleOrigin, label: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            origin,
            label: label.into(),
            rules,
        }
    }

    /// 空规则集（未配置用户规则时使用）
    pub fn empty(origin: RuleOrigin) -> Self {
        Self::new(origin, "", Vec::new())
    }

    pub fn origin(&self) -> RuleOrigin {
        self.origin
    }

    /// 来源标识（通常是文件名）
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
