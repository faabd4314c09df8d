use std::sync::Arc;

use crate::core::{AlteredColumns, Bindings, Record, RuleSet};

/// 一次命中：规则下标 + 变量绑定
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule_index: usize,
    pub bindings: Bindings,
}

/// 规则匹配策略
/// 求值器按规则顺序推进游标，每次向匹配器要"游标之后第一条命中的规则"
pub trait RuleMatcher: Send + Sync {
    /// 每条记录、每个规则集一份的匹配缓存
    type Cache;

    fn rule_set(&self) -> &RuleSet;

    fn new_cache(&self) -> Self::Cache;

    /// 下标 ≥ from 的第一条命中规则
    fn find_next(&self, record: &Record, cache: &mut Self::Cache, from: usize) -> Option<RuleMatch>;

    /// 记录的这些列已被改写，丢弃依赖它们的缓存
    fn invalidate(&self, cache: &mut Self::Cache, altered: &AlteredColumns);
}

/// 朴素匹配：逐条规则逐个条件测试，没有缓存
#[derive(Debug, Clone)]
pub struct NaiveMatcher {
    rules: Arc<RuleSet>,
}

impl NaiveMatcher {
    pub fn new(rules: impl Into<Arc<RuleSet>>) -> Self {
        Self {
            rules: rules.into(),
        }
    }
}

impl RuleMatcher for NaiveMatcher {
    type Cache = ();

    fn rule_set(&self) -> &RuleSet {
        &self.rules
    }

    fn new_cache(&self) -> Self::Cache {}

    fn find_next(&self, record: &Record, _cache: &mut (), from: usize) -> Option<RuleMatch> {
        self.rules
            .rules()
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(rule_index, rule)| {
                rule.matches(record).map(|bindings| RuleMatch {
                    rule_index,
                    bindings,
                })
            })
    }

    fn invalidate(&self, _cache: &mut (), _altered: &AlteredColumns) {}
}
