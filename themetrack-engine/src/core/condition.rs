use rustc_hash::FxHashMap;

use super::pattern::CellPattern;
use super::record::Record;

/// 匹配变量绑定：变量名 → 捕获文本
pub type Bindings = FxHashMap<String, String>;

/// 单列匹配条件
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCondition {
    /// 字面量相等；列缺失视为空串
    Literal {
        row: usize,
        column: String,
        value: String,
    },
    /// 锚定正则；列缺失或为空值时不匹配
    Pattern {
        row: usize,
        column: String,
        pattern: CellPattern,
    },
}

impl MatchCondition {
    pub fn column(&self) -> &str {
        match self {
            MatchCondition::Literal { column, .. } | MatchCondition::Pattern { column, .. } => column,
        }
    }

    /// 定义该条件的规则表行号
    pub fn row(&self) -> usize {
        match self {
            MatchCondition::Literal { row, .. } | MatchCondition::Pattern { row, .. } => *row,
        }
    }

    pub fn var_names(&self) -> Vec<&str> {
        match self {
            MatchCondition::Literal { .. } => Vec::new(),
            MatchCondition::Pattern { pattern, .. } => pattern.var_names().collect(),
        }
    }

    /// 测试记录，匹配时返回本条件产生的变量绑定
    pub fn matches(&self, record: &Record) -> Option<Bindings> {
        match self {
            MatchCondition::Literal { column, value, .. } => {
                let text = record.text(column);
                (text.as_deref().unwrap_or("") == value.as_str()).then(Bindings::default)
            }
            MatchCondition::Pattern { column, pattern, .. } => {
                let text = record.text(column)?;
                pattern.captures(&text)
            }
        }
    }
}
