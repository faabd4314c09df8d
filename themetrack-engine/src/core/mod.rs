mod condition;
mod pattern;
mod record;
mod rule;
mod rule_set;

// 导出常用项
pub use condition::{Bindings, MatchCondition};
pub use pattern::{
    expand_multi_value, substitute_vars, CellPattern, ConditionValue, PatternError,
    MULTI_VALUE_PREFIX, REGEX_VALUE_PREFIX,
};
pub(crate) use pattern::PatternCache;
pub use record::{CellValue, Record};
pub use rule::{AlteredColumns, FixedColumns, Replacement, Rule, RuleOrigin};
pub use rule_set::RuleSet;
