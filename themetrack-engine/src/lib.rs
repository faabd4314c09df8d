// 错误定义
pub mod error;
// 核心数据结构：记录、条件、规则、规则集
pub mod core;
// 规则表解析
pub mod source;
// 朴素/索引匹配器
pub mod indexer;
// 三轮求值
pub mod evaluator;
// 规则执行日志
pub mod trace;
pub mod utils;

// 顶层导出常用类型
pub use core::{
    AlteredColumns, Bindings, CellPattern, CellValue, ConditionValue, FixedColumns,
    MatchCondition, Record, Replacement, Rule, RuleOrigin, RuleSet,
};
pub use error::{CoreError, CoreResult, SourceLocation};
pub use evaluator::{evaluate, BatchSummary, EvalOutcome, Evaluator, Pass};
pub use indexer::{CandidateCache, IndexedMatcher, NaiveMatcher, RuleMatch, RuleMatcher};
pub use source::{MatchColumns, RuleTableParser, MATCH_COLUMNS_COLUMN};
pub use trace::{RuleTrace, TraceEntry, TraceFilter};
