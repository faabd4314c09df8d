//! themetrack - 持仓/选股记录覆盖规则规范化工具

// 导出全局错误类型
pub use self::error::{ThemeTrackError, TtResult};

// 导出配置模块
pub use self::config::{
    is_system_overrides_file, MatcherStrategy, NormalizerConfig, NormalizerConfigBuilder,
    TraceSelector, DEFAULT_SYSTEM_RULES,
};

// 导出规则加载接口
pub use self::rule::{read_standardized_csv, read_standardized_csv_from_reader, standardize_cell, RuleLoader};

// 导出记录表与规范化器
pub use self::normalizer::RecordNormalizer;
pub use self::record::RecordTable;

// 规则引擎
pub use themetrack_engine;
pub use themetrack_engine::{
    BatchSummary, CellValue, Record, RuleOrigin, RuleSet, RuleTrace, TraceEntry, TraceFilter,
};

// 声明所有子模块
pub mod config;
pub mod error;
pub mod normalizer;
pub mod record;
pub mod rule;
