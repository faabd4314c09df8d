//! 规则引擎运行配置
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use themetrack_engine::TraceFilter;

use crate::error::{ThemeTrackError, TtResult};

/// 默认系统规则文件
pub const DEFAULT_SYSTEM_RULES: &str = "data/system_overrides.csv";

static SYSTEM_OVERRIDES_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^system_overrides.*\.(?:csv|xlsx)$").unwrap());

/// 文件名是否为系统规则文件（不区分大小写）
pub fn is_system_overrides_file(file_name: &str) -> bool {
    SYSTEM_OVERRIDES_FILE.is_match(&file_name.to_lowercase())
}

/// 匹配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherStrategy {
    #[default]
    Indexed,
    Naive,
}

/// 规则日志只记录某张表的某一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSelector {
    pub table: String,
    /// 从0开始
    pub record_index: usize,
}

impl TraceSelector {
    pub fn to_filter(&self) -> TraceFilter {
        TraceFilter::new()
            .exact("table", self.table.clone())
            .exact("record_index", self.record_index.to_string())
    }
}

/// 完整运行配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub system_rules: PathBuf,
    pub user_rules: Option<PathBuf>,
    pub strategy: MatcherStrategy,
    pub trace: Option<TraceSelector>,
    /// 并行线程数；0 表示按 CPU 核数
    pub threads: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            system_rules: PathBuf::from(DEFAULT_SYSTEM_RULES),
            user_rules: None,
            strategy: MatcherStrategy::default(),
            trace: None,
            threads: 1,
        }
    }
}

impl NormalizerConfig {
    /// 仅系统规则
    pub fn new(system_rules: impl Into<PathBuf>) -> Self {
        Self {
            system_rules: system_rules.into(),
            ..Self::default()
        }
    }

    /// 从 JSON 文件读取，缺省字段取默认值
    pub fn from_json_file(path: impl AsRef<Path>) -> TtResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TtResult<()> {
        if self.system_rules.as_os_str().is_empty() {
            return Err(ThemeTrackError::Config("system_rules path is empty".to_string()));
        }
        if let Some(trace) = &self.trace {
            if trace.table.is_empty() {
                return Err(ThemeTrackError::Config("trace.table is empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn trace_filter(&self) -> Option<TraceFilter> {
        self.trace.as_ref().map(TraceSelector::to_filter)
    }

    /// 实际使用的线程数
    pub fn effective_threads(&self) -> usize {
        match self.threads {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }
}

/// 配置构建器（链式 API）
#[derive(Debug, Clone)]
pub struct NormalizerConfigBuilder {
    config: NormalizerConfig,
}

impl NormalizerConfigBuilder {
    pub fn new(system_rules: impl Into<PathBuf>) -> Self {
        Self {
            config: NormalizerConfig::new(system_rules),
        }
    }

    pub fn user_rules(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.user_rules = Some(path.into());
        self
    }

    pub fn strategy(mut self, strategy: MatcherStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// 只记录 table 表第 record_index 行（从0开始）的规则日志
    pub fn trace(mut self, table: impl Into<String>, record_index: usize) -> Self {
        self.config.trace = Some(TraceSelector {
            table: table.into(),
            record_index,
        });
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    pub fn build(self) -> TtResult<NormalizerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_overrides_file_names() {
        assert!(is_system_overrides_file("system_overrides.csv"));
        assert!(is_system_overrides_file("System_Overrides_v2.XLSX"));
        assert!(!is_system_overrides_file("user_overrides.csv"));
        assert!(!is_system_overrides_file("system_overrides.json"));
    }

    #[test]
    fn test_builder() {
        let config = NormalizerConfigBuilder::new("rules/system_overrides.csv")
            .user_rules("rules/user.csv")
            .strategy(MatcherStrategy::Naive)
            .trace("holdings", 4)
            .threads(2)
            .build()
            .unwrap();
        assert_eq!(config.user_rules.as_deref(), Some(Path::new("rules/user.csv")));
        assert_eq!(config.strategy, MatcherStrategy::Naive);
        assert_eq!(config.effective_threads(), 2);
        assert!(config.trace_filter().is_some());
    }

    #[test]
    fn test_json_defaults() {
        let config: NormalizerConfig =
            serde_json::from_str(r#"{"user_rules":"user.csv","strategy":"naive"}"#).unwrap();
        assert_eq!(config.system_rules, PathBuf::from(DEFAULT_SYSTEM_RULES));
        assert_eq!(config.strategy, MatcherStrategy::Naive);
        assert_eq!(config.threads, 1);
        assert!(config.trace.is_none());
    }

    #[test]
    fn test_empty_trace_table_rejected() {
        let err = NormalizerConfigBuilder::new("system_overrides.csv")
            .trace("", 0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ThemeTrackError::Config(_)));
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("themetrack_config_{}.json", std::process::id()));
        fs::write(&path, r#"{"system_rules":"a/system_overrides.csv","trace":{"table":"picks","record_index":2}}"#).unwrap();
        let config = NormalizerConfig::from_json_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(
            config.trace,
            Some(TraceSelector {
                table: "picks".to_string(),
                record_index: 2
            })
        );
    }
}
