//! 全局错误类型定义
use std::io::Error as IoError;

use csv::Error as CsvError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use themetrack_engine::CoreError;

#[derive(Error, Debug)]
pub enum ThemeTrackError {
    // 规则相关错误
    #[error("{file}: {source}")]
    RuleTable {
        file: String,
        #[source]
        source: CoreError,
    },
    #[error("Rule engine error: {0}")]
    Core(#[from] CoreError),

    // 配置相关错误
    #[error("Invalid config: {0}")]
    Config(String),

    // 序列化/反序列化错误
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),
    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    // 基础错误
    #[error("IO error: {0}")]
    Io(#[from] IoError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// 全局Result类型
pub type TtResult<T> = Result<T, ThemeTrackError>;
