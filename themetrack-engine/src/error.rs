//! themetrack-engine 内核错误定义
//! 只有规则表解析阶段会产生致命错误；记录求值阶段不返回错误
use std::fmt;

use thiserror::Error;

use regex::Error as RegexError;

/// 规则表中的位置（行列均从0开始，展示时+1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceLocation {
    pub row: usize,
    pub col: Option<usize>,
}

impl SourceLocation {
    pub fn new(row: usize, col: Option<usize>) -> Self {
        Self { row, col }
    }

    pub fn cell(row: usize, col: usize) -> Self {
        Self { row, col: Some(col) }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.col {
            Some(col) => write!(f, "Row {}, Col {}", self.row + 1, col + 1),
            None => write!(f, "Row {}, Col (none)", self.row + 1),
        }
    }
}

/// 内核核心错误枚举
#[derive(Error, Debug)]
pub enum CoreError {
    /// 规则表语法错误（表头缺失/MatchColumns格式错误/重复变量/重复匹配列）
    #[error("{location}: {message} -- {row_text}")]
    RuleParse {
        location: SourceLocation,
        message: String,
        row_text: String,
    },

    /// 匹配值编译出的正则非法
    #[error("{location}: Regex compilation failed for '{pattern}': {source}")]
    RegexCompile {
        location: SourceLocation,
        pattern: String,
        #[source]
        source: RegexError,
    },

    /// 无效输入参数
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    pub fn rule_parse(location: SourceLocation, message: impl Into<String>, row: &[String]) -> Self {
        CoreError::RuleParse {
            location,
            message: message.into(),
            row_text: row.join(","),
        }
    }

    /// 出错位置（InvalidInput 没有位置）
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            CoreError::RuleParse { location, .. } | CoreError::RegexCompile { location, .. } => {
                Some(*location)
            }
            CoreError::InvalidInput(_) => None,
        }
    }
}

/// 内核层全局Result类型别名
pub type CoreResult<T> = Result<T, CoreError>;
