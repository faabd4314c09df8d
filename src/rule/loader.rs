//! 规则表加载
use std::io::Read;
use std::path::Path;

use log::{debug, warn};
use themetrack_engine::{RuleOrigin, RuleSet, RuleTableParser};

use super::csv_source::{read_standardized_csv, read_standardized_csv_from_reader};
use crate::config::{is_system_overrides_file, NormalizerConfig};
use crate::error::{ThemeTrackError, TtResult};

/// 规则加载器
pub struct RuleLoader;

impl RuleLoader {
    /// 从 CSV 文件加载规则集；规则集标识为文件名
    pub fn load(path: impl AsRef<Path>, origin: RuleOrigin) -> TtResult<RuleSet> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        if !has_csv_extension(path) {
            return Err(ThemeTrackError::InvalidInput(format!(
                "{}: rule tables must be saved as .csv",
                path.display()
            )));
        }
        if origin == RuleOrigin::System && !is_system_overrides_file(&file_name) {
            warn!("System rule file '{}' does not follow the system_overrides*.csv naming", file_name);
        }

        let rows = read_standardized_csv(path)?;
        Self::parse_rows(&rows, origin, &file_name)
    }

    /// 从任意读取器加载规则集
    pub fn load_from_reader<R: Read>(reader: R, origin: RuleOrigin, label: &str) -> TtResult<RuleSet> {
        let rows = read_standardized_csv_from_reader(reader)?;
        Self::parse_rows(&rows, origin, label)
    }

    /// 按配置加载系统规则与（可选的）用户规则
    pub fn load_config(config: &NormalizerConfig) -> TtResult<(RuleSet, RuleSet)> {
        let system = Self::load(&config.system_rules, RuleOrigin::System)?;
        let user = match &config.user_rules {
            Some(path) => Self::load(path, RuleOrigin::User)?,
            None => {
                debug!("No user rules configured");
                RuleSet::empty(RuleOrigin::User)
            }
        };
        Ok((system, user))
    }

    fn parse_rows(rows: &[Vec<String>], origin: RuleOrigin, label: &str) -> TtResult<RuleSet> {
        RuleTableParser::parse_labeled(rows, origin, label).map_err(|source| ThemeTrackError::RuleTable {
            file: label.to_string(),
            source,
        })
    }
}

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}
