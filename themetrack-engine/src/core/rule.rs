use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use super::condition::{Bindings, MatchCondition};
use super::pattern::{expand_multi_value, substitute_vars};
use super::record::{CellValue, Record};
use crate::trace::RuleTrace;
use crate::utils::log_format::preview_compact;

/// 规则来源：系统内置规则 / 用户覆盖规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleOrigin {
    System,
    User,
}

impl RuleOrigin {
    pub fn is_user(self) -> bool {
        matches!(self, RuleOrigin::User)
    }
}

/// 单条替换动作：把模板代入变量后写入 column
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub row: usize,
    pub column: String,
    pub template: String,
}

/// apply 实际改动过的列
pub type AlteredColumns = FxHashSet<String>;

/// 单次求值中被用户规则写过的列
/// 每次求值由调用方新建，求值结束即丢弃
#[derive(Debug, Default)]
pub struct FixedColumns {
    columns: FxHashSet<String>,
}

impl FixedColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn mark(&mut self, column: &str) {
        if !self.columns.contains(column) {
            self.columns.insert(column.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }
}

/// 覆盖规则：全部条件成立时执行全部替换
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    row: usize,
    origin: RuleOrigin,
    conditions: Vec<MatchCondition>,
    replacements: Vec<Replacement>,
}

impl Rule {
    pub fn new(row: usize, origin: RuleOrigin) -> Self {
        Self {
            row,
            origin,
            conditions: Vec::new(),
            replacements: Vec::new(),
        }
    }

    /// 规则首行在规则表中的行号（从0开始）
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn origin(&self) -> RuleOrigin {
        self.origin
    }

    pub fn conditions(&self) -> &[MatchCondition] {
        &self.conditions
    }

    pub fn replacements(&self) -> &[Replacement] {
        &self.replacements
    }

    /// 无匹配条件（`*`）的规则总是执行
    pub fn is_always(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn add_condition(&mut self, condition: MatchCondition) {
        self.conditions.push(condition);
    }

    /// 添加替换动作，m:v1,v2 多值语法在此改写为 r:v1|v2
    pub fn add_replacement(&mut self, row: usize, column: impl Into<String>, value: &str) {
        self.replacements.push(Replacement {
            row,
            column: column.into(),
            template: expand_multi_value(value).into_owned(),
        });
    }

    /// 全部条件成立时返回合并后的变量绑定
    pub fn matches(&self, record: &Record) -> Option<Bindings> {
        let mut bindings = Bindings::default();
        for condition in &self.conditions {
            bindings.extend(condition.matches(record)?);
        }
        Some(bindings)
    }

    pub fn apply(
        &self,
        bindings: &Bindings,
        record: &mut Record,
        fixed: &mut FixedColumns,
    ) -> AlteredColumns {
        self.apply_traced(bindings, record, fixed, &mut RuleTrace::disabled())
    }

    /// 执行替换，返回值真正发生变化的列
    /// - 系统规则不写已固定的列
    /// - 值未变化时不写入
    /// - 用户规则无论值是否变化都把列标记为固定
    pub fn apply_traced(
        &self,
        bindings: &Bindings,
        record: &mut Record,
        fixed: &mut FixedColumns,
        trace: &mut RuleTrace,
    ) -> AlteredColumns {
        let mut altered = AlteredColumns::default();
        let is_user = self.origin.is_user();

        for replacement in &self.replacements {
            let column = replacement.column.as_str();
            trace.with_context(
                || {
                    vec![
                        ("replacement_row", (replacement.row + 1).to_string()),
                        ("column", replacement.column.clone()),
                    ]
                },
                |trace| {
                    if !is_user && fixed.contains(column) {
                        trace.write(|| format!("{} was modified by a user rule, skipping", column));
                        return;
                    }

                    let new_value = substitute_vars(&replacement.template, bindings);
                    let unchanged = matches!(
                        record.get(column),
                        Some(CellValue::Text(current)) if current.as_str() == new_value.as_ref()
                    );
                    if !unchanged {
                        trace.write(|| {
                            format!(
                                "Updating from \"{}\" to \"{}\"",
                                record.get(column).map(|v| v.to_string()).unwrap_or_default(),
                                preview_compact(&new_value, 120)
                            )
                        });
                        record.set(column, new_value.into_owned());
                        altered.insert(column.to_string());
                    }
                    if is_user {
                        trace.write(|| format!("Setting {} as fixed column", column));
                        fixed.mark(column);
                    }
                },
            );
        }

        altered
    }
}
