//! 规则表解析
//! 输入是已经读成字符串的行（CSV/表格读取在上层完成），输出不可变的 RuleSet
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;

use crate::core::{
    CellPattern, ConditionValue, MatchCondition, PatternCache, Rule, RuleOrigin, RuleSet,
};
use crate::error::{CoreError, CoreResult, SourceLocation};

/// 表头前三格
pub const HEADER: [&str; 3] = ["Match", "", "Replacement"];
/// 保留替换列：持仓与推荐的关联列配置
pub const MATCH_COLUMNS_COLUMN: &str = "R:MatchColumns";
/// 通配匹配列，等价于无匹配条件
pub const WILDCARD_COLUMN: &str = "*";

const ROW_WIDTH: usize = 4;
const MATCH_VALUE_COL: usize = 1;
const REPL_VALUE_COL: usize = 3;

static MATCH_COLUMNS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9: ]+(?:,[A-Za-z0-9: ]+)*)\s*=\s*([A-Za-z0-9: ]+(?:,[A-Za-z0-9: ]+)*)$")
        .unwrap()
});

/// R:MatchColumns 的值：持仓列 = 推荐列，两侧列数相同
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchColumns {
    pub holding_columns: Vec<String>,
    pub pick_columns: Vec<String>,
}

impl MatchColumns {
    /// 格式：`col1,col2,...=col1,col2,...`；不合法返回 None
    pub fn parse(value: &str) -> Option<Self> {
        let caps = MATCH_COLUMNS_PATTERN.captures(value.trim())?;
        let split = |s: &str| -> Vec<String> { s.split(',').map(|c| c.trim().to_string()).collect() };
        let holding_columns = split(&caps[1]);
        let pick_columns = split(&caps[2]);
        if holding_columns.len() != pick_columns.len()
            || holding_columns.iter().chain(&pick_columns).any(String::is_empty)
        {
            return None;
        }
        Some(Self {
            holding_columns,
            pick_columns,
        })
    }
}

/// 规则表中的一行，补齐到4格
struct TableRow<'a> {
    index: usize,
    cells: [&'a str; ROW_WIDTH],
    raw: Vec<String>,
}

impl<'a> TableRow<'a> {
    fn new(index: usize, row: &'a [String]) -> Self {
        let mut cells = [""; ROW_WIDTH];
        for (slot, cell) in cells.iter_mut().zip(row) {
            *slot = cell.as_str();
        }
        Self {
            index,
            cells,
            raw: cells.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_empty())
    }

    fn is_header(&self) -> bool {
        self.cells[..3] == HEADER
    }

    fn error(&self, col: Option<usize>, message: impl Into<String>) -> CoreError {
        CoreError::rule_parse(SourceLocation::new(self.index, col), message, &self.raw)
    }
}

/// 正在组装的规则，附带重复检查状态
struct PendingRule {
    rule: Rule,
    match_columns: FxHashSet<String>,
    var_names: FxHashSet<String>,
}

impl PendingRule {
    fn new(row: usize, origin: RuleOrigin) -> Self {
        Self {
            rule: Rule::new(row, origin),
            match_columns: FxHashSet::default(),
            var_names: FxHashSet::default(),
        }
    }
}

/// 规则表解析器
#[derive(Debug, Default)]
pub struct RuleTableParser {
    cache: PatternCache,
}

impl RuleTableParser {
    /// 解析规则表；任何错误都使整张表作废
    pub fn parse(rows: &[Vec<String>], origin: RuleOrigin) -> CoreResult<RuleSet> {
        Self::parse_labeled(rows, origin, "")
    }

    /// 同 parse，附带来源标识（文件名）
    pub fn parse_labeled(
        rows: &[Vec<String>],
        origin: RuleOrigin,
        label: &str,
    ) -> CoreResult<RuleSet> {
        let mut parser = Self::default();
        let rules = parser.parse_rows(rows, origin)?;

        let condition_count: usize = rules.iter().map(|r| r.conditions().len()).sum();
        log::debug!(
            "Parsed {:?} rule table '{}': {} rules, {} conditions, {} compiled patterns",
            origin,
            label,
            rules.len(),
            condition_count,
            parser.cache.len()
        );
        Ok(RuleSet::new(origin, label, rules))
    }

    fn parse_rows(&mut self, rows: &[Vec<String>], origin: RuleOrigin) -> CoreResult<Vec<Rule>> {
        let mut table = rows
            .iter()
            .enumerate()
            .map(|(index, row)| TableRow::new(index, row));

        // 表头之前允许任意说明内容
        if !table.by_ref().any(|row| row.is_header()) {
            return Err(CoreError::rule_parse(
                SourceLocation::new(0, None),
                "Header must match \"Match,'',Replacement\"",
                &[],
            ));
        }

        let mut rules = Vec::new();
        let mut current: Option<PendingRule> = None;

        for row in table {
            if row.is_blank() {
                if let Some(done) = current.take() {
                    rules.push(finish_rule(done));
                }
                continue;
            }

            let pending = current.get_or_insert_with(|| PendingRule::new(row.index, origin));
            self.parse_row(&row, pending)?;
        }
        if let Some(done) = current.take() {
            rules.push(finish_rule(done));
        }

        Ok(rules)
    }

    fn parse_row(&mut self, row: &TableRow<'_>, pending: &mut PendingRule) -> CoreResult<()> {
        let [match_column, match_value, repl_column, repl_value] = row.cells;
        let match_column = if match_column == WILDCARD_COLUMN {
            ""
        } else {
            match_column
        };

        if repl_column == MATCH_COLUMNS_COLUMN && MatchColumns::parse(repl_value).is_none() {
            return Err(row.error(
                Some(REPL_VALUE_COL),
                "MatchColumn values must be in the format \
                 '[holding_column1],[holding_column2],...=[pick_column1],[pick_column2]...', \
                 Ex. 'Region,Ticker=Region,Ticker'",
            ));
        }

        if !match_column.is_empty() {
            let condition = self.parse_condition(row, match_column, match_value)?;
            if !pending.match_columns.insert(match_column.to_string()) {
                return Err(row.error(
                    Some(0),
                    format!("Column '{}' is matched more than once in the same rule", match_column),
                ));
            }
            for var in condition.var_names() {
                if !pending.var_names.insert(var.to_string()) {
                    return Err(row.error(
                        Some(MATCH_VALUE_COL),
                        format!("Variable '{}' is bound more than once in the same rule", var),
                    ));
                }
            }
            pending.rule.add_condition(condition);
        }

        if !repl_column.is_empty() {
            pending.rule.add_replacement(row.index, repl_column, repl_value);
        }
        Ok(())
    }

    fn parse_condition(
        &mut self,
        row: &TableRow<'_>,
        column: &str,
        value: &str,
    ) -> CoreResult<MatchCondition> {
        let parsed = CellPattern::from_cell_value_cached(value, &mut self.cache).map_err(|e| {
            CoreError::RegexCompile {
                location: SourceLocation::cell(row.index, MATCH_VALUE_COL),
                pattern: e.pattern,
                source: e.source,
            }
        })?;
        Ok(match parsed {
            ConditionValue::Literal(value) => MatchCondition::Literal {
                row: row.index,
                column: column.to_string(),
                value,
            },
            ConditionValue::Pattern(pattern) => MatchCondition::Pattern {
                row: row.index,
                column: column.to_string(),
                pattern,
            },
        })
    }
}

fn finish_rule(pending: PendingRule) -> Rule {
    if pending.rule.replacements().is_empty() {
        log::warn!(
            "Rule at {} has no replacements",
            SourceLocation::new(pending.rule.row(), None)
        );
    }
    pending.rule
}
