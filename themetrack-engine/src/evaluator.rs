//! 规则求值器：系统规则 → 用户规则 → （用户规则有命中时）系统规则第二轮
//! 用户规则写过的列在本次求值内被固定，系统规则不再改写
use std::sync::Arc;

use serde::Serialize;

use crate::core::{AlteredColumns, FixedColumns, Record, RuleOrigin, RuleSet};
use crate::error::{CoreError, CoreResult};
use crate::indexer::{IndexedMatcher, NaiveMatcher, RuleMatcher};
use crate::trace::RuleTrace;
use crate::utils::log_format::compress_column_list;

/// 求值轮次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    SystemFirst,
    User,
    SystemSecond,
}

impl Pass {
    /// 规则日志中 rule_set 的取值
    pub fn label(self) -> &'static str {
        match self {
            Pass::SystemFirst => "system_rules pass 1",
            Pass::User => "user_rules",
            Pass::SystemSecond => "system_rules pass 2",
        }
    }
}

/// 单条记录的求值结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalOutcome {
    /// 各轮命中的规则下标（按执行顺序）
    pub system_pass_1: Vec<usize>,
    pub user_pass: Vec<usize>,
    pub system_pass_2: Vec<usize>,
    /// 值发生过变化的列
    pub altered: AlteredColumns,
}

impl EvalOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.altered.is_empty()
    }

    /// 是否执行了系统规则第二轮
    pub fn ran_second_pass(&self) -> bool {
        !self.user_pass.is_empty()
    }
}

/// 批量求值统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub records: usize,
    pub changed_records: usize,
    pub system_matches: usize,
    pub user_matches: usize,
}

impl BatchSummary {
    pub fn add(&mut self, outcome: &EvalOutcome) {
        self.records += 1;
        if !outcome.is_unchanged() {
            self.changed_records += 1;
        }
        self.system_matches += outcome.system_pass_1.len() + outcome.system_pass_2.len();
        self.user_matches += outcome.user_pass.len();
    }

    pub fn merge(&mut self, other: BatchSummary) {
        self.records += other.records;
        self.changed_records += other.changed_records;
        self.system_matches += other.system_matches;
        self.user_matches += other.user_matches;
    }
}

/// 单次求值期间两个规则集各自的匹配缓存
struct PassCaches<M: RuleMatcher> {
    system: M::Cache,
    user: M::Cache,
}

/// 规则求值器，对匹配策略泛型
#[derive(Debug, Clone)]
pub struct Evaluator<M: RuleMatcher> {
    system: M,
    user: M,
}

impl Evaluator<IndexedMatcher> {
    /// 使用索引匹配器
    pub fn indexed(
        system: impl Into<Arc<RuleSet>>,
        user: impl Into<Arc<RuleSet>>,
    ) -> CoreResult<Self> {
        Self::new(IndexedMatcher::new(system), IndexedMatcher::new(user))
    }
}

impl Evaluator<NaiveMatcher> {
    /// 使用朴素匹配器
    pub fn naive(
        system: impl Into<Arc<RuleSet>>,
        user: impl Into<Arc<RuleSet>>,
    ) -> CoreResult<Self> {
        Self::new(NaiveMatcher::new(system), NaiveMatcher::new(user))
    }
}

impl<M: RuleMatcher> Evaluator<M> {
    /// 两个匹配器的规则集来源必须分别是 System / User
    pub fn new(system: M, user: M) -> CoreResult<Self> {
        if system.rule_set().origin() != RuleOrigin::System {
            return Err(CoreError::InvalidInput(
                "the first rule set must hold system rules".to_string(),
            ));
        }
        if user.rule_set().origin() != RuleOrigin::User {
            return Err(CoreError::InvalidInput(
                "the second rule set must hold user rules".to_string(),
            ));
        }
        Ok(Self { system, user })
    }

    pub fn system(&self) -> &M {
        &self.system
    }

    pub fn user(&self) -> &M {
        &self.user
    }

    /// 对单条记录执行完整的三轮求值
    pub fn run(&self, record: &mut Record, trace: &mut RuleTrace) -> EvalOutcome {
        let mut fixed = FixedColumns::new();
        let mut caches = PassCaches::<M> {
            system: self.system.new_cache(),
            user: self.user.new_cache(),
        };
        let mut outcome = EvalOutcome::default();

        outcome.system_pass_1 = self.run_pass(
            Pass::SystemFirst,
            record,
            &mut fixed,
            &mut caches,
            &mut outcome.altered,
            trace,
        );
        outcome.user_pass = self.run_pass(
            Pass::User,
            record,
            &mut fixed,
            &mut caches,
            &mut outcome.altered,
            trace,
        );
        // 用户规则改过数据后，系统规则需要在新数据上再跑一轮
        if !outcome.user_pass.is_empty() {
            outcome.system_pass_2 = self.run_pass(
                Pass::SystemSecond,
                record,
                &mut fixed,
                &mut caches,
                &mut outcome.altered,
                trace,
            );
        }

        if !outcome.altered.is_empty() {
            log::trace!(
                "Record updated, {} fixed columns, altered: {}",
                fixed.len(),
                compress_column_list(outcome.altered.iter().map(String::as_str))
            );
        }
        outcome
    }

    /// 批量求值，日志上下文中的 record_index 从0开始
    pub fn run_batch(&self, records: &mut [Record], trace: &mut RuleTrace) -> BatchSummary {
        self.run_batch_from(records, 0, trace)
    }

    /// 批量求值，record_index 从 first_index 开始（分片并行时使用）
    pub fn run_batch_from(
        &self,
        records: &mut [Record],
        first_index: usize,
        trace: &mut RuleTrace,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (offset, record) in records.iter_mut().enumerate() {
            let outcome = trace.with_context(
                || vec![("record_index", (first_index + offset).to_string())],
                |trace| self.run(record, trace),
            );
            summary.add(&outcome);
        }
        log::debug!(
            "Evaluated {} records: {} changed, {} system matches, {} user matches",
            summary.records,
            summary.changed_records,
            summary.system_matches,
            summary.user_matches
        );
        summary
    }

    fn run_pass(
        &self,
        pass: Pass,
        record: &mut Record,
        fixed: &mut FixedColumns,
        caches: &mut PassCaches<M>,
        altered: &mut AlteredColumns,
        trace: &mut RuleTrace,
    ) -> Vec<usize> {
        let matcher = match pass {
            Pass::User => &self.user,
            Pass::SystemFirst | Pass::SystemSecond => &self.system,
        };

        trace.with_context(
            || vec![("rule_set", pass.label().to_string())],
            |trace| {
                let rules = matcher.rule_set().rules();
                let mut matched = Vec::new();
                let mut from = 0;
                loop {
                    let cache = match pass {
                        Pass::User => &mut caches.user,
                        Pass::SystemFirst | Pass::SystemSecond => &mut caches.system,
                    };
                    let found = matcher.find_next(record, cache, from);

                    // 匹配器跳过的规则在日志里记为未匹配
                    if trace.is_enabled() {
                        let next = found.as_ref().map_or(rules.len(), |f| f.rule_index);
                        for rule in &rules[from..next] {
                            trace.with_context(
                                || vec![("rule_row", (rule.row() + 1).to_string())],
                                |trace| trace.write(|| "Rule did not match".to_string()),
                            );
                        }
                    }

                    let Some(found) = found else {
                        break;
                    };
                    from = found.rule_index + 1;
                    matched.push(found.rule_index);

                    let rule = &rules[found.rule_index];
                    let changed = trace.with_context(
                        || vec![("rule_row", (rule.row() + 1).to_string())],
                        |trace| {
                            trace.write(|| "Rule matched".to_string());
                            rule.apply_traced(&found.bindings, record, fixed, trace)
                        },
                    );

                    // 两个规则集的缓存都依赖记录当前值
                    if !changed.is_empty() {
                        self.system.invalidate(&mut caches.system, &changed);
                        self.user.invalidate(&mut caches.user, &changed);
                        altered.extend(changed);
                    }
                }
                matched
            },
        )
    }
}

/// 用系统/用户规则集处理一批记录
/// 每次调用都会重建索引；需要复用时直接构造 Evaluator
pub fn evaluate(
    system: &RuleSet,
    user: &RuleSet,
    mut records: Vec<Record>,
) -> CoreResult<Vec<Record>> {
    let evaluator = Evaluator::indexed(system.clone(), user.clone())?;
    evaluator.run_batch(&mut records, &mut RuleTrace::disabled());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CellPattern;
    use crate::core::ConditionValue;
    use crate::source::RuleTableParser;

    fn parse(origin: RuleOrigin, table: &[&[&str]]) -> RuleSet {
        let mut rows: Vec<Vec<String>> = vec![vec!["Match".into(), "".into(), "Replacement".into()]];
        rows.extend(table.iter().map(|r| r.iter().map(|c| c.to_string()).collect()));
        RuleTableParser::parse(&rows, origin).unwrap()
    }

    fn no_user_rules() -> RuleSet {
        RuleSet::empty(RuleOrigin::User)
    }

    /// 两种匹配器结果必须一致，返回索引匹配器的结果
    fn run_both(system: &RuleSet, user: &RuleSet, record: &Record) -> (Record, EvalOutcome) {
        let indexed = Evaluator::indexed(system.clone(), user.clone()).unwrap();
        let naive = Evaluator::naive(system.clone(), user.clone()).unwrap();

        let mut a = record.clone();
        let mut b = record.clone();
        let out_a = indexed.run(&mut a, &mut RuleTrace::disabled());
        let out_b = naive.run(&mut b, &mut RuleTrace::disabled());
        assert_eq!(a, b);
        assert_eq!(out_a, out_b);
        (a, out_a)
    }

    fn text(record: &Record, column: &str) -> Option<String> {
        record.text(column).map(|t| t.into_owned())
    }

    #[test]
    fn test_market_prefix_split() {
        let system = parse(
            RuleOrigin::System,
            &[&["Ticker", "${market}:${ticker}", "Ticker", "${ticker}"], &["", "", "Exchange", "${market}"]],
        );
        let (record, outcome) =
            run_both(&system, &no_user_rules(), &Record::from_pairs([("Ticker", "ASX:FOO")]));
        assert_eq!(text(&record, "Ticker").as_deref(), Some("FOO"));
        assert_eq!(text(&record, "Exchange").as_deref(), Some("ASX"));
        assert_eq!(outcome.system_pass_1, vec![0]);
        assert!(!outcome.ran_second_pass());
    }

    #[test]
    fn test_cross_column_propagation() {
        let system = parse(
            RuleOrigin::System,
            &[
                &["Exchange", "NYSE", "Region", "US"],
                &["", "", "", ""],
                &["Region", "US", "Currency", "USD"],
            ],
        );
        let (record, outcome) =
            run_both(&system, &no_user_rules(), &Record::from_pairs([("Exchange", "NYSE")]));
        assert_eq!(text(&record, "Currency").as_deref(), Some("USD"));
        assert_eq!(outcome.system_pass_1, vec![0, 1]);
    }

    #[test]
    fn test_user_change_propagates_in_second_pass() {
        let system = parse(RuleOrigin::System, &[&["Region", "US", "Currency", "USD"]]);
        let user = parse(RuleOrigin::User, &[&["Ticker", "FOO", "Region", "US"]]);
        let (record, outcome) = run_both(&system, &user, &Record::from_pairs([("Ticker", "FOO")]));
        assert_eq!(text(&record, "Region").as_deref(), Some("US"));
        assert_eq!(text(&record, "Currency").as_deref(), Some("USD"));
        assert!(outcome.system_pass_1.is_empty());
        assert_eq!(outcome.system_pass_2, vec![0]);
    }

    #[test]
    fn test_earlier_rule_does_not_see_later_changes_in_same_pass() {
        // 规则按顺序只访问一次：后面的规则改出的值不会让前面的规则再次匹配
        let system = parse(
            RuleOrigin::System,
            &[
                &["Region", "US", "Currency", "USD"],
                &["", "", "", ""],
                &["Exchange", "NYSE", "Region", "US"],
            ],
        );
        let (record, _) =
            run_both(&system, &no_user_rules(), &Record::from_pairs([("Exchange", "NYSE")]));
        assert_eq!(text(&record, "Region").as_deref(), Some("US"));
        assert_eq!(text(&record, "Currency"), None);
    }

    #[test]
    fn test_user_precedence_nyseamerican() {
        let system = parse(
            RuleOrigin::System,
            &[
                &["Ticker", "FOO", "Exchange", "NYSE"],
                &["", "", "", ""],
                &["Exchange", "NYSE", "Region", "US"],
                &["", "", "Currency", "USD"],
                &["", "", "", ""],
                &["Exchange", "NYSEAMERICAN", "Region", "US"],
            ],
        );
        let user = parse(RuleOrigin::User, &[&["Ticker", "FOO", "Exchange", "NYSEAMERICAN"]]);

        let (record, outcome) = run_both(&system, &user, &Record::from_pairs([("Ticker", "FOO")]));
        assert_eq!(text(&record, "Exchange").as_deref(), Some("NYSEAMERICAN"));
        assert_eq!(text(&record, "Region").as_deref(), Some("US"));
        assert_eq!(text(&record, "Currency").as_deref(), Some("USD"));
        assert_eq!(outcome.system_pass_1, vec![0, 1]);
        assert_eq!(outcome.user_pass, vec![0]);
        // 第二轮：规则0命中但 Exchange 已固定；NYSE 规则不再命中；NYSEAMERICAN 规则命中
        assert_eq!(outcome.system_pass_2, vec![0, 2]);
    }

    #[test]
    fn test_user_written_columns_survive_second_pass() {
        let system = parse(RuleOrigin::System, &[&["*", "", "Currency", "USD"]]);
        let user = parse(RuleOrigin::User, &[&["Ticker", "FOO", "Currency", "AUD"]]);
        let (record, outcome) = run_both(&system, &user, &Record::from_pairs([("Ticker", "FOO")]));
        assert_eq!(text(&record, "Currency").as_deref(), Some("AUD"));
        assert_eq!(outcome.system_pass_2, vec![0]);
    }

    #[test]
    fn test_user_rule_without_change_still_fixes_column() {
        let system = parse(RuleOrigin::System, &[&["Note", "late", "Exchange", "ASX"]]);
        let user = parse(
            RuleOrigin::User,
            &[&["Ticker", "FOO", "Exchange", "NYSE"], &["", "", "Note", "late"]],
        );
        let initial = Record::from_pairs([("Ticker", "FOO"), ("Exchange", "NYSE")]);
        let (record, outcome) = run_both(&system, &user, &initial);
        assert_eq!(outcome.system_pass_2, vec![0]);
        assert_eq!(text(&record, "Exchange").as_deref(), Some("NYSE"));
        assert!(!outcome.altered.contains("Exchange"));
    }

    #[test]
    fn test_no_user_match_skips_second_pass() {
        let system = parse(RuleOrigin::System, &[&["*", "", "Note", "x"]]);
        let user = parse(RuleOrigin::User, &[&["Ticker", "BAR", "Exchange", "NYSE"]]);
        let (_, outcome) = run_both(&system, &user, &Record::from_pairs([("Ticker", "FOO")]));
        assert!(outcome.user_pass.is_empty());
        assert!(outcome.system_pass_2.is_empty());
    }

    #[test]
    fn test_wildcard_rules_run_in_source_order() {
        let system = parse(
            RuleOrigin::System,
            &[
                &["*", "", "Note", "first"],
                &["", "", "", ""],
                &["Ticker", "FOO", "Note", "second"],
                &["", "", "", ""],
                &["*", "", "Tag", "${Note}"],
            ],
        );
        let (record, outcome) =
            run_both(&system, &no_user_rules(), &Record::from_pairs([("Ticker", "FOO")]));
        assert_eq!(text(&record, "Note").as_deref(), Some("second"));
        // 未绑定的变量原样保留
        assert_eq!(text(&record, "Tag").as_deref(), Some("${Note}"));
        assert_eq!(outcome.system_pass_1, vec![0, 1, 2]);
    }

    #[test]
    fn test_converged_record_is_idempotent() {
        let system = parse(
            RuleOrigin::System,
            &[
                &["Ticker", "${market}:${ticker}", "Ticker", "${ticker}"],
                &["", "", "Exchange", "${market}"],
                &["", "", "", ""],
                &["Exchange", "ASX", "Region", "AU"],
                &["", "", "Currency", "AUD"],
            ],
        );
        let user = parse(RuleOrigin::User, &[&["Ticker", "FOO", "Region", "Australia"]]);
        let records = vec![
            Record::from_pairs([("Ticker", "ASX:FOO")]),
            Record::from_pairs([("Ticker", "ASX:BAR"), ("Qty", "3")]),
        ];
        let once = evaluate(&system, &user, records).unwrap();
        assert_eq!(text(&once[0], "Region").as_deref(), Some("Australia"));
        assert_eq!(text(&once[1], "Region").as_deref(), Some("AU"));

        let evaluator = Evaluator::indexed(system, user).unwrap();
        let mut twice = once.clone();
        let summary = evaluator.run_batch(&mut twice, &mut RuleTrace::disabled());
        assert_eq!(once, twice);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.user_matches, 1);
    }

    #[test]
    fn test_multi_value_output_consumed_as_pattern() {
        let system = parse(RuleOrigin::System, &[&["Ticker", "FOO", "Exchanges", "m:NYSE,NASDAQ"]]);
        let (record, _) =
            run_both(&system, &no_user_rules(), &Record::from_pairs([("Ticker", "FOO")]));
        let stored = text(&record, "Exchanges").unwrap();
        assert_eq!(stored, "r:NYSE|NASDAQ");

        let ConditionValue::Pattern(pattern) = CellPattern::from_cell_value(&stored).unwrap() else {
            panic!("stored value should compile as a pattern");
        };
        assert!(pattern.is_match("NASDAQ"));
        assert!(!pattern.is_match("ASX"));
    }

    #[test]
    fn test_origin_mismatch_rejected() {
        let system = parse(RuleOrigin::System, &[&["*", "", "Note", "x"]]);
        assert!(matches!(
            Evaluator::indexed(system.clone(), system),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_trace_records_pass_and_rule_context() {
        let system = parse(RuleOrigin::System, &[&["Ticker", "FOO", "Exchange", "NYSE"]]);
        let user = parse(RuleOrigin::User, &[&["Ticker", "FOO", "Exchange", "NYSEAMERICAN"]]);
        let evaluator = Evaluator::indexed(system, user).unwrap();

        let mut records = vec![Record::from_pairs([("Ticker", "BAR")]), Record::from_pairs([("Ticker", "FOO")])];
        let mut trace = RuleTrace::new(crate::trace::TraceFilter::new().exact("record_index", "1"));
        evaluator.run_batch(&mut records, &mut trace);

        let entries = trace.entries();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e.context_value("record_index") == Some("1")));
        let skipped = entries
            .iter()
            .find(|e| e.message == "Exchange was modified by a user rule, skipping")
            .unwrap();
        assert_eq!(skipped.context_value("rule_set"), Some("system_rules pass 2"));
        assert_eq!(skipped.context_value("rule_row"), Some("2"));
    }

    #[test]
    fn test_trace_records_unmatched_rules() {
        let system = parse(
            RuleOrigin::System,
            &[
                &["Ticker", "BAR", "Exchange", "ASX"],
                &["", "", "", ""],
                &["Ticker", "FOO", "Exchange", "NYSE"],
                &["", "", "", ""],
                &["Ticker", "BAZ", "Exchange", "LSE"],
            ],
        );
        let expected = vec![
            ("2".to_string(), "Rule did not match".to_string()),
            ("4".to_string(), "Rule matched".to_string()),
            ("6".to_string(), "Rule did not match".to_string()),
        ];
        let record = Record::from_pairs([("Ticker", "FOO")]);
        let indexed = Evaluator::indexed(system.clone(), no_user_rules()).unwrap();
        let naive = Evaluator::naive(system, no_user_rules()).unwrap();
        assert_eq!(rule_messages(&indexed, &record), expected);
        assert_eq!(rule_messages(&naive, &record), expected);
    }

    fn rule_messages<M: RuleMatcher>(evaluator: &Evaluator<M>, record: &Record) -> Vec<(String, String)> {
        let mut trace = RuleTrace::unfiltered();
        evaluator.run(&mut record.clone(), &mut trace);
        trace
            .entries()
            .iter()
            .filter(|e| e.message.starts_with("Rule "))
            .map(|e| (e.context_value("rule_row").unwrap_or_default().to_string(), e.message.clone()))
            .collect()
    }

    #[test]
    fn test_disabled_trace_skips_unmatched_logging() {
        let system = parse(RuleOrigin::System, &[&["Ticker", "BAR", "Exchange", "ASX"]]);
        let evaluator = Evaluator::indexed(system, no_user_rules()).unwrap();
        let mut trace = RuleTrace::disabled();
        evaluator.run(&mut Record::from_pairs([("Ticker", "FOO")]), &mut trace);
        assert!(trace.entries().is_empty());
    }
}
