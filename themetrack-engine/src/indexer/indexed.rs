//! 索引匹配器
//! 按列聚合全部规则的条件：字面量按值建倒排，正则按源码去重
//! 单条记录的匹配代价与被引用的列数相关，而不是与规则数相关
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::matcher::{RuleMatch, RuleMatcher};
use crate::core::{AlteredColumns, Bindings, CellPattern, MatchCondition, Record, RuleSet};

/// 同一正则被多条规则共用
#[derive(Debug, Clone)]
struct PatternEntry {
    pattern: CellPattern,
    /// 以该正则为首个条件的规则（升序），用于生成候选
    primary_rules: Vec<usize>,
}

/// 单列上的全部条件
#[derive(Debug, Clone)]
struct ColumnGroup {
    column: String,
    /// 字面量值 → 规则下标（升序）
    literals: FxHashMap<String, Vec<usize>>,
    patterns: Vec<PatternEntry>,
    /// 以本列为主列组的最大规则下标
    last_primary: Option<usize>,
}

impl ColumnGroup {
    fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            literals: FxHashMap::default(),
            patterns: Vec::new(),
            last_primary: None,
        }
    }

    fn pattern_slot(&mut self, pattern: &CellPattern) -> usize {
        match self.patterns.iter().position(|e| &e.pattern == pattern) {
            Some(idx) => idx,
            None => {
                self.patterns.push(PatternEntry {
                    pattern: pattern.clone(),
                    primary_rules: Vec::new(),
                });
                self.patterns.len() - 1
            }
        }
    }
}

/// 规则中单个条件在索引里的位置
#[derive(Debug, Clone)]
enum Slot {
    Literal(String),
    Pattern(usize),
}

/// 单条规则：条件顺序的 (列组, 位置) 列表，首个条件所在列组即主列组
#[derive(Debug, Clone, Default)]
struct IndexedRule {
    slots: Vec<(usize, Slot)>,
}

impl IndexedRule {
    fn primary_group(&self) -> Option<usize> {
        self.slots.first().map(|(group, _)| *group)
    }
}

/// 正则条目的求值状态
#[derive(Debug, Clone, Default)]
enum EntryState {
    #[default]
    Pending,
    Miss,
    Hit(Bindings),
}

/// 单列的缓存状态
#[derive(Debug, Clone, Default)]
struct GroupState {
    loaded: bool,
    /// 单元格字符串形式；列缺失/空值为 None
    text: Option<String>,
    entries: Vec<EntryState>,
}

impl GroupState {
    fn reset(&mut self) {
        self.loaded = false;
        self.text = None;
        self.entries.iter_mut().for_each(|e| *e = EntryState::Pending);
    }
}

/// 单条记录对单个规则集的匹配缓存，按需填充
/// 被改写的列通过 RuleMatcher::invalidate 清空
#[derive(Debug, Clone)]
pub struct CandidateCache {
    groups: Vec<GroupState>,
}

impl CandidateCache {
    fn group<'a>(
        &'a mut self,
        matcher: &IndexedMatcher,
        record: &Record,
        group: usize,
    ) -> &'a mut GroupState {
        let state = &mut self.groups[group];
        if !state.loaded {
            state.text = record
                .text(&matcher.groups[group].column)
                .map(|t| t.into_owned());
            state.loaded = true;
        }
        state
    }

    /// 正则条目命中时返回绑定，结果按条目缓存
    fn entry<'a>(
        &'a mut self,
        matcher: &IndexedMatcher,
        record: &Record,
        group: usize,
        entry: usize,
    ) -> Option<&'a Bindings> {
        let state = self.group(matcher, record, group);
        if matches!(state.entries[entry], EntryState::Pending) {
            let pattern = &matcher.groups[group].patterns[entry].pattern;
            state.entries[entry] = match state.text.as_deref().and_then(|t| pattern.captures(t)) {
                Some(bindings) => EntryState::Hit(bindings),
                None => EntryState::Miss,
            };
        }
        match &state.entries[entry] {
            EntryState::Hit(bindings) => Some(bindings),
            _ => None,
        }
    }
}

/// 索引匹配器：每个 RuleSet 构建一次，之后只读
#[derive(Debug, Clone)]
pub struct IndexedMatcher {
    rules: Arc<RuleSet>,
    groups: Vec<ColumnGroup>,
    indexed: Vec<IndexedRule>,
    always: Vec<usize>,
}

impl IndexedMatcher {
    pub fn new(rules: impl Into<Arc<RuleSet>>) -> Self {
        let rules = rules.into();
        let mut groups: Vec<ColumnGroup> = Vec::new();
        let mut group_of: FxHashMap<String, usize> = FxHashMap::default();
        let mut indexed = Vec::with_capacity(rules.len());
        let mut always = Vec::new();

        for (rule_index, rule) in rules.rules().iter().enumerate() {
            if rule.is_always() {
                always.push(rule_index);
            }

            let mut entry = IndexedRule::default();
            for (cond_pos, condition) in rule.conditions().iter().enumerate() {
                let column = condition.column();
                let group_index = *group_of.entry(column.to_string()).or_insert_with(|| {
                    groups.push(ColumnGroup::new(column));
                    groups.len() - 1
                });
                let group = &mut groups[group_index];
                if cond_pos == 0 {
                    group.last_primary = Some(rule_index);
                }

                let slot = match condition {
                    MatchCondition::Literal { value, .. } => {
                        let hits = group.literals.entry(value.clone()).or_default();
                        if hits.last() != Some(&rule_index) {
                            hits.push(rule_index);
                        }
                        Slot::Literal(value.clone())
                    }
                    MatchCondition::Pattern { pattern, .. } => {
                        let slot = group.pattern_slot(pattern);
                        if cond_pos == 0 {
                            group.patterns[slot].primary_rules.push(rule_index);
                        }
                        Slot::Pattern(slot)
                    }
                };
                entry.slots.push((group_index, slot));
            }
            indexed.push(entry);
        }

        log::debug!(
            "Indexed {} rules ({}): {} column groups, {} literal values, {} pattern entries, {} always-apply",
            rules.len(),
            if rules.label().is_empty() { "unlabeled" } else { rules.label() },
            groups.len(),
            groups.iter().map(|g| g.literals.len()).sum::<usize>(),
            groups.iter().map(|g| g.patterns.len()).sum::<usize>(),
            always.len()
        );

        Self {
            rules,
            groups,
            indexed,
            always,
        }
    }

    /// 被条件引用的列数
    pub fn column_count(&self) -> usize {
        self.groups.len()
    }

    /// 去重后的正则条目数
    pub fn pattern_count(&self) -> usize {
        self.groups.iter().map(|g| g.patterns.len()).sum()
    }

    /// 首个条件成立的规则（以及无条件规则）中下标 ≥ from 的部分，升序
    fn candidates(&self, record: &Record, cache: &mut CandidateCache, from: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self.always.iter().copied().filter(|&i| i >= from).collect();

        for group_index in 0..self.groups.len() {
            let group = &self.groups[group_index];
            if !group.last_primary.is_some_and(|i| i >= from) {
                continue;
            }

            let state = cache.group(self, record, group_index);
            if let Some(hits) = group.literals.get(state.text.as_deref().unwrap_or("")) {
                out.extend(
                    hits.iter()
                        .copied()
                        .filter(|&i| i >= from && self.indexed[i].primary_group() == Some(group_index)),
                );
            }

            for (entry_index, entry) in group.patterns.iter().enumerate() {
                // 只对仍有存活规则的正则求值
                if !entry.primary_rules.last().is_some_and(|&i| i >= from) {
                    continue;
                }
                if cache.entry(self, record, group_index, entry_index).is_some() {
                    out.extend(entry.primary_rules.iter().copied().filter(|&i| i >= from));
                }
            }
        }

        out.sort_unstable();
        out.dedup();
        out
    }

    /// 按条件顺序校验全部条件并合并绑定
    fn verify(&self, record: &Record, cache: &mut CandidateCache, rule_index: usize) -> Option<Bindings> {
        let mut bindings = Bindings::default();
        for (group, slot) in &self.indexed[rule_index].slots {
            match slot {
                Slot::Literal(value) => {
                    let state = cache.group(self, record, *group);
                    if state.text.as_deref().unwrap_or("") != value.as_str() {
                        return None;
                    }
                }
                Slot::Pattern(entry) => {
                    let hit = cache.entry(self, record, *group, *entry)?;
                    bindings.extend(hit.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        Some(bindings)
    }
}

impl RuleMatcher for IndexedMatcher {
    type Cache = CandidateCache;

    fn rule_set(&self) -> &RuleSet {
        &self.rules
    }

    fn new_cache(&self) -> CandidateCache {
        CandidateCache {
            groups: self
                .groups
                .iter()
                .map(|g| GroupState {
                    entries: vec![EntryState::Pending; g.patterns.len()],
                    ..GroupState::default()
                })
                .collect(),
        }
    }

    fn find_next(&self, record: &Record, cache: &mut CandidateCache, from: usize) -> Option<RuleMatch> {
        self.candidates(record, cache, from)
            .into_iter()
            .find_map(|rule_index| {
                self.verify(record, cache, rule_index).map(|bindings| RuleMatch {
                    rule_index,
                    bindings,
                })
            })
    }

    fn invalidate(&self, cache: &mut CandidateCache, altered: &AlteredColumns) {
        for (group, state) in self.groups.iter().zip(cache.groups.iter_mut()) {
            if altered.contains(&group.column) {
                state.reset();
            }
        }
    }
}
