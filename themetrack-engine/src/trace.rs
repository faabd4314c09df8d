//! 规则执行日志
//! 按上下文栈记录每条规则的匹配/替换过程，可按上下文键值过滤（例如只看某一行记录）
use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::utils::log_format::preview_compact;

/// 上下文键值对
pub type TraceContext = Vec<(String, String)>;

/// 过滤条件的取值
#[derive(Debug, Clone)]
pub enum TraceMatch {
    Exact(String),
    Pattern(Regex),
}

impl TraceMatch {
    fn accepts(&self, value: &str) -> bool {
        match self {
            TraceMatch::Exact(expected) => expected == value,
            TraceMatch::Pattern(re) => re.is_match(value),
        }
    }
}

/// 日志过滤器：当前上下文必须包含全部键且取值匹配
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    conditions: Vec<(String, TraceMatch)>,
}

impl TraceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions
            .push((key.into(), TraceMatch::Exact(value.into())));
        self
    }

    pub fn pattern(mut self, key: impl Into<String>, pattern: Regex) -> Self {
        self.conditions.push((key.into(), TraceMatch::Pattern(pattern)));
        self
    }

    fn accepts(&self, context: &TraceContext) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            context
                .iter()
                .find(|(k, _)| k == key)
                .is_some_and(|(_, v)| expected.accepts(v))
        })
    }
}

/// 一条日志
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub message: String,
    pub context: TraceContext,
}

impl TraceEntry {
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (k, v)) in self.context.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}: {}", self.message)
    }
}

/// 规则执行日志
/// 关闭状态下 with_context/write 都不会构造字符串
#[derive(Debug, Clone)]
pub struct RuleTrace {
    enabled: bool,
    filter: TraceFilter,
    stack: Vec<TraceContext>,
    entries: Vec<TraceEntry>,
}

impl Default for RuleTrace {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RuleTrace {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            filter: TraceFilter::default(),
            stack: vec![TraceContext::new()],
            entries: Vec::new(),
        }
    }

    pub fn new(filter: TraceFilter) -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
        .with_filter(filter)
    }

    /// 记录全部消息
    pub fn unfiltered() -> Self {
        Self::new(TraceFilter::default())
    }

    fn with_filter(mut self, filter: TraceFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 同一过滤器、空上下文、空日志的新实例（并行分片使用）
    pub fn fork(&self) -> Self {
        Self {
            enabled: self.enabled,
            filter: self.filter.clone(),
            stack: vec![TraceContext::new()],
            entries: Vec::new(),
        }
    }

    pub fn current_context(&self) -> &TraceContext {
        // 栈底永远存在
        &self.stack[self.stack.len() - 1]
    }

    pub fn push_context<K: Into<String>>(&mut self, pairs: impl IntoIterator<Item = (K, String)>) {
        let mut context = self.current_context().clone();
        for (key, value) in pairs {
            let key = key.into();
            match context.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => context.push((key, value)),
            }
        }
        self.stack.push(context);
    }

    pub fn pop_context(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// 在附加上下文中执行 f；关闭时不构造上下文
    pub fn with_context<R, C>(&mut self, context: C, f: impl FnOnce(&mut Self) -> R) -> R
    where
        C: FnOnce() -> Vec<(&'static str, String)>,
    {
        if !self.enabled {
            return f(self);
        }
        self.push_context(context());
        let result = f(self);
        self.pop_context();
        result
    }

    pub fn write(&mut self, message: impl FnOnce() -> String) {
        if !self.enabled {
            return;
        }
        let context = &self.stack[self.stack.len() - 1];
        if !self.filter.accepts(context) {
            return;
        }
        let message = message();
        log::trace!("{:?}: {}", context, preview_compact(&message, 200));
        self.entries.push(TraceEntry {
            message,
            context: context.clone(),
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn take_entries(&mut self) -> Vec<TraceEntry> {
        std::mem::take(&mut self.entries)
    }

    /// 合并另一实例（通常是 fork 出的分片）的日志
    pub fn absorb(&mut self, mut other: RuleTrace) {
        self.entries.append(&mut other.entries);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }
}
