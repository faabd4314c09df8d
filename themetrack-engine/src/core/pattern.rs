use std::fmt::Write;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;

use super::condition::Bindings;

/// 正则值前缀：其后内容本身就是正则
pub const REGEX_VALUE_PREFIX: &str = "r:";
/// 多值替换前缀：m:A,B,C → r:A|B|C
pub const MULTI_VALUE_PREFIX: &str = "m:";

/// 匹配值中的变量占位符：${name} 或 ${name:regex}
static VAR_DECL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([a-zA-Z0-9 _-]+)(?::([^}]+))?\}").unwrap());

/// 替换模板中的变量引用：${name}
static VAR_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([a-zA-Z0-9 _-]+)\}").unwrap());

/// 匹配值解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Literal(String),
    Pattern(CellPattern),
}

/// 编译后的单元格正则
/// - 两端锚定
/// - 变量按顺序编译为内部命名分组 __v0/__v1...，与用户自己写的匿名分组互不干扰
#[derive(Debug, Clone)]
pub struct CellPattern {
    /// 锚定前的正则源码
    source: String,
    regex: Arc<Regex>,
    /// (内部分组名, 变量名)
    groups: Vec<(String, String)>,
}

impl PartialEq for CellPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.groups == other.groups
    }
}

impl CellPattern {
    /// 解析单元格中的匹配值；无 r: 前缀且无变量时返回 Literal
    /// 含变量时占位符之间的文本同样按正则处理
    pub fn from_cell_value(value: &str) -> Result<ConditionValue, PatternError> {
        Self::from_cell_value_cached(value, &mut PatternCache::default())
    }

    pub(crate) fn from_cell_value_cached(
        value: &str,
        cache: &mut PatternCache,
    ) -> Result<ConditionValue, PatternError> {
        let (is_regex, body) = match value.strip_prefix(REGEX_VALUE_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, value),
        };

        let mut source = String::with_capacity(body.len() + 16);
        let mut groups = Vec::new();
        let mut last_end = 0;

        for caps in VAR_DECL_PATTERN.captures_iter(body) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            source.push_str(&body[last_end..whole.start()]);

            let group_name = format!("__v{}", groups.len());
            let sub_pattern = caps.get(2).map_or(".*", |m| m.as_str());
            // 写入String不会失败
            let _ = write!(source, "(?P<{}>{})", group_name, sub_pattern);
            groups.push((group_name, name.as_str().to_string()));
            last_end = whole.end();
        }
        source.push_str(&body[last_end..]);

        if groups.is_empty() && !is_regex {
            return Ok(ConditionValue::Literal(value.to_string()));
        }

        let regex = cache.compile(&source)?;
        Ok(ConditionValue::Pattern(CellPattern {
            source,
            regex,
            groups,
        }))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(_, var)| var.as_str())
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// 匹配成功时返回变量绑定；未参与匹配的分组绑定为空串
    pub fn captures(&self, text: &str) -> Option<Bindings> {
        let caps = self.regex.captures(text)?;
        let mut bindings = Bindings::default();
        for (group, var) in &self.groups {
            let value = caps.name(group).map_or("", |m| m.as_str());
            bindings.insert(var.clone(), value.to_string());
        }
        Some(bindings)
    }
}

/// 正则编译失败
#[derive(Debug)]
pub struct PatternError {
    pub pattern: String,
    pub source: regex::Error,
}

/// 解析期正则缓存：相同源码只编译一次，编译结果在条件之间共享
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: FxHashMap<String, Arc<Regex>>,
}

impl PatternCache {
    fn compile(&mut self, source: &str) -> Result<Arc<Regex>, PatternError> {
        if let Some(re) = self.compiled.get(source) {
            return Ok(re.clone());
        }
        let anchored = format!("^(?:{})$", source);
        let re = Regex::new(&anchored).map_err(|e| PatternError {
            pattern: source.to_string(),
            source: e,
        })?;
        let re = Arc::new(re);
        self.compiled.insert(source.to_string(), re.clone());
        Ok(re)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }
}

/// 替换模板变量代入；未绑定的 ${var} 原样保留
pub fn substitute_vars<'a>(template: &'a str, bindings: &Bindings) -> std::borrow::Cow<'a, str> {
    if !template.contains("${") {
        return std::borrow::Cow::Borrowed(template);
    }
    VAR_REF_PATTERN.replace_all(template, |caps: &regex::Captures| {
        match bindings.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        }
    })
}

/// m:v1,v2,... → r:v1|v2|...（至少一个逗号才改写），各值按字面量转义
pub fn expand_multi_value(value: &str) -> std::borrow::Cow<'_, str> {
    match value.strip_prefix(MULTI_VALUE_PREFIX) {
        Some(rest) if rest.contains(',') => {
            let alternation: Vec<String> = rest.split(',').map(regex::escape).collect();
            std::borrow::Cow::Owned(format!("{}{}", REGEX_VALUE_PREFIX, alternation.join("|")))
        }
        _ => std::borrow::Cow::Borrowed(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(value: &str) -> CellPattern {
        match CellPattern::from_cell_value(value).unwrap() {
            ConditionValue::Pattern(p) => p,
            ConditionValue::Literal(l) => panic!("expected pattern, got literal {l}"),
        }
    }

    #[test]
    fn test_plain_value_is_literal() {
        assert_eq!(
            CellPattern::from_cell_value("NYSE").unwrap(),
            ConditionValue::Literal("NYSE".to_string())
        );
    }

    #[test]
    fn test_market_ticker_captures() {
        let p = pattern("${market}:${ticker}");
        assert_eq!(p.source(), "(?P<__v0>.*):(?P<__v1>.*)");
        let b = p.captures("ASX:FOO").unwrap();
        assert_eq!(b["market"], "ASX");
        assert_eq!(b["ticker"], "FOO");
        assert!(p.captures("ASXFOO").is_none());
    }

    #[test]
    fn test_explicit_sub_pattern() {
        let p = pattern(r"${ticker:[A-Z]+}\.AX");
        assert_eq!(p.captures("BHP.AX").unwrap()["ticker"], "BHP");
        assert!(p.captures("BHPXAX").is_none());
        assert!(p.captures("bhp.AX").is_none());
    }

    #[test]
    fn test_text_between_placeholders_is_regex() {
        let p = pattern(r"${t:[A-Z]+}(\.AX)?");
        assert_eq!(p.captures("BHP.AX").unwrap()["t"], "BHP");
        assert_eq!(p.captures("BHP").unwrap()["t"], "BHP");

        // 未加 r: 前缀时 . 也是正则元字符
        let p = pattern("${ticker:[A-Z]+}.AX");
        assert!(p.captures("BHPXAX").is_some());
    }

    #[test]
    fn test_regex_prefix_is_anchored() {
        let p = pattern("r:A|B|C");
        assert!(p.is_match("A"));
        assert!(p.is_match("C"));
        assert!(!p.is_match("AB"));
        assert!(!p.is_match("xA"));
        assert_eq!(p.var_names().count(), 0);
    }

    #[test]
    fn test_unnamed_groups_do_not_shift_bindings() {
        let p = pattern(r"r:(\w+)-${suffix}");
        let b = p.captures("abc-XYZ").unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b["suffix"], "XYZ");
    }

    #[test]
    fn test_var_names_with_spaces() {
        let p = pattern("${pick name}/${x}");
        let b = p.captures("Total/1").unwrap();
        assert_eq!(b["pick name"], "Total");
        assert_eq!(b["x"], "1");
    }

    #[test]
    fn test_optional_group_binds_empty() {
        let p = pattern(r"r:${a:\w+}(?:-${b:\w+})?");
        let b = p.captures("foo").unwrap();
        assert_eq!(b["a"], "foo");
        assert_eq!(b["b"], "");
    }

    #[test]
    fn test_invalid_regex_reports_source() {
        let err = CellPattern::from_cell_value("r:(unclosed").unwrap_err();
        assert_eq!(err.pattern, "(unclosed");
    }

    #[test]
    fn test_cache_shares_compiled_regex() {
        let mut cache = PatternCache::default();
        CellPattern::from_cell_value_cached("${a}:${b}", &mut cache).unwrap();
        CellPattern::from_cell_value_cached("${x}:${y}", &mut cache).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_substitute_vars() {
        let mut b = Bindings::default();
        b.insert("ticker".into(), "FOO".into());
        assert_eq!(substitute_vars("${ticker}", &b), "FOO");
        assert_eq!(substitute_vars("X-${ticker}-${missing}", &b), "X-FOO-${missing}");
        assert_eq!(substitute_vars("plain", &b), "plain");
    }

    #[test]
    fn test_expand_multi_value() {
        assert_eq!(expand_multi_value("m:A,B,C"), "r:A|B|C");
        assert_eq!(expand_multi_value("m:A"), "m:A");
        assert_eq!(expand_multi_value("m:A.B,C"), r"r:A\.B|C");
        assert_eq!(expand_multi_value("NYSE"), "NYSE");
    }

    #[test]
    fn test_multi_value_consumed_as_pattern() {
        let stored = expand_multi_value("m:A,B,C");
        let p = pattern(&stored);
        assert!(p.is_match("A") && p.is_match("B") && p.is_match("C"));
        assert!(!p.is_match("D"));
    }
}
