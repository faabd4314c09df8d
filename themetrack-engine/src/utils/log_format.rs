use std::fmt::{self, Write};

// ======================== 核心：零堆分配字符串格式化========================
/// 空白字符折叠 + 截断 - 零堆分配的日志预览核心函数
/// 单元格值、规则模板等可能很长的字符串写日志前统一走这里
#[inline(always)]
pub fn preview_compact<'a>(s: &'a str, max_len: usize) -> impl fmt::Display + 'a {
    struct CompactView<'a> {
        source: &'a str,
        max_length: usize,
    }

    impl<'a> fmt::Display for CompactView<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let mut char_count = 0;
            let mut last_was_whitespace = false;

            for ch in self.source.chars() {
                if char_count >= self.max_length {
                    f.write_str("…")?;
                    break;
                }

                if ch.is_whitespace() {
                    if !last_was_whitespace {
                        f.write_str(" ")?;
                        char_count += 1;
                        last_was_whitespace = true;
                    }
                } else {
                    f.write_char(ch)?;
                    char_count += 1;
                    last_was_whitespace = false;
                }
            }
            Ok(())
        }
    }

    CompactView {
        source: s,
        max_length: max_len,
    }
}

// ======================== 衍生：列名集合日志格式化 ========================
/// 列名集合日志格式化，格式：[col1, col2, ...] (total: N)
pub fn compress_column_list<'a, I>(columns: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    const MAX_COUNT: usize = 10; // 最多显示10个列名
    const MAX_NAME_LEN: usize = 30; // 每个列名最多30字符

    let mut result = String::from("[");
    let mut total_count = 0;
    for (idx, column) in columns.into_iter().enumerate() {
        total_count += 1;
        if idx >= MAX_COUNT {
            continue;
        }
        if idx > 0 {
            result.push_str(", ");
        }
        let _ = write!(result, "{}", preview_compact(column, MAX_NAME_LEN));
    }

    if total_count == 0 {
        return "[empty]".to_string();
    }
    if total_count > MAX_COUNT {
        let _ = write!(result, "… (total: {})", total_count);
    }
    result.push(']');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_collapses_whitespace_and_truncates() {
        assert_eq!(preview_compact("a  b\n\tc", 10).to_string(), "a b c");
        assert_eq!(preview_compact("abcdef", 3).to_string(), "abc…");
        assert_eq!(preview_compact("abc", 3).to_string(), "abc");
    }

    #[test]
    fn test_compress_column_list() {
        assert_eq!(compress_column_list(Vec::<&str>::new()), "[empty]");
        assert_eq!(compress_column_list(["Ticker", "Exchange"]), "[Ticker, Exchange]");
        let many: Vec<String> = (0..12).map(|i| format!("c{i}")).collect();
        let out = compress_column_list(many.iter().map(String::as_str));
        assert!(out.ends_with("… (total: 12)]"));
    }
}
