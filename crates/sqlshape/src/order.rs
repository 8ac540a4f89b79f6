//! Best-effort `ORDER BY` column extraction.
//!
//! This is a pattern match over the tail of a statement, not a SQL parser. Anything
//! it does not recognise yields an empty list.

use regex::Regex;
use std::sync::OnceLock;

const IDENT: &str = r#"(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_$]*(?:\.[A-Za-z_][A-Za-z0-9_$]*)*)"#;

/// Trailing text allowed between the `ORDER BY` list and the end of the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderSuffix {
    /// Matched literally (case-insensitive).
    Literal(String),
    /// A regular expression fragment (case-insensitive).
    Pattern(String),
}

impl OrderSuffix {
    fn fragment(&self) -> String {
        match self {
            OrderSuffix::Literal(text) => regex::escape(text),
            OrderSuffix::Pattern(pattern) => pattern.clone(),
        }
    }
}

impl From<&str> for OrderSuffix {
    fn from(text: &str) -> Self {
        OrderSuffix::Literal(text.to_string())
    }
}

impl From<String> for OrderSuffix {
    fn from(text: String) -> Self {
        OrderSuffix::Literal(text)
    }
}

fn build_pattern(suffix: Option<&str>) -> String {
    let item = format!(r"{IDENT}(?:\s+(?:ASC|DESC)\b)?");
    let suffix = suffix.map(|s| format!(r"(?:{s})?\s*")).unwrap_or_default();
    format!(r"(?is)\bORDER\s+BY\s+({item}(?:\s*,\s*{item})*)\s*{suffix};?\s*\z")
}

fn default_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&build_pattern(None)).expect("invalid built-in ORDER BY regex"))
}

fn item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^\s*({IDENT})")).expect("invalid built-in ORDER BY item regex")
    })
}

/// Extract the column names of a trailing `ORDER BY` clause.
///
/// Direction keywords are dropped. A suffix (e.g. `LIMIT \d+` or `FETCH 2 ROWS`) may
/// follow the list; it is optional and matched case-insensitively. An invalid suffix
/// pattern falls back to a literal match.
///
/// ```
/// use sqlshape::extract_order_columns;
///
/// assert_eq!(extract_order_columns("SELECT * FROM t ORDER BY a DESC, b", None), vec!["a", "b"]);
/// assert!(extract_order_columns("SELECT * FROM t", None).is_empty());
/// ```
pub fn extract_order_columns(sql: &str, suffix: Option<&OrderSuffix>) -> Vec<String> {
    let custom;
    let re = match suffix {
        None => default_regex(),
        Some(suffix) => {
            custom = Regex::new(&build_pattern(Some(&suffix.fragment()))).or_else(|e| {
                tracing::debug!(target: "sqlshape.sql", error = %e, "invalid ORDER BY suffix pattern, matching literally");
                let literal = match suffix {
                    OrderSuffix::Literal(text) | OrderSuffix::Pattern(text) => regex::escape(text),
                };
                Regex::new(&build_pattern(Some(&literal)))
            });
            match &custom {
                Ok(re) => re,
                Err(_) => return Vec::new(),
            }
        }
    };

    let Some(list) = re.captures(sql).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };

    list.as_str()
        .split(',')
        .filter_map(|item| {
            item_regex()
                .captures(item)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim_matches('"').to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(sql: &str) -> Vec<String> {
        extract_order_columns(sql, None)
    }

    #[test]
    fn extracts_plain_list() {
        assert_eq!(cols("SELECT * FROM t ORDER BY a, b"), vec!["a", "b"]);
    }

    #[test]
    fn strips_direction() {
        assert_eq!(cols("SELECT * FROM t ORDER BY a DESC, b"), vec!["a", "b"]);
        assert_eq!(cols("select * from t order by a asc, b desc;"), vec!["a", "b"]);
    }

    #[test]
    fn no_order_by_is_empty() {
        assert!(cols("SELECT * FROM t").is_empty());
    }

    #[test]
    fn keeps_qualified_and_quoted_names() {
        assert_eq!(
            cols("SELECT * FROM t JOIN u ON t.id = u.id ORDER BY t.id, \"Name\""),
            vec!["t.id", "Name"]
        );
    }

    #[test]
    fn trailing_text_without_suffix_breaks_match() {
        assert!(cols("SELECT * FROM t ORDER BY a LIMIT 10").is_empty());
    }

    #[test]
    fn literal_suffix_is_optional_and_anchored() {
        let suffix = OrderSuffix::from("FETCH 2 ROWS");
        let extract = |sql: &str| extract_order_columns(sql, Some(&suffix));

        assert_eq!(extract("SELECT * FROM t ORDER BY a FETCH 2 ROWS"), vec!["a"]);
        assert_eq!(extract("SELECT * FROM t ORDER BY a FETCH 2 ROWS;"), vec!["a"]);
        assert_eq!(extract("SELECT * FROM t ORDER BY a fetch 2 rows"), vec!["a"]);
        assert_eq!(extract("SELECT * FROM t ORDER BY a"), vec!["a"]);
        assert!(extract("SELECT * FROM t ORDER BY a FETCH 2 ROWS extra").is_empty());
    }

    #[test]
    fn pattern_suffix() {
        let suffix = OrderSuffix::Pattern(r"LIMIT\s+\d+".to_string());
        assert_eq!(
            extract_order_columns("SELECT * FROM t ORDER BY a, b DESC LIMIT 25", Some(&suffix)),
            vec!["a", "b"]
        );
    }

    #[test]
    fn malformed_pattern_does_not_fail() {
        let suffix = OrderSuffix::Pattern("LIMIT (".to_string());
        assert_eq!(
            extract_order_columns("SELECT * FROM t ORDER BY a LIMIT (", Some(&suffix)),
            vec!["a"]
        );
        assert!(extract_order_columns("ORDER BY", Some(&suffix)).is_empty());
    }
}
