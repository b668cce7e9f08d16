/// CLI utilities for consistent output formatting
use std::io::IsTerminal;

/// Get a colored prefix
///
/// Returns bright cyan if stderr is a TTY, plain text otherwise.
pub fn hoard_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        // Bright cyan for the entire prefix
        "\x1b[96m[hoard]\x1b[0m"
    } else {
        "[hoard]"
    }
}

/// Parse a command line value as JSON, keeping it as a string otherwise
pub fn parse_json_or_string(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_or_string() {
        assert_eq!(parse_json_or_string("42"), json!(42));
        assert_eq!(parse_json_or_string(r#"{"a":[1]}"#), json!({"a": [1]}));
        assert_eq!(parse_json_or_string("hello world"), json!("hello world"));
        assert_eq!(parse_json_or_string(r#""quoted""#), json!("quoted"));
    }
}
