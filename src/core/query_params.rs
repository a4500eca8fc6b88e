use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::core::errors::ApiError;

/// Parse query parameters from a URI string
///
/// Handles URL decoding and returns a HashMap of parameter key-value pairs.
/// Multiple values for the same key are not supported (only the last is kept).
///
/// # Example
/// ```
/// use quill::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/path?user=john&page=2");
/// assert_eq!(params.get("user"), Some(&"john".to_string()));
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    if let Some(query_start) = uri.find('?') {
        let query = &uri[query_start + 1..];
        for param in query.split('&').filter(|p| !p.is_empty()) {
            if let Some(eq_idx) = param.find('=') {
                let key = &param[..eq_idx];
                let encoded_value = param[eq_idx + 1..].replace('+', " ");
                let decoded = urlencoding::decode(&encoded_value)
                    .map(|v| v.into_owned())
                    .unwrap_or(encoded_value.clone());
                params.insert(key.to_string(), decoded);
            } else {
                // Flag parameter without value
                params.insert(param.to_string(), String::new());
            }
        }
    }

    params
}

/// Get a string parameter from parsed query params with optional default
pub fn get_string(params: &HashMap<String, String>, key: &str, default: Option<&str>) -> Option<String> {
    params
        .get(key)
        .cloned()
        .or_else(|| default.map(|d| d.to_string()))
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn parse_form<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_urlencoded::from_bytes(body).map_err(|e| ApiError::BadRequest(format!("Malformed form: {}", e)))
}

/// Split a `Cookie` header into name/value pairs.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Only local absolute paths are accepted as redirect targets. Browsers read
/// `\` as `/`, so `/\host` would leave the site just like `//host`.
pub fn safe_next(next: Option<String>) -> String {
    match next {
        Some(n) if is_local_path(&n) => n,
        _ => "/".to_string(),
    }
}

fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !matches!(target.chars().nth(1), Some('/' | '\\'))
        && !target.chars().any(|c| c == '\\' || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_query_values() {
        let params = parse_query_params("/auth/login/?next=%2Fnew%2F&page=3&flag");
        assert_eq!(get_string(&params, "next", None).as_deref(), Some("/new/"));
        assert_eq!(get_string(&params, "page", None).as_deref(), Some("3"));
        assert_eq!(get_string(&params, "flag", None).as_deref(), Some(""));
        assert_eq!(get_string(&params, "missing", Some("1")).as_deref(), Some("1"));
    }

    #[test]
    fn cookies_are_split() {
        let cookies = parse_cookies("a=1; quill_session=abc ;b=");
        assert_eq!(cookies.get("quill_session").map(String::as_str), Some("abc"));
        assert_eq!(cookies.get("b").map(String::as_str), Some(""));
    }

    #[test]
    fn next_must_be_local() {
        assert_eq!(safe_next(Some("/follow/".into())), "/follow/");
        assert_eq!(safe_next(Some("//evil.example".into())), "/");
        assert_eq!(safe_next(Some("https://evil.example".into())), "/");
        assert_eq!(safe_next(Some("/\\evil.example".into())), "/");
        assert_eq!(safe_next(Some("/follow/\\x".into())), "/");
        assert_eq!(safe_next(Some("/\t/evil.example".into())), "/");
        assert_eq!(safe_next(Some("/\r\nSet-Cookie: x=1".into())), "/");
        assert_eq!(safe_next(Some("follow/".into())), "/");
        assert_eq!(safe_next(None), "/");
    }
}
