//! Shared parsers for JSON patch fields. Errors are user-facing messages.

use serde_json::Value;

pub fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

/// `null` or a blank string clear the field.
pub fn parse_nullable_string(v: &Value, key: &str, max_len: usize) -> Result<Option<String>, String> {
    if v.is_null() {
        return Ok(None);
    }
    let s = parse_string_max(v, key, max_len)?;
    Ok(Some(s).filter(|s| !s.is_empty()))
}

pub fn parse_u64_range(v: &Value, key: &str, min: u64, max: u64) -> Result<u64, String> {
    let n = v
        .as_u64()
        .ok_or_else(|| format!("{} must be a non-negative integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_trimmed_and_bounded() {
        assert_eq!(parse_string_max(&json!("  An "), "name", 5), Ok("An".to_string()));
        assert!(parse_string_max(&json!("abcdef"), "name", 5).is_err());
        assert!(parse_string_max(&json!(3), "name", 5).is_err());
    }

    #[test]
    fn nullable_strings_clear_on_null_or_blank() {
        assert_eq!(parse_nullable_string(&json!(null), "code", 4), Ok(None));
        assert_eq!(parse_nullable_string(&json!("  "), "code", 4), Ok(None));
        assert_eq!(parse_nullable_string(&json!("Đ"), "code", 4), Ok(Some("Đ".to_string())));
    }

    #[test]
    fn integer_ranges_are_inclusive() {
        assert_eq!(parse_u64_range(&json!(50), "batchSize", 1, 50), Ok(50));
        assert!(parse_u64_range(&json!(0), "batchSize", 1, 50).is_err());
        assert!(parse_u64_range(&json!(-1), "batchSize", 1, 50).is_err());
    }
}
