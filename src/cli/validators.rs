//! CLI argument validators.

/// Parse a detector id. Ids become path segments in the model store, so only
/// ASCII alphanumerics, `_`, `-` and `.` are accepted.
pub fn parse_detector_id(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("detector id must not be empty".to_string());
    }
    if s == "." || s == ".." {
        return Err(format!("'{s}' is not a valid detector id"));
    }
    if let Some(c) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(format!("detector id contains invalid character '{c}'"));
    }
    Ok(s.to_string())
}

/// Parse a worker count (at least 1).
pub fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("worker count must be at least 1".to_string());
    }

    Ok(value)
}
