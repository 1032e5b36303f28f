use chrono::Local;

/// `YYYY-MM-DD-HH-MM-SS`, local time — the timestamp embedded in every
/// snapshot name and written to `/etc/timestamp` inside the chroot.
pub fn generate_timestamp() -> String {
    Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// Validate that a string has the shape `generate_timestamp` produces.
/// Used by the test-boot verifier to sanity-check what it reads back over
/// ssh before comparing it to the expected value.
pub fn looks_like_timestamp(s: &str) -> bool {
    let re = regex_once();
    re.is_match(s.trim())
}

fn regex_once() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2}$").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_timestamp_matches_format() {
        let ts = generate_timestamp();
        assert!(looks_like_timestamp(&ts), "{ts} did not match format");
    }

    #[test]
    fn test_looks_like_timestamp() {
        assert!(looks_like_timestamp("2024-05-01-10-00-00"));
        assert!(!looks_like_timestamp("not-a-timestamp"));
        assert!(!looks_like_timestamp("2024-05-01"));
    }
}
