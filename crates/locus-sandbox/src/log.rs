//! Execution log post-processing

use regex::Regex;
use std::sync::OnceLock;

/// Line printed by the run script right before the test runner starts
pub const TEST_MARKER: &str = "========== Running tests ==========";

const TAIL_AFTER_MARKER: usize = 50;
const TAIL_FALLBACK: usize = 30;

fn ansi_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").ok())
        .as_ref()
}

/// Remove ANSI escape sequences
#[must_use]
pub fn strip_ansi(text: &str) -> String {
    match ansi_pattern() {
        Some(pattern) => pattern.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Reduce a full container log to the test runner output
///
/// Keeps the last 50 lines after [`TEST_MARKER`], skipping leading blank
/// lines; without a marker keeps the last 30 lines overall.
#[must_use]
pub fn extract_test_output(full_log: &str) -> String {
    let clean = strip_ansi(full_log);
    let lines: Vec<&str> = clean.lines().collect();

    if let Some(marker) = lines.iter().rposition(|l| l.contains(TEST_MARKER)) {
        let after: Vec<&str> = lines[marker + 1..]
            .iter()
            .copied()
            .skip_while(|l| l.trim().is_empty())
            .collect();
        if !after.is_empty() {
            let start = after.len().saturating_sub(TAIL_AFTER_MARKER);
            return after[start..].join("\n");
        }
    }

    let start = lines.len().saturating_sub(TAIL_FALLBACK);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[32m✓ passes\x1b[0m"), "✓ passes");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn keeps_output_after_marker() {
        let log = format!("npm install\nadded 200 packages\n{TEST_MARKER}\n\n  API Tests\n    \x1b[31m1) fails\x1b[0m\n");
        assert_eq!(extract_test_output(&log), "  API Tests\n    1) fails");
    }

    #[test]
    fn tail_is_bounded() {
        let mut log = format!("{TEST_MARKER}\n");
        for i in 0..80 {
            log.push_str(&format!("line {i}\n"));
        }
        let out = extract_test_output(&log);
        assert_eq!(out.lines().count(), 50);
        assert!(out.starts_with("line 30"));
        assert!(out.ends_with("line 79"));
    }

    #[test]
    fn falls_back_to_last_lines() {
        let log: String = (0..40).map(|i| format!("boot {i}\n")).collect();
        let out = extract_test_output(&log);
        assert_eq!(out.lines().count(), 30);
        assert!(out.starts_with("boot 10"));
    }

    proptest::proptest! {
        #[test]
        fn prop_output_is_bounded_and_escape_free(
            lines in proptest::collection::vec(("[a-z ]{0,20}", 0u8..50), 0..120)
        ) {
            let log: Vec<String> = lines
                .iter()
                .map(|(text, color)| format!("\x1b[{color}m{text}\x1b[0m"))
                .collect();
            let out = extract_test_output(&log.join("\n"));
            proptest::prop_assert!(out.lines().count() <= TAIL_AFTER_MARKER);
            proptest::prop_assert!(!out.contains('\x1b'));
        }
    }
}
