//! Log hygiene helpers
//!
//! Sheetstore emits `tracing` events but never logs secrets:
//! - Session identifiers are bearer tokens; only a short prefix is logged
//! - User-supplied names are escaped so they cannot forge log lines
//!
//! Installing a subscriber is left to the binary (see `sheetstore-cli`).

/// Characters of a session identifier kept in log output.
const SESSION_PREFIX_LEN: usize = 4;

/// Shorten a session identifier for logging.
///
/// ```rust
/// use sheetstore::logging::redact_session_id;
///
/// assert_eq!(redact_session_id("Ab3dEf9hIj"), "Ab3d…");
/// ```
pub fn redact_session_id(id: &str) -> String {
    let prefix: String = id.chars().take(SESSION_PREFIX_LEN).collect();
    format!("{prefix}…")
}

/// Escape control characters so user-supplied values cannot inject log lines.
pub fn sanitize_for_log(input: &str) -> String {
    input
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_redaction() {
        let redacted = redact_session_id("k3J9aQzLm2Xc8VbN7tRw1YpE5uHd0sFg");
        assert_eq!(redacted, "k3J9…");
        assert_eq!(redact_session_id("ab"), "ab…");
    }

    #[test]
    fn test_log_injection_prevention() {
        let malicious = "alice\n[ERROR] fake log entry";
        let sanitized = sanitize_for_log(malicious);
        assert!(!sanitized.contains('\n'));
        assert!(sanitized.contains("\\n"));
    }
}
