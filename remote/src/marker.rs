//! Sentinel-line framing so a remote command's real output can be
//! separated from SSH banners, MOTD noise, or shell-profile chatter
//! written to stdout before our command ever runs.
//!
//! The wrapped command echoes a random begin marker, runs, then echoes
//! a random end marker; only the slice strictly between them is ours.

const BEGIN_TAG: &str = "__BISYNC_BEGIN__";
const END_TAG: &str = "__BISYNC_END__";

/// A fresh per-invocation token, unlikely to appear in real command
/// output by chance.
pub fn random_token() -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Wrap `command` so its stdout is bracketed by begin/end sentinel
/// lines. `token` should be unique per invocation (a few bytes of
/// randomness) so a banner can never coincidentally reproduce it.
pub fn wrap(command: &str, token: &str) -> String {
    let begin = format!("{BEGIN_TAG}{token}");
    let end = format!("{END_TAG}{token}");
    format!("echo {begin}; {command}; echo {end}")
}

/// Extract the framed slice from raw stdout. Returns an empty string if
/// the begin marker never appears (command never ran, or the shell
/// failed before reaching it).
pub fn extract<'a>(raw_stdout: &'a str, token: &str) -> &'a str {
    let begin = format!("{BEGIN_TAG}{token}");
    let end = format!("{END_TAG}{token}");
    let Some(begin_at) = raw_stdout.find(&begin) else {
        return "";
    };
    let after_begin = begin_at + begin.len();
    let rest = &raw_stdout[after_begin..];
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    match rest.find(&end) {
        Some(end_at) => rest[..end_at].trim_end_matches('\n'),
        None => rest.trim_end_matches('\n'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_and_extracts_simple_output() {
        let wrapped = wrap("printf 'hello\\n'", "abc123");
        assert!(wrapped.contains("__BISYNC_BEGIN__abc123"));
        assert!(wrapped.contains("__BISYNC_END__abc123"));
    }

    #[test]
    fn extracts_only_framed_slice() {
        let raw = "Warning: unknown host\n__BISYNC_BEGIN__tok\nactual output\nmore output\n__BISYNC_END__tok\nLogout\n";
        assert_eq!(extract(raw, "tok"), "actual output\nmore output");
    }

    #[test]
    fn missing_begin_marker_yields_empty() {
        let raw = "connection refused\n";
        assert_eq!(extract(raw, "tok"), "");
    }

    #[test]
    fn missing_end_marker_takes_rest_of_output() {
        let raw = "__BISYNC_BEGIN__tok\npartial\n";
        assert_eq!(extract(raw, "tok"), "partial");
    }

    #[test]
    fn distinct_tokens_do_not_cross_match() {
        let raw = "__BISYNC_BEGIN__aaa\nwrong command\n__BISYNC_END__aaa\n";
        assert_eq!(extract(raw, "bbb"), "");
    }
}
