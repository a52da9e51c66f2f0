//! Script text transforms applied before code ever reaches the engine.
//!
//! Two call sites: the session manager joins `///` line continuations on
//! ad hoc selections before forwarding them; the worker wraps a
//! whole file with log-capture/seed/cwd directives before running it
//! (`EXECUTE_FILE`). Both live here because they operate on the
//! same continuation-line grammar.

use regex::Regex;
use std::sync::LazyLock;

/// Matches a line-continuation marker: `///` followed by anything (usually
/// a trailing comment), at the end of a line.
static CONTINUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"///.*$").unwrap());

/// Join `///`-continued lines into one logical line, the way the engine's
/// own parser does before tokenizing a command. A continuation marker and
/// anything after it on that line is dropped; the next line is appended
/// with a single joining space.
pub fn join_continuation_lines(code: &str) -> String {
    let mut joined = Vec::new();
    let mut pending: Option<String> = None;

    for raw_line in code.lines() {
        let trimmed_end = raw_line.trim_end();
        if let Some(m) = CONTINUATION.find(trimmed_end) {
            let head = trimmed_end[..m.start()].trim_end();
            let mut buf = pending.take().unwrap_or_default();
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(head);
            pending = Some(buf);
        } else {
            let mut buf = pending.take().unwrap_or_default();
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(trimmed_end);
            joined.push(buf);
        }
    }
    if let Some(buf) = pending {
        joined.push(buf);
    }
    joined.join("\n")
}

/// Comment out screen-clear directives (`cls`) so a non-interactive worker
/// never tries to touch a terminal that isn't there. Log open/close is left
/// alone here; `wrap_for_execution` handles that for whole-file runs.
pub fn neutralize_clear_directives(code: &str) -> String {
    code.lines()
        .map(|line| {
            if line.trim().eq_ignore_ascii_case("cls") {
                format!("* {line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Comment out the script's own log-open/close directives, since
/// `wrap_for_execution` installs its own, and a nested `log using` would
/// otherwise fail with "already open".
pub fn neutralize_log_directives(code: &str) -> String {
    code.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.to_ascii_lowercase().starts_with("log using")
                || trimmed.to_ascii_lowercase().starts_with("log close")
                || trimmed.to_ascii_lowercase().starts_with("capture log close")
            {
                format!("* {line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap a file's code with the directives `EXECUTE_FILE` needs around it:
/// close any stray logs, drop leftover programs, move to `working_dir`,
/// seed the RNG deterministically, and open the log this run's output will
/// be read back from (`EXECUTE_FILE`, using an absolute,
/// configuration-derived `log_file` rather than one relative to the
/// script's own directory).
pub fn wrap_for_execution(code: &str, log_file: &str, working_dir: &str, seed: u64) -> String {
    let neutralized = neutralize_log_directives(&neutralize_clear_directives(code));
    format!(
        "capture log close _all\ndiscard\ncd \"{working_dir}\"\nset seed {seed}\nlog using \"{log_file}\", replace text\n{neutralized}\ncapture log close _all\n"
    )
}
