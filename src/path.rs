//! Path validation and the longest-prefix matching used by every composite.
//!
//! Paths are slash-separated sequences of non-empty components. `.` denotes
//! the root of the enclosing filesystem. Absolute paths (leading `/`) and
//! `..` segments are never valid inside a filesystem; the core rejects them
//! at entry rather than asking every composite to sanitize separately.

use crate::error::{OpError, Result};

/// `p == "."`, or `p` is non-empty, has no `..`/empty segment, and neither
/// begins nor ends with `/`.
pub fn valid(p: &str) -> bool {
    if p == "." {
        return true;
    }
    if p.is_empty() || p.starts_with('/') || p.ends_with('/') {
        return false;
    }
    p.split('/').all(|seg| !seg.is_empty() && seg != "..")
}

pub fn check(op: &'static str, p: &str) -> Result<()> {
    if valid(p) {
        Ok(())
    } else {
        Err(OpError::invalid(op, p))
    }
}

/// The subset of `keys` that are prefix-directories of `name` (`k == name`
/// or `name` begins with `k + "/"`), ordered longest-first with a
/// lexicographic tie-break.
pub fn match_paths<'a, I>(keys: I, name: &str) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut matches: Vec<&str> = keys
        .into_iter()
        .filter(|k| is_prefix_dir(k, name))
        .collect();
    matches.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    matches
}

fn is_prefix_dir(k: &str, name: &str) -> bool {
    k == name || name.starts_with(&format!("{k}/"))
}

/// Standard path join: collapses `.` on either side, never produces a
/// trailing slash.
pub fn join(a: &str, b: &str) -> String {
    if a == "." {
        return b.to_string();
    }
    if b == "." {
        return a.to_string();
    }
    if a.is_empty() {
        return b.to_string();
    }
    if b.is_empty() {
        return a.to_string();
    }
    format!("{a}/{b}")
}

/// Removes `prefix` and any leading `/` from `name`, yielding the relative
/// portion. If the remainder is empty, returns `.`.
pub fn trim_prefix(name: &str, prefix: &str) -> String {
    if prefix == "." || prefix.is_empty() {
        return name.to_string();
    }
    let rest = name.strip_prefix(prefix).unwrap_or(name);
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    if rest.is_empty() {
        ".".to_string()
    } else {
        rest.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity() {
        assert!(valid("."));
        assert!(valid("a"));
        assert!(valid("a/b/c"));
        assert!(!valid(""));
        assert!(!valid("/a"));
        assert!(!valid("a/"));
        assert!(!valid("a//b"));
        assert!(!valid("a/../b"));
        assert!(!valid(".."));
    }

    #[test]
    fn longest_prefix_first_lexicographic_tiebreak() {
        let keys = vec!["web", "web/dom", "zzz"];
        let got = match_paths(keys, "web/dom/1/data");
        assert_eq!(got, vec!["web/dom", "web"]);

        let keys = vec!["a/b", "a/c"];
        let got = match_paths(keys, "a/b/x");
        assert_eq!(got, vec!["a/b"]);
    }

    #[test]
    fn join_collapses_dot() {
        assert_eq!(join(".", "x"), "x");
        assert_eq!(join("x", "."), "x");
        assert_eq!(join("a", "b"), "a/b");
    }

    #[test]
    fn trim_prefix_yields_relative_or_dot() {
        assert_eq!(trim_prefix("web/dom/1/data", "web/dom"), "1/data");
        assert_eq!(trim_prefix("web", "web"), ".");
        assert_eq!(trim_prefix("web/dom", "web/dom"), ".");
    }
}
