//! The control-file grammar: newline-delimited `VERB ARG…` commands
//! accepted by every task's `ctl` file.

use crate::error::{OpError, Result};
use crate::namespace::BindMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtlCommand {
    Bind {
        src: String,
        dst: String,
        mode: BindMode,
    },
    Unbind {
        src: String,
        dst: String,
    },
    Start,
    Kill {
        signal: String,
    },
}

/// Parses one line (already trimmed of its trailing newline). Unknown
/// verbs, or a known verb with the wrong argument count, fail `INVALID`.
pub fn parse_line(line: &str) -> Result<CtlCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["bind", src, dst] => Ok(CtlCommand::Bind {
            src: src.to_string(),
            dst: dst.to_string(),
            mode: BindMode::After,
        }),
        ["bind", src, dst, mode] => Ok(CtlCommand::Bind {
            src: src.to_string(),
            dst: dst.to_string(),
            mode: parse_mode(mode)?,
        }),
        ["unbind", src, dst] => Ok(CtlCommand::Unbind {
            src: src.to_string(),
            dst: dst.to_string(),
        }),
        ["start"] => Ok(CtlCommand::Start),
        ["kill", sig] => Ok(CtlCommand::Kill {
            signal: sig.to_string(),
        }),
        _ => Err(OpError::invalid("ctl", line)),
    }
}

fn parse_mode(s: &str) -> Result<BindMode> {
    match s {
        "after" => Ok(BindMode::After),
        "before" => Ok(BindMode::Before),
        "replace" => Ok(BindMode::Replace),
        _ => Err(OpError::invalid("ctl", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bind_with_default_mode() {
        let cmd = parse_line("bind a b").unwrap();
        assert_eq!(
            cmd,
            CtlCommand::Bind {
                src: "a".into(),
                dst: "b".into(),
                mode: BindMode::After,
            }
        );
    }

    #[test]
    fn parses_bind_with_explicit_mode() {
        let cmd = parse_line("bind a b replace").unwrap();
        assert_eq!(
            cmd,
            CtlCommand::Bind {
                src: "a".into(),
                dst: "b".into(),
                mode: BindMode::Replace,
            }
        );
    }

    #[test]
    fn parses_start_and_kill() {
        assert_eq!(parse_line("start").unwrap(), CtlCommand::Start);
        assert_eq!(
            parse_line("kill TERM").unwrap(),
            CtlCommand::Kill {
                signal: "TERM".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse_line("frobnicate x").is_err());
    }
}
