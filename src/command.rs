//! Command-line and environment-block assembly for relay launches.
//!
//! Tokens are copied verbatim and space-joined; the relay splits its tail
//! back on single spaces, so no quoting layer exists on either side. Both
//! buffers have fixed byte budgets and overflow is a launch failure, not a
//! truncation.

use std::path::Path;

use tracing::debug;

use crate::error::SpawnError;
use crate::registry::SignalNames;

/// Byte budget for an assembled command line.
pub const MAX_CMD_LEN: usize = 1024;

/// Byte budget for an assembled environment block, including the
/// terminating NUL the spawn backend appends.
pub const MAX_ENV_LEN: usize = 4096;

/// Builds the relay invocation: relay path, the three event names, then the
/// caller's tokens verbatim.
pub(crate) fn relay_command_line(
    relay: &Path,
    names: &SignalNames,
    argv: &[String],
) -> Result<String, SpawnError> {
    let mut line = String::new();
    push_token(&mut line, &relay.display().to_string())?;
    push_token(&mut line, &names.break_name)?;
    push_token(&mut line, &names.ready_name)?;
    push_token(&mut line, &names.terminate_name)?;
    for token in argv {
        push_token(&mut line, token)?;
    }
    debug!("assembled command line: {line}");
    Ok(line)
}

/// Builds a plain invocation with no relay prefix, for detached launches.
pub(crate) fn plain_command_line(argv: &[String]) -> Result<String, SpawnError> {
    let mut line = String::new();
    for token in argv {
        push_token(&mut line, token)?;
    }
    Ok(line)
}

fn push_token(line: &mut String, token: &str) -> Result<(), SpawnError> {
    let needed = if line.is_empty() {
        token.len()
    } else {
        token.len() + 1
    };
    if line.len() + needed > MAX_CMD_LEN {
        return Err(SpawnError::LaunchFailure("command line too long".into()));
    }
    if !line.is_empty() {
        line.push(' ');
    }
    line.push_str(token);
    Ok(())
}

/// Joins `NAME=value` entries into a NUL-separated block. An empty slice
/// means the child inherits the caller's environment. One byte of the
/// budget is reserved for the block-terminating NUL appended at spawn time.
pub(crate) fn environment_block(env: &[String]) -> Result<Option<String>, SpawnError> {
    if env.is_empty() {
        return Ok(None);
    }
    let mut block = String::new();
    for entry in env {
        if block.len() + entry.len() + 1 > MAX_ENV_LEN - 1 {
            return Err(SpawnError::LaunchFailure(
                "too many environment variables".into(),
            ));
        }
        block.push_str(entry);
        block.push('\0');
    }
    Ok(Some(block))
}
