//! Discovery of the relay executable.
//!
//! The relay owns the child's console group and translates the named-event
//! protocol into real process control: it raises the ready event once the
//! target has started, delivers a console break to its group when the break
//! event is pulsed, and terminates itself and the target when the terminate
//! event is set.

use std::env;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::SpawnError;

/// Base name of the relay executable looked up on `PATH`.
pub const RELAY_BIN: &str = "winspawn-relay";

/// Environment variable overriding relay discovery with an explicit path.
pub const RELAY_ENV: &str = "WINSPAWN_RELAY";

/// Locates the relay: env override first, then `PATH`, then next to the
/// current executable.
pub fn find_relay() -> Result<PathBuf, SpawnError> {
    if let Ok(path) = env::var(RELAY_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            debug!("using relay from {RELAY_ENV}: {}", path.display());
            return Ok(path);
        }
        warn!(
            "{RELAY_ENV} points at {} which does not exist, falling back",
            path.display()
        );
    }

    if let Ok(path) = which::which(RELAY_BIN) {
        debug!("found relay on PATH: {}", path.display());
        return Ok(path);
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(format!("{RELAY_BIN}{}", env::consts::EXE_SUFFIX));
            if candidate.exists() {
                debug!("found relay next to executable: {}", candidate.display());
                return Ok(candidate);
            }
        }
    }

    Err(SpawnError::LaunchFailure(format!(
        "relay executable `{RELAY_BIN}` not found"
    )))
}
