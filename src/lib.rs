//! Child-process launcher with emulated POSIX signals for Windows.
//!
//! Windows has no signal delivery, so every child is started through a
//! cooperating relay executable that owns the child's console group and
//! translates three named synchronization events into real process
//! control: a pulsed break event becomes a console interrupt, a raised
//! terminate event brings the relay and its child down, and the relay
//! raises a ready event once the real target is running. That ready event
//! doubles as the launch-confirmation handshake: process creation alone
//! does not prove the intended program ran.
//!
//! Each launched child is tracked in a fixed-capacity registry under a
//! stable 32-bit handle distinct from the OS pid, and its standard streams
//! are redirected through pipes returned to the caller.
//!
//! ```no_run
//! use winspawn::{Signal, Spawner};
//!
//! # #[cfg(windows)]
//! # fn demo() -> Result<(), winspawn::SpawnError> {
//! let spawner = winspawn::global();
//! let launched = spawner.launch(
//!     &["my-tool.exe".into(), "--verbose".into()],
//!     &[],
//!     None,
//! )?;
//! spawner.raise(launched.id, Signal::Interrupt)?;
//! let code = spawner.wait_for(launched.id)?;
//! # Ok(())
//! # }
//! ```

mod command;
mod error;
mod platform;
mod registry;
mod signal;
mod spawner;
mod watcher;

pub mod relay;

#[cfg(windows)]
pub mod os;

#[cfg(test)]
pub(crate) mod sim;

pub use command::{MAX_CMD_LEN, MAX_ENV_LEN};
pub use error::SpawnError;
pub use platform::{ChildProcess, ChildStdio, Handshake, Platform, SignalEvent};
pub use registry::{ExternalId, ProcessInfo, ProcessRegistry, SignalNames, SignalSet, MAX_TRACKED};
pub use signal::Signal;
pub use spawner::{Launched, Spawner, INTERRUPT_ACK_TIMEOUT};

#[cfg(windows)]
pub use os::windows::WindowsPlatform;
#[cfg(windows)]
pub use spawner::global;
