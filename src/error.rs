use thiserror::Error;

/// Failure kinds surfaced by the process-control operations.
///
/// Every failure is local to the operation that detected it and leaves the
/// registry rolled back; the caller may simply retry. An interrupt that is
/// not acknowledged in time is *not* an error (see [`Spawner::raise`]).
///
/// [`Spawner::raise`]: crate::Spawner::raise
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The registry already tracks the maximum number of live processes.
    /// No process was spawned.
    #[error("too many processes")]
    ResourceExhausted,

    /// Spawning the relay failed, a command or environment buffer budget
    /// overflowed, or the relay exited before confirming the launch.
    #[error("launch failed: {0}")]
    LaunchFailure(String),

    /// No live record exists for the given handle, or the OS refused to
    /// open the underlying process (it is already gone).
    #[error("unknown process handle")]
    NotFound,
}
