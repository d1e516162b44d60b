//! The seam between the process-control plane and the operating system.
//!
//! The registry, orchestrator, dispatcher and watcher are written against
//! these traits; the one production implementation is the Win32 backend in
//! [`crate::os::windows`]. Tests drive the same plane through a scripted
//! platform.

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

/// A named, manual-reset synchronization event shared with the relay.
///
/// Clones refer to the same underlying object; the object is destroyed when
/// the last clone is dropped.
pub trait SignalEvent: Clone + Send + Sync + 'static {
    /// Raises the event and leaves it raised.
    fn set(&self);
    /// Lowers the event.
    fn reset(&self);
    /// Momentarily raises the event, waking only current waiters.
    fn pulse(&self);
    /// Waits up to `timeout` for the event to be raised or pulsed.
    fn wait_timeout(&self, timeout: Duration) -> bool;
}

/// A handle to a spawned or opened OS process.
pub trait ChildProcess: Clone + Send + Sync + 'static {
    fn pid(&self) -> u32;
    /// Non-blocking liveness poll.
    fn alive(&self) -> bool;
    /// Blocks until the process exits and returns its exit code.
    fn wait(&self) -> i32;
}

/// Outcome of the launch-confirmation race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The relay raised the ready event: the real target is running.
    Confirmed,
    /// The relay exited without confirming.
    ChildExited,
}

/// Caller-side endpoints of the three standard-stream pipes.
pub struct ChildStdio<P: Platform> {
    pub stdin: P::Stdin,
    pub stdout: P::Stdout,
    pub stderr: P::Stderr,
}

/// Operating-system operations the control plane needs.
pub trait Platform: Sized + Send + Sync + 'static {
    type Event: SignalEvent;
    type Process: ChildProcess;
    type Stdin: Write + Send + 'static;
    type Stdout: Read + Send + 'static;
    type Stderr: Read + Send + 'static;

    /// Creates a named event. Fails if the name is already in use; event
    /// names are unique per live record, so a collision is a bug.
    fn create_event(&self, name: &str) -> io::Result<Self::Event>;

    /// Spawns the assembled command line with the child's standard streams
    /// bound to fresh pipes, a hidden window, and the child detached into
    /// its own console group. Returns the process and the caller-side pipe
    /// endpoints; the child-side endpoints are closed in the parent before
    /// this returns.
    fn spawn(
        &self,
        cmdline: &str,
        env_block: Option<&str>,
        dir: Option<&Path>,
    ) -> io::Result<(Self::Process, ChildStdio<Self>)>;

    /// Spawns the assembled command line detached, with no pipes and no
    /// relay involvement.
    fn spawn_plain(
        &self,
        cmdline: &str,
        env_block: Option<&str>,
        dir: Option<&Path>,
    ) -> io::Result<Self::Process>;

    /// Opens a fresh handle to a process by OS pid. `None` if the OS
    /// refuses, meaning the process is already gone.
    fn open_process(&self, pid: u32) -> Option<Self::Process>;

    /// Blocks without timeout until either the ready event is raised or the
    /// relay exits, whichever happens first. Confirmation wins ties.
    fn await_confirmation(&self, ready: &Self::Event, child: &Self::Process) -> Handshake;
}
