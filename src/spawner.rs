//! The process-control plane: launch orchestration, signal dispatch, and
//! wait-for-exit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::command;
use crate::error::SpawnError;
use crate::platform::{ChildProcess, Handshake, Platform, SignalEvent};
use crate::registry::{ExternalId, ProcessInfo, ProcessRegistry, SignalNames, SignalSet};
use crate::relay;
use crate::signal::Signal;
use crate::watcher;

/// How long an interrupt waits for the relay's acknowledgment before
/// reporting a negative result.
pub const INTERRUPT_ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// A successfully launched process: its external handle plus the
/// caller-side endpoints of the three standard-stream pipes.
pub struct Launched<P: Platform> {
    pub id: ExternalId,
    pub stdin: P::Stdin,
    pub stdout: P::Stdout,
    pub stderr: P::Stderr,
}

impl<P: Platform> std::fmt::Debug for Launched<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launched")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Launches child processes through the relay and controls them afterwards.
///
/// Owns the registry of tracked processes for its own lifetime; external
/// handles are meaningful only against the spawner that issued them.
pub struct Spawner<P: Platform> {
    platform: Arc<P>,
    registry: Arc<ProcessRegistry<P::Event>>,
    relay: PathBuf,
}

impl<P: Platform> Spawner<P> {
    /// Creates a spawner, locating the relay executable via
    /// [`relay::find_relay`]. Fails if no relay can be found.
    pub fn new(platform: P) -> Result<Self, SpawnError> {
        let relay = relay::find_relay()?;
        Ok(Self::with_relay(platform, relay))
    }

    /// Creates a spawner with an explicit relay path.
    pub fn with_relay(platform: P, relay: impl Into<PathBuf>) -> Self {
        Spawner {
            platform: Arc::new(platform),
            registry: Arc::new(ProcessRegistry::new()),
            relay: relay.into(),
        }
    }

    /// Launches `argv` through the relay with piped standard streams.
    ///
    /// `env` holds `NAME=value` assignments, empty meaning the child
    /// inherits the caller's environment. Returns once the relay confirms
    /// the target is running; a relay that exits without confirming is a
    /// launch failure. Every failure path releases the reserved registry
    /// slot before returning.
    pub fn launch(
        &self,
        argv: &[String],
        env: &[String],
        dir: Option<&Path>,
    ) -> Result<Launched<P>, SpawnError> {
        if argv.is_empty() {
            return Err(SpawnError::LaunchFailure("no command specified".into()));
        }

        // Reserve the slot first: its external id seeds the event names.
        let id = self.registry.allocate()?;
        let names = SignalNames::derive(id);

        let events = match self.create_events(&names) {
            Ok(events) => events,
            Err(err) => {
                self.registry.release(id);
                return Err(SpawnError::LaunchFailure(format!(
                    "creating signal events: {err}"
                )));
            }
        };
        self.registry.attach(id, events.clone());

        let cmdline = match command::relay_command_line(&self.relay, &names, argv) {
            Ok(line) => line,
            Err(err) => {
                self.registry.release(id);
                return Err(err);
            }
        };
        let env_block = match command::environment_block(env) {
            Ok(block) => block,
            Err(err) => {
                self.registry.release(id);
                return Err(err);
            }
        };

        let (child, stdio) = match self.platform.spawn(&cmdline, env_block.as_deref(), dir) {
            Ok(spawned) => spawned,
            Err(err) => {
                error!("spawning relay failed: {err}");
                self.registry.release(id);
                return Err(SpawnError::LaunchFailure(err.to_string()));
            }
        };

        let pid = child.pid();
        self.registry.commit(id, pid);
        watcher::watch(self.registry.clone(), id, child.clone());

        // Process creation succeeding does not mean the intended target
        // ran; only the relay's confirmation does. Race it against the
        // relay exiting early.
        match self.platform.await_confirmation(&events.ready, &child) {
            Handshake::Confirmed => {
                info!("handle {id} confirmed (pid {pid})");
                Ok(Launched {
                    id,
                    stdin: stdio.stdin,
                    stdout: stdio.stdout,
                    stderr: stdio.stderr,
                })
            }
            Handshake::ChildExited => {
                warn!("relay for handle {id} exited before confirming");
                self.registry.release(id);
                Err(SpawnError::LaunchFailure("launch failed".into()))
            }
        }
    }

    /// Launches `argv` directly: no relay, no tracking, no pipes, own
    /// console. Returns the OS pid. The same command and environment
    /// budgets apply.
    pub fn launch_detached(
        &self,
        argv: &[String],
        env: &[String],
        dir: Option<&Path>,
    ) -> Result<u32, SpawnError> {
        if argv.is_empty() {
            return Err(SpawnError::LaunchFailure("no command specified".into()));
        }
        let cmdline = command::plain_command_line(argv)?;
        let env_block = command::environment_block(env)?;
        let child = self
            .platform
            .spawn_plain(&cmdline, env_block.as_deref(), dir)
            .map_err(|err| SpawnError::LaunchFailure(err.to_string()))?;
        let pid = child.pid();
        info!("detached launch: pid {pid}");
        Ok(pid)
    }

    /// Raises `signal` against a tracked process.
    ///
    /// Returns `Ok(true)` for an accepted request, `Ok(false)` for a
    /// negative result (probe of an exited process, or an interrupt the
    /// relay did not acknowledge within [`INTERRUPT_ACK_TIMEOUT`]).
    /// `NotFound` if the handle is unknown or the process is already gone.
    pub fn raise(&self, id: ExternalId, signal: Signal) -> Result<bool, SpawnError> {
        let (pid, events) = self.registry.lookup(id).ok_or(SpawnError::NotFound)?;
        // One fresh process handle per call, dropped on return.
        let process = self.platform.open_process(pid).ok_or(SpawnError::NotFound)?;
        debug!("raise {signal:?} on handle {id} (pid {pid})");

        match signal {
            Signal::Probe => Ok(process.alive()),
            Signal::Hangup => Ok(true),
            Signal::Kill | Signal::Terminate => {
                // A request, not a guarantee: the relay observes the event
                // and brings itself and the target down. Completion is
                // visible through wait_for.
                events.terminate.set();
                Ok(true)
            }
            Signal::Interrupt => {
                events.ready.reset();
                events.break_ev.pulse();
                let acknowledged = events.ready.wait_timeout(INTERRUPT_ACK_TIMEOUT);
                if !acknowledged {
                    debug!("interrupt on handle {id} not acknowledged");
                }
                Ok(acknowledged)
            }
        }
    }

    /// Raises a raw signal number. Unknown numbers are a no-op that
    /// reports success.
    pub fn raise_raw(&self, id: ExternalId, raw: i32) -> Result<bool, SpawnError> {
        match Signal::from_raw(raw) {
            Some(signal) => self.raise(id, signal),
            None => {
                debug!("ignoring unknown signal number {raw} for handle {id}");
                Ok(true)
            }
        }
    }

    /// Blocks until the tracked process exits and returns its exit code.
    ///
    /// Fails `NotFound` for an unknown handle, including one the
    /// termination watcher has already reclaimed; a second wait on the
    /// same handle after exit is expected to fail.
    pub fn wait_for(&self, id: ExternalId) -> Result<i32, SpawnError> {
        let (pid, _events) = self.registry.lookup(id).ok_or(SpawnError::NotFound)?;
        let process = self.platform.open_process(pid).ok_or(SpawnError::NotFound)?;
        debug!("waiting for handle {id} (pid {pid})");
        Ok(process.wait())
    }

    /// Lists the currently live tracked processes.
    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.registry.snapshot()
    }

    fn create_events(&self, names: &SignalNames) -> std::io::Result<SignalSet<P::Event>> {
        let break_ev = self.platform.create_event(&names.break_name)?;
        let ready = self.platform.create_event(&names.ready_name)?;
        let terminate = self.platform.create_event(&names.terminate_name)?;
        Ok(SignalSet {
            break_ev,
            ready,
            terminate,
        })
    }
}

/// The process-wide spawner instance backed by the Win32 platform, created
/// on first use. Relay discovery failures are deferred to launch time.
#[cfg(windows)]
pub fn global() -> &'static Spawner<crate::os::windows::WindowsPlatform> {
    use once_cell::sync::Lazy;

    static GLOBAL: Lazy<Spawner<crate::os::windows::WindowsPlatform>> = Lazy::new(|| {
        let relay = relay::find_relay().unwrap_or_else(|err| {
            warn!("relay not located at startup: {err}");
            PathBuf::from(relay::RELAY_BIN)
        });
        Spawner::with_relay(crate::os::windows::WindowsPlatform::new(), relay)
    });
    &GLOBAL
}
