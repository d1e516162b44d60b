//! Test-only scripted platform.
//!
//! Implements the platform seam in-process: a machine-global event
//! namespace becomes a map, and the relay contract is honored by a thread
//! per "process" that confirms the launch, acknowledges break pulses,
//! obeys the terminate event, and writes to its stdio pipes. Programs are
//! selected by the first token after the three event names:
//!
//! - `exit [code]` — confirm, then exit immediately
//! - `sleep [code]` — confirm, acknowledge breaks, exit on terminate
//! - `deaf` — confirm, ignore breaks, exit on terminate
//! - `emit <words...>` — confirm, write the words to stdout, exit 0
//!
//! Anything else behaves like a relay whose target failed to start: it
//! exits without confirming.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::platform::{ChildProcess, ChildStdio, Handshake, Platform, SignalEvent};

/// Exit code reported by scripted processes brought down by the terminate
/// event, unless the program named its own.
const EXIT_TERMINATED: i32 = 15;

/// Pause between a scripted process observing the terminate event and its
/// exit, approximating real teardown latency so callers can still reach
/// `wait_for` after requesting termination.
const TEARDOWN_LINGER: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Events

#[derive(Default, Debug)]
struct EventState {
    set: bool,
    pulses: u64,
}

#[derive(Debug)]
struct EventCore {
    state: Mutex<EventState>,
    cond: Condvar,
}

/// Manual-reset event with pulse semantics: a pulse wakes only the waiters
/// of that moment and leaves the event lowered.
#[derive(Clone, Debug)]
pub(crate) struct SimEvent(Arc<EventCore>);

impl SimEvent {
    fn new() -> Self {
        SimEvent(Arc::new(EventCore {
            state: Mutex::new(EventState::default()),
            cond: Condvar::new(),
        }))
    }
}

impl SignalEvent for SimEvent {
    fn set(&self) {
        let mut state = self.0.state.lock().unwrap();
        state.set = true;
        self.0.cond.notify_all();
    }

    fn reset(&self) {
        self.0.state.lock().unwrap().set = false;
    }

    fn pulse(&self) {
        let mut state = self.0.state.lock().unwrap();
        state.pulses += 1;
        self.0.cond.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.0.state.lock().unwrap();
        let entered = state.pulses;
        loop {
            if state.set || state.pulses != entered {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .0
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }
}

// ---------------------------------------------------------------------------
// Processes

struct ProcCore {
    pid: u32,
    exit: Mutex<Option<i32>>,
    cond: Condvar,
}

#[derive(Clone)]
pub(crate) struct SimProcess(Arc<ProcCore>);

impl SimProcess {
    fn finish(&self, code: i32) {
        let mut exit = self.0.exit.lock().unwrap();
        *exit = Some(code);
        self.0.cond.notify_all();
    }
}

impl ChildProcess for SimProcess {
    fn pid(&self) -> u32 {
        self.0.pid
    }

    fn alive(&self) -> bool {
        self.0.exit.lock().unwrap().is_none()
    }

    fn wait(&self) -> i32 {
        let mut exit = self.0.exit.lock().unwrap();
        while exit.is_none() {
            exit = self.0.cond.wait(exit).unwrap();
        }
        exit.unwrap()
    }
}

// ---------------------------------------------------------------------------
// Pipes

#[derive(Default)]
struct PipeState {
    data: VecDeque<u8>,
    closed: bool,
}

struct PipeCore {
    state: Mutex<PipeState>,
    cond: Condvar,
}

pub(crate) struct SimPipeReader(Arc<PipeCore>);
pub(crate) struct SimPipeWriter(Arc<PipeCore>);

fn sim_pipe() -> (SimPipeReader, SimPipeWriter) {
    let core = Arc::new(PipeCore {
        state: Mutex::new(PipeState::default()),
        cond: Condvar::new(),
    });
    (SimPipeReader(core.clone()), SimPipeWriter(core))
}

impl Read for SimPipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.state.lock().unwrap();
        while state.data.is_empty() && !state.closed {
            state = self.0.cond.wait(state).unwrap();
        }
        let n = state.data.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.data.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for SimPipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.state.lock().unwrap();
        state.data.extend(buf.iter().copied());
        self.0.cond.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SimPipeWriter {
    fn drop(&mut self) {
        let mut state = self.0.state.lock().unwrap();
        state.closed = true;
        self.0.cond.notify_all();
    }
}

// ---------------------------------------------------------------------------
// Platform

struct SimState {
    events: Mutex<HashMap<String, SimEvent>>,
    procs: Mutex<HashMap<u32, Weak<ProcCore>>>,
    next_pid: Mutex<u32>,
}

pub(crate) struct SimPlatform {
    state: Arc<SimState>,
}

impl SimPlatform {
    pub(crate) fn new() -> Self {
        SimPlatform {
            state: Arc::new(SimState {
                events: Mutex::new(HashMap::new()),
                procs: Mutex::new(HashMap::new()),
                next_pid: Mutex::new(1000),
            }),
        }
    }

    fn open_event(&self, name: &str) -> io::Result<SimEvent> {
        self.state
            .events
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no event named `{name}`"))
            })
    }

    fn register_process(&self) -> SimProcess {
        let mut next_pid = self.state.next_pid.lock().unwrap();
        let pid = *next_pid;
        *next_pid += 1;
        let process = SimProcess(Arc::new(ProcCore {
            pid,
            exit: Mutex::new(None),
            cond: Condvar::new(),
        }));
        let mut procs = self.state.procs.lock().unwrap();
        procs.retain(|_, weak| weak.strong_count() > 0);
        procs.insert(pid, Arc::downgrade(&process.0));
        process
    }

    fn known_program(program: &str) -> bool {
        matches!(program, "exit" | "sleep" | "deaf" | "emit")
    }
}

impl Platform for SimPlatform {
    type Event = SimEvent;
    type Process = SimProcess;
    type Stdin = SimPipeWriter;
    type Stdout = SimPipeReader;
    type Stderr = SimPipeReader;

    fn create_event(&self, name: &str) -> io::Result<SimEvent> {
        let mut events = self.state.events.lock().unwrap();
        if events.contains_key(name) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("event `{name}` already exists"),
            ));
        }
        let event = SimEvent::new();
        events.insert(name.to_string(), event.clone());
        Ok(event)
    }

    fn spawn(
        &self,
        cmdline: &str,
        _env_block: Option<&str>,
        _dir: Option<&Path>,
    ) -> io::Result<(SimProcess, ChildStdio<Self>)> {
        let tokens: Vec<String> = cmdline.split(' ').map(String::from).collect();
        if tokens.len() < 4 || tokens[0] != "relay" {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "the system cannot find the file specified",
            ));
        }
        let break_ev = self.open_event(&tokens[1])?;
        let ready = self.open_event(&tokens[2])?;
        let terminate = self.open_event(&tokens[3])?;
        let program = tokens.get(4).cloned().unwrap_or_default();
        let args: Vec<String> = tokens.iter().skip(5).cloned().collect();

        let process = self.register_process();
        let (stdin_r, stdin_w) = sim_pipe();
        let (stdout_r, stdout_w) = sim_pipe();
        let (stderr_r, stderr_w) = sim_pipe();

        let child = process.clone();
        let _ = thread::spawn(move || {
            run_relay(
                child, break_ev, ready, terminate, program, args, stdin_r, stdout_w, stderr_w,
            )
        });

        Ok((
            process,
            ChildStdio {
                stdin: stdin_w,
                stdout: stdout_r,
                stderr: stderr_r,
            },
        ))
    }

    fn spawn_plain(
        &self,
        cmdline: &str,
        _env_block: Option<&str>,
        _dir: Option<&Path>,
    ) -> io::Result<SimProcess> {
        let tokens: Vec<String> = cmdline.split(' ').map(String::from).collect();
        let program = tokens.first().cloned().unwrap_or_default();
        if !Self::known_program(&program) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "the system cannot find the file specified",
            ));
        }
        let process = self.register_process();
        let child = process.clone();
        let code = if program == "exit" {
            tokens.get(1).and_then(|c| c.parse().ok()).unwrap_or(0)
        } else {
            0
        };
        let _ = thread::spawn(move || child.finish(code));
        Ok(process)
    }

    fn open_process(&self, pid: u32) -> Option<SimProcess> {
        self.state
            .procs
            .lock()
            .unwrap()
            .get(&pid)
            .and_then(Weak::upgrade)
            .map(SimProcess)
    }

    fn await_confirmation(&self, ready: &SimEvent, child: &SimProcess) -> Handshake {
        loop {
            if ready.wait_timeout(Duration::from_millis(5)) {
                return Handshake::Confirmed;
            }
            if !child.alive() {
                // The relay may confirm and exit in the same instant;
                // confirmation wins the tie.
                return if ready.wait_timeout(Duration::ZERO) {
                    Handshake::Confirmed
                } else {
                    Handshake::ChildExited
                };
            }
        }
    }
}

/// The in-process stand-in for the relay executable.
#[allow(clippy::too_many_arguments)]
fn run_relay(
    process: SimProcess,
    break_ev: SimEvent,
    ready: SimEvent,
    terminate: SimEvent,
    program: String,
    args: Vec<String>,
    _stdin: SimPipeReader,
    mut stdout: SimPipeWriter,
    _stderr: SimPipeWriter,
) {
    debug!("relay for pid {} running `{program}`", process.pid());
    let code = match program.as_str() {
        "exit" => {
            ready.set();
            args.first().and_then(|c| c.parse().ok()).unwrap_or(0)
        }
        "emit" => {
            ready.set();
            let _ = writeln!(stdout, "{}", args.join(" "));
            0
        }
        "sleep" => {
            ready.set();
            // Acknowledge console breaks while waiting to be terminated.
            let stop = Arc::new(AtomicBool::new(false));
            let acker = {
                let break_ev = break_ev.clone();
                let ready = ready.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        if break_ev.wait_timeout(Duration::from_millis(25)) {
                            ready.set();
                        }
                    }
                })
            };
            while !terminate.wait_timeout(Duration::from_secs(60)) {}
            stop.store(true, Ordering::Relaxed);
            let _ = acker.join();
            thread::sleep(TEARDOWN_LINGER);
            args.first()
                .and_then(|c| c.parse().ok())
                .unwrap_or(EXIT_TERMINATED)
        }
        "deaf" => {
            ready.set();
            while !terminate.wait_timeout(Duration::from_secs(60)) {}
            thread::sleep(TEARDOWN_LINGER);
            EXIT_TERMINATED
        }
        _ => {
            // Target failed to start: exit without confirming.
            debug!("relay could not start `{program}`");
            1
        }
    };
    debug!("relay pid {} exiting with code {code}", process.pid());
    process.finish(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_event_is_exclusive() {
        let platform = SimPlatform::new();
        platform.create_event("ev").unwrap();
        let err = platform.create_event("ev").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_event_set_and_reset() {
        let platform = SimPlatform::new();
        let ev = platform.create_event("sr").unwrap();
        assert!(!ev.wait_timeout(Duration::from_millis(1)));
        ev.set();
        assert!(ev.wait_timeout(Duration::ZERO));
        // Manual reset: the event stays raised until lowered.
        assert!(ev.wait_timeout(Duration::ZERO));
        ev.reset();
        assert!(!ev.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_pulse_wakes_current_waiter_only() {
        let platform = SimPlatform::new();
        let ev = platform.create_event("pulse").unwrap();
        let waiter = {
            let ev = ev.clone();
            thread::spawn(move || ev.wait_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        ev.pulse();
        assert!(waiter.join().unwrap());
        // The pulse has passed; a later wait sees nothing.
        assert!(!ev.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_pipe_reads_until_writer_drops() {
        let (mut reader, mut writer) = sim_pipe();
        writer.write_all(b"abc").unwrap();
        drop(writer);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_open_process_fails_once_all_handles_dropped() {
        let platform = SimPlatform::new();
        let process = platform.register_process();
        let pid = process.pid();
        process.finish(0);
        assert!(platform.open_process(pid).is_some());
        drop(process);
        assert!(platform.open_process(pid).is_none());
    }
}
