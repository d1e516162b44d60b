//! Win32 backend: named manual-reset events, anonymous pipes, and relay
//! process creation.

use std::ffi::c_void;
use std::fs::File;
use std::io;
use std::os::windows::io::FromRawHandle;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use windows::core::{BOOL, PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, SetHandleInformation, ERROR_ALREADY_EXISTS, HANDLE, HANDLE_FLAGS,
    HANDLE_FLAG_INHERIT, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateEventW, CreateProcessW, GetExitCodeProcess, OpenProcess, PulseEvent, ResetEvent,
    SetEvent, WaitForMultipleObjects, WaitForSingleObject, CREATE_NEW_CONSOLE, CREATE_NO_WINDOW,
    CREATE_UNICODE_ENVIRONMENT, INFINITE, PROCESS_ALL_ACCESS, PROCESS_INFORMATION,
    STARTF_USESHOWWINDOW, STARTF_USESTDHANDLES, STARTUPINFOW,
};
use windows::Win32::UI::WindowsAndMessaging::SW_HIDE;

use crate::platform::{ChildProcess, ChildStdio, Handshake, Platform, SignalEvent};

/// Buffer size of each standard-stream pipe.
const PIPE_CAPACITY: u32 = 512;

/// Owned Win32 handle, closed exactly once on drop.
struct Owned(HANDLE);

// Kernel handles may be used from any thread.
unsafe impl Send for Owned {}
unsafe impl Sync for Owned {}

impl Drop for Owned {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

unsafe fn close(handle: HANDLE) {
    let _ = CloseHandle(handle);
}

/// Named manual-reset event shared with the relay.
#[derive(Clone)]
pub struct Win32Event(Arc<Owned>);

impl Win32Event {
    fn raw(&self) -> HANDLE {
        self.0 .0
    }
}

impl SignalEvent for Win32Event {
    fn set(&self) {
        if let Err(err) = unsafe { SetEvent(self.raw()) } {
            warn!("SetEvent failed: {err}");
        }
    }

    fn reset(&self) {
        if let Err(err) = unsafe { ResetEvent(self.raw()) } {
            warn!("ResetEvent failed: {err}");
        }
    }

    fn pulse(&self) {
        if let Err(err) = unsafe { PulseEvent(self.raw()) } {
            warn!("PulseEvent failed: {err}");
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        unsafe { WaitForSingleObject(self.raw(), timeout.as_millis() as u32) == WAIT_OBJECT_0 }
    }
}

/// Handle to a relay process, shareable between the launch path and its
/// termination watcher.
#[derive(Clone)]
pub struct Win32Process {
    pid: u32,
    handle: Arc<Owned>,
}

impl ChildProcess for Win32Process {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn alive(&self) -> bool {
        // Zero-timeout poll: still running iff the handle is not signaled.
        unsafe { WaitForSingleObject(self.handle.0, 0) == WAIT_TIMEOUT }
    }

    fn wait(&self) -> i32 {
        unsafe {
            let what = WaitForSingleObject(self.handle.0, INFINITE);
            if what != WAIT_OBJECT_0 {
                error!("waiting on pid {} failed ({what:?})", self.pid);
                return -1;
            }
            let mut code = 0u32;
            if let Err(err) = GetExitCodeProcess(self.handle.0, &mut code) {
                error!("GetExitCodeProcess for pid {} failed: {err}", self.pid);
                return -1;
            }
            code as i32
        }
    }
}

/// The production platform.
#[derive(Default)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    pub fn new() -> Self {
        WindowsPlatform
    }

    /// Creates the three pipes and spawns `cmdline` with the child-side
    /// ends bound to its standard streams.
    fn spawn_piped(
        &self,
        cmdline: &str,
        env_block: Option<&str>,
        dir: Option<&Path>,
    ) -> io::Result<(Win32Process, ChildStdio<Self>)> {
        let sa = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: BOOL::from(true),
        };

        // read[i]/write[i] pairs for stdin, stdout, stderr.
        let mut read = [HANDLE::default(); 3];
        let mut write = [HANDLE::default(); 3];
        for i in 0..3 {
            if let Err(err) =
                unsafe { CreatePipe(&mut read[i], &mut write[i], Some(&sa), PIPE_CAPACITY) }
            {
                unsafe {
                    for j in 0..i {
                        close(read[j]);
                        close(write[j]);
                    }
                }
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("CreatePipe: {}", err.message()),
                ));
            }
        }

        // The parent-side ends must not leak into the child.
        unsafe {
            let _ = SetHandleInformation(write[0], HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0));
            let _ = SetHandleInformation(read[1], HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0));
            let _ = SetHandleInformation(read[2], HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0));
        }

        let si = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            dwFlags: STARTF_USESTDHANDLES | STARTF_USESHOWWINDOW,
            wShowWindow: SW_HIDE.0 as u16,
            hStdInput: read[0],
            hStdOutput: write[1],
            hStdError: write[2],
            ..Default::default()
        };
        let mut pi = PROCESS_INFORMATION::default();

        // A fresh hidden console detaches the child into its own console
        // group, so a simulated break targets that group and not ours.
        let flags = CREATE_NEW_CONSOLE | CREATE_NO_WINDOW | CREATE_UNICODE_ENVIRONMENT;

        let mut wcmd = wide(cmdline);
        let wenv = env_block.map(|block| wide(block));
        let wdir = dir.map(|d| wide(&d.display().to_string()));

        let result = unsafe {
            CreateProcessW(
                PCWSTR::null(),
                Some(PWSTR(wcmd.as_mut_ptr())),
                None,
                None,
                true,
                flags,
                wenv.as_ref()
                    .map(|block| block.as_ptr() as *const c_void),
                wdir.as_ref()
                    .map_or(PCWSTR::null(), |d| PCWSTR(d.as_ptr())),
                &si,
                &mut pi,
            )
        };

        // The child owns its ends now; drop the parent's copies right away
        // or reads on the other side would never see EOF.
        unsafe {
            close(read[0]);
            close(write[1]);
            close(write[2]);
        }

        match result {
            Err(err) => {
                unsafe {
                    close(write[0]);
                    close(read[1]);
                    close(read[2]);
                }
                Err(io::Error::new(io::ErrorKind::Other, err.message()))
            }
            Ok(()) => {
                unsafe { close(pi.hThread) };
                debug!("created pid {} for: {cmdline}", pi.dwProcessId);
                let process = Win32Process {
                    pid: pi.dwProcessId,
                    handle: Arc::new(Owned(pi.hProcess)),
                };
                let stdio = unsafe {
                    ChildStdio {
                        stdin: File::from_raw_handle(write[0].0),
                        stdout: File::from_raw_handle(read[1].0),
                        stderr: File::from_raw_handle(read[2].0),
                    }
                };
                Ok((process, stdio))
            }
        }
    }
}

impl Platform for WindowsPlatform {
    type Event = Win32Event;
    type Process = Win32Process;
    type Stdin = File;
    type Stdout = File;
    type Stderr = File;

    fn create_event(&self, name: &str) -> io::Result<Win32Event> {
        let wname = wide(name);
        let handle = unsafe { CreateEventW(None, true, false, PCWSTR(wname.as_ptr())) }
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.message()))?;
        // CreateEventW hands back an existing event of the same name;
        // event names are unique per live record, so treat that as a bug.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            unsafe { close(handle) };
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("event `{name}` already exists"),
            ));
        }
        Ok(Win32Event(Arc::new(Owned(handle))))
    }

    fn spawn(
        &self,
        cmdline: &str,
        env_block: Option<&str>,
        dir: Option<&Path>,
    ) -> io::Result<(Win32Process, ChildStdio<Self>)> {
        self.spawn_piped(cmdline, env_block, dir)
    }

    fn spawn_plain(
        &self,
        cmdline: &str,
        env_block: Option<&str>,
        dir: Option<&Path>,
    ) -> io::Result<Win32Process> {
        let si = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            ..Default::default()
        };
        let mut pi = PROCESS_INFORMATION::default();
        let flags = CREATE_NEW_CONSOLE | CREATE_UNICODE_ENVIRONMENT;

        let mut wcmd = wide(cmdline);
        let wenv = env_block.map(|block| wide(block));
        let wdir = dir.map(|d| wide(&d.display().to_string()));

        unsafe {
            CreateProcessW(
                PCWSTR::null(),
                Some(PWSTR(wcmd.as_mut_ptr())),
                None,
                None,
                true,
                flags,
                wenv.as_ref()
                    .map(|block| block.as_ptr() as *const c_void),
                wdir.as_ref()
                    .map_or(PCWSTR::null(), |d| PCWSTR(d.as_ptr())),
                &si,
                &mut pi,
            )
        }
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.message()))?;

        unsafe { close(pi.hThread) };
        debug!("created detached pid {}", pi.dwProcessId);
        Ok(Win32Process {
            pid: pi.dwProcessId,
            handle: Arc::new(Owned(pi.hProcess)),
        })
    }

    fn open_process(&self, pid: u32) -> Option<Win32Process> {
        match unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) } {
            Ok(handle) => Some(Win32Process {
                pid,
                handle: Arc::new(Owned(handle)),
            }),
            Err(err) => {
                debug!("OpenProcess({pid}) refused: {err}");
                None
            }
        }
    }

    fn await_confirmation(&self, ready: &Win32Event, child: &Win32Process) -> Handshake {
        // Wait-any returns the lowest signaled index, so confirmation wins
        // if both the ready event and the process are signaled.
        let handles = [ready.raw(), child.handle.0];
        let what = unsafe { WaitForMultipleObjects(&handles, false, INFINITE) };
        if what == WAIT_FAILED {
            error!("WaitForMultipleObjects failed during launch confirmation");
        }
        if what == WAIT_OBJECT_0 {
            Handshake::Confirmed
        } else {
            Handshake::ChildExited
        }
    }
}
