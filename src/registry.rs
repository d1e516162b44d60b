use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SpawnError;

/// Maximum number of concurrently tracked processes.
pub const MAX_TRACKED: usize = 100;

/// Caller-visible handle for a tracked process, distinct from the OS pid.
/// Assigned monotonically starting at 1 and never reused for the lifetime
/// of the registry.
pub type ExternalId = u32;

/// Names of the three synchronization events shared with the relay.
///
/// Derived from the external id rather than any memory address, so a name
/// can never be reissued while an older relay might still reference it.
/// The hosting process id is mixed in because named kernel objects live in
/// a machine-global namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalNames {
    pub break_name: String,
    pub ready_name: String,
    pub terminate_name: String,
}

impl SignalNames {
    pub fn derive(id: ExternalId) -> Self {
        let host = std::process::id();
        SignalNames {
            break_name: format!("winspawn.{host}.{id}.break"),
            ready_name: format!("winspawn.{host}.{id}.ready"),
            terminate_name: format!("winspawn.{host}.{id}.term"),
        }
    }
}

/// The three event objects belonging to one tracked process.
#[derive(Debug, Clone)]
pub struct SignalSet<E> {
    /// Pulsed to request a simulated console interrupt.
    pub break_ev: E,
    /// Raised by the relay once the real target has started; also re-raised
    /// as the interrupt acknowledgment.
    pub ready: E,
    /// Set to request termination of the relay and its child.
    pub terminate: E,
}

/// Snapshot of one live registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub external_id: ExternalId,
    pub os_pid: u32,
    pub started_at: DateTime<Utc>,
}

enum SlotState {
    Free,
    Reserved,
    Live { os_pid: u32, started_at: DateTime<Utc> },
}

struct Slot<E> {
    external_id: ExternalId,
    state: SlotState,
    events: Option<SignalSet<E>>,
}

impl<E> Slot<E> {
    const fn free() -> Self {
        Slot {
            external_id: 0,
            state: SlotState::Free,
            events: None,
        }
    }
}

struct Table<E> {
    slots: Vec<Slot<E>>,
    next_id: ExternalId,
}

/// Fixed-capacity table of tracked-process records.
///
/// All mutation goes through the single internal lock; launch, signal and
/// watcher paths may race against each other and rely on [`release`] being
/// idempotent. A record is only visible to [`lookup`] once it is live.
///
/// [`release`]: ProcessRegistry::release
/// [`lookup`]: ProcessRegistry::lookup
pub struct ProcessRegistry<E> {
    inner: Mutex<Table<E>>,
}

impl<E> ProcessRegistry<E> {
    pub fn new() -> Self {
        ProcessRegistry {
            inner: Mutex::new(Table {
                slots: (0..MAX_TRACKED).map(|_| Slot::free()).collect(),
                next_id: 1,
            }),
        }
    }

    /// Reserves a free slot and assigns the next external id.
    pub fn allocate(&self) -> Result<ExternalId, SpawnError> {
        let mut table = self.inner.lock();
        let Table { slots, next_id } = &mut *table;
        let Some(slot) = slots.iter_mut().find(|s| matches!(s.state, SlotState::Free)) else {
            warn!("process registry full ({MAX_TRACKED} live records)");
            return Err(SpawnError::ResourceExhausted);
        };
        slot.external_id = *next_id;
        slot.state = SlotState::Reserved;
        slot.events = None;
        *next_id += 1;
        debug!("reserved registry slot for handle {}", slot.external_id);
        Ok(slot.external_id)
    }

    /// Installs the created event set into a reserved slot.
    pub(crate) fn attach(&self, id: ExternalId, events: SignalSet<E>) {
        let mut table = self.inner.lock();
        match table
            .slots
            .iter_mut()
            .find(|s| s.external_id == id && !matches!(s.state, SlotState::Free))
        {
            Some(slot) => slot.events = Some(events),
            None => warn!("attach on unknown handle {id} ignored"),
        }
    }

    /// Marks a reserved slot live with the OS pid of the spawned relay.
    pub(crate) fn commit(&self, id: ExternalId, os_pid: u32) {
        let mut table = self.inner.lock();
        match table
            .slots
            .iter_mut()
            .find(|s| s.external_id == id && matches!(s.state, SlotState::Reserved))
        {
            Some(slot) => {
                slot.state = SlotState::Live {
                    os_pid,
                    started_at: Utc::now(),
                };
                info!("handle {id} live (pid {os_pid})");
            }
            None => warn!("commit on unknown handle {id} ignored"),
        }
    }

    /// Looks up a live record, returning its OS pid and a clone of its
    /// event set. Reserved slots are invisible.
    pub fn lookup(&self, id: ExternalId) -> Option<(u32, SignalSet<E>)>
    where
        E: Clone,
    {
        let table = self.inner.lock();
        table.slots.iter().find_map(|s| match s.state {
            SlotState::Live { os_pid, .. } if s.external_id == id => {
                s.events.as_ref().map(|ev| (os_pid, ev.clone()))
            }
            _ => None,
        })
    }

    /// Frees a slot and drops its event set. Idempotent: the watcher and a
    /// failed-launch cleanup may race to release the same record, and the
    /// loser must be a no-op. Returns whether this call freed the slot.
    pub fn release(&self, id: ExternalId) -> bool {
        let mut table = self.inner.lock();
        match table
            .slots
            .iter_mut()
            .find(|s| s.external_id == id && !matches!(s.state, SlotState::Free))
        {
            Some(slot) => {
                slot.events = None;
                slot.state = SlotState::Free;
                info!("released handle {id}");
                true
            }
            None => {
                debug!("release of unknown or already-freed handle {id}");
                false
            }
        }
    }

    /// Lists all live records.
    pub fn snapshot(&self) -> Vec<ProcessInfo> {
        let table = self.inner.lock();
        table
            .slots
            .iter()
            .filter_map(|s| match s.state {
                SlotState::Live { os_pid, started_at } => Some(ProcessInfo {
                    external_id: s.external_id,
                    os_pid,
                    started_at,
                }),
                _ => None,
            })
            .collect()
    }
}

impl<E> Default for ProcessRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
