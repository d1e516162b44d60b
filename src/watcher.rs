//! Termination watcher: one thread per launched relay.

use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info};

use crate::platform::ChildProcess;
use crate::registry::{ExternalId, ProcessRegistry};

/// Spawns a detached thread that blocks until the relay exits, then
/// reclaims its registry slot.
///
/// The watcher holds its own clone of the creation process handle and is
/// keyed by the external id, so a recycled OS pid can neither be waited on
/// by mistake nor release the wrong slot. The release may lose the race
/// against a failed-launch cleanup; both sides tolerate that.
pub(crate) fn watch<E, C>(registry: Arc<ProcessRegistry<E>>, id: ExternalId, child: C)
where
    E: Send + 'static,
    C: ChildProcess,
{
    let spawned = thread::Builder::new()
        .name(format!("winspawn-watch-{id}"))
        .spawn(move || {
            let pid = child.pid();
            debug!("watching handle {id} (pid {pid})");
            let code = child.wait();
            info!("pid {pid} exited with code {code}, reclaiming handle {id}");
            registry.release(id);
        });
    if let Err(err) = spawned {
        // Without a watcher the slot can only be reclaimed by a failure
        // path; the process itself is unaffected.
        error!("failed to start watcher for handle {id}: {err}");
    }
}
