//! Submit broadcast - fan one payload out to every eligible handle

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use contracts::SubmitPayload;

use crate::error::PushError;
use crate::exec::DispatchQueue;
use crate::handle::PushHandle;
use crate::registry::HandleRegistry;

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Handles in the registry snapshot
    pub visited: usize,
    /// Handles that queued the payload
    pub accepted: usize,
    /// Handles that refused it (blocked, expired or closed)
    pub rejected: usize,
    /// Handles that were idle and got a dispatch job
    pub dispatched: usize,
}

/// Enqueue `payload` on every handle and wake idle ones.
///
/// Takes the caller's reference and drops it exactly once when the fan-out
/// is done; each accepted handle holds its own.
#[instrument(
    name = "push_broadcast",
    skip(registry, queue, payload),
    fields(version = payload.version(), bytes = payload.body().len())
)]
pub(crate) fn broadcast(
    registry: &HandleRegistry,
    queue: &DispatchQueue,
    payload: SubmitPayload,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    registry.for_each(|handle| {
        report.visited += 1;
        match offer(handle, queue, &payload) {
            Ok(dispatched) => {
                report.accepted += 1;
                if dispatched {
                    report.dispatched += 1;
                }
            }
            Err(e) => {
                report.rejected += 1;
                trace!(handle_id = handle.id(), reason = %e, "Handle skipped");
            }
        }
    });

    observability::metrics::record_broadcast(report.accepted, report.rejected);
    debug!(
        visited = report.visited,
        accepted = report.accepted,
        rejected = report.rejected,
        dispatched = report.dispatched,
        "Broadcast complete"
    );
    drop(payload);
    report
}

/// Queue on one handle; returns whether a dispatch job was scheduled.
///
/// The push happens before the exec status is read, which pairs with the
/// dispatcher publishing Closing before it reads the queue depth.
fn offer(
    handle: &Arc<PushHandle>,
    queue: &DispatchQueue,
    payload: &SubmitPayload,
) -> Result<bool, PushError> {
    handle.enqueue(payload)?;
    if !handle.request_open() {
        // Waits for the next poll
        return Ok(false);
    }
    match queue.request_dispatch(handle) {
        Ok(dispatched) => Ok(dispatched),
        // The payload is queued; shutdown only loses the wake-up
        Err(PushError::Shutdown) => Ok(false),
        Err(e) => Err(e),
    }
}
