use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};

use super::cache_error::DeltaError;
use super::fingerprint::Fingerprint;
use crate::extents::ExtentList;
use crate::series::DataPoint;
use crate::utils::futures::CallOnDrop;

/// The result of one fetch ticket, shared by every request waiting on it.
pub type TicketResult = Result<Arc<FetchOutcome>, DeltaError>;

/// A receiver for the result of a fetch ticket.
///
/// This is a shared future, so it can be cloned and awaited by any number of requests.
pub type TicketChannel = Shared<oneshot::Receiver<TicketResult>>;

/// The data a fetch ticket made available for its ranges.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// The ranges of the ticket for which data is available.
    pub covered: ExtentList,
    /// All data points within `covered`, sorted.
    pub points: Vec<DataPoint>,
    /// Ranges of the ticket the origin failed to deliver.
    pub failed: ExtentList,
    /// The reason for `failed`, if any.
    pub error: Option<DeltaError>,
}

struct Ticket {
    id: u64,
    gaps: ExtentList,
    channel: TicketChannel,
}

/// The tickets of one fingerprint.
///
/// At most one ticket is running, and at most one more is queued behind it, collecting the ranges
/// of requests that arrive while the running ticket is in flight.
#[derive(Default)]
struct Slot {
    running: Option<Ticket>,
    queued: Option<Ticket>,
}

impl Slot {
    fn is_empty(&self) -> bool {
        self.running.is_none() && self.queued.is_none()
    }
}

type Slots = Arc<Mutex<HashMap<Fingerprint, Slot>>>;

/// The tickets a request has to wait for.
pub struct Registration {
    pub channels: Vec<TicketChannel>,
    /// Whether the request was fully served by tickets created for other requests.
    pub coalesced: bool,
}

/// Deduplicates concurrent origin fetches for the same [`Fingerprint`].
///
/// Per fingerprint, only one fetch is in flight at any time, so fetching, merging and storing the
/// result never race with each other. Fetches for different fingerprints run in parallel.
pub struct Coalescer {
    slots: Slots,
    next_id: AtomicU64,
    resolution: i64,
}

impl Coalescer {
    pub fn new(resolution: i64) -> Self {
        Self {
            slots: Default::default(),
            next_id: AtomicU64::new(0),
            resolution,
        }
    }

    /// Registers a request for the `missing` ranges of `fingerprint`.
    ///
    /// The request joins the running ticket if it overlaps it. Ranges not in flight yet are added
    /// to the queued ticket, which is created and spawned on demand using `fetch`. The queued
    /// ticket starts as soon as its predecessor completes, and calls `fetch` with all the ranges
    /// it collected until then.
    ///
    /// NOTE: This function itself is *not* `async`, because it should eagerly spawn the ticket on
    /// the runtime, so it completes even if the caller stops waiting for it.
    pub fn register<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        missing: &ExtentList,
        fetch: F,
    ) -> Registration
    where
        F: FnOnce(ExtentList) -> Fut + Send + 'static,
        Fut: Future<Output = TicketResult> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let slot = slots.entry(fingerprint.clone()).or_default();

        let mut channels = Vec::new();
        let mut remaining = missing.clone();
        if let Some(running) = &slot.running {
            if running.gaps.overlaps(missing) {
                channels.push(running.channel.clone());
                remaining = remaining.subtract(&running.gaps, self.resolution);
            }
        }

        if remaining.is_empty() {
            return Registration {
                channels,
                coalesced: true,
            };
        }

        if let Some(queued) = &mut slot.queued {
            queued.gaps = queued.gaps.merge(&remaining, self.resolution);
            channels.push(queued.channel.clone());
            return Registration {
                channels,
                coalesced: true,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let predecessor = slot.running.as_ref().map(|t| t.channel.clone());
        let channel = self.spawn_ticket(fingerprint.clone(), id, predecessor, fetch);
        slot.queued = Some(Ticket {
            id,
            gaps: remaining,
            channel: channel.clone(),
        });
        channels.push(channel);

        Registration {
            channels,
            coalesced: false,
        }
    }

    fn spawn_ticket<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        id: u64,
        predecessor: Option<TicketChannel>,
        fetch: F,
    ) -> TicketChannel
    where
        F: FnOnce(ExtentList) -> Fut + Send + 'static,
        Fut: Future<Output = TicketResult> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let slots = Arc::clone(&self.slots);
        let remove_ticket_token = {
            let slots = Arc::clone(&slots);
            let fingerprint = fingerprint.clone();
            CallOnDrop::new(move || remove_ticket(&slots, &fingerprint, id))
        };

        let task = async move {
            if let Some(predecessor) = predecessor {
                // The outcome of the predecessor does not matter, the store reflects it.
                let _ = predecessor.await;
            }
            // Give requests that were woken up by the predecessor a chance to queue their ranges.
            tokio::task::yield_now().await;

            let gaps = start_ticket(&slots, &fingerprint, id);
            tracing::trace!(%fingerprint, %gaps, "Starting fetch ticket");
            let result = fetch(gaps).await;

            // Drop the token first to remove the ticket from the map. This ensures that requests
            // either get a channel that will receive data, or they create a new ticket.
            drop(remove_ticket_token);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        tokio::spawn(task);

        receiver.shared()
    }

    /// Number of fingerprints with tickets in flight.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }
}

impl fmt::Debug for Coalescer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescer")
            .field("in_flight", &self.in_flight())
            .field("resolution", &self.resolution)
            .finish()
    }
}

/// Promotes the queued ticket to be the running one, freezing its ranges.
fn start_ticket(slots: &Slots, fingerprint: &Fingerprint, id: u64) -> ExtentList {
    let mut slots = slots.lock();
    let Some(slot) = slots.get_mut(fingerprint) else {
        return ExtentList::new();
    };
    match slot.queued.take() {
        Some(ticket) if ticket.id == id => {
            let gaps = ticket.gaps.clone();
            slot.running = Some(ticket);
            gaps
        }
        other => {
            slot.queued = other;
            ExtentList::new()
        }
    }
}

fn remove_ticket(slots: &Slots, fingerprint: &Fingerprint, id: u64) {
    let mut slots = slots.lock();
    let Some(slot) = slots.get_mut(fingerprint) else {
        return;
    };
    if slot.running.as_ref().is_some_and(|t| t.id == id) {
        slot.running = None;
    }
    if slot.queued.as_ref().is_some_and(|t| t.id == id) {
        slot.queued = None;
    }
    if slot.is_empty() {
        slots.remove(fingerprint);
    }
}

/// Waits for a ticket, turning a ticket that vanished without result into an error.
pub async fn wait(channel: TicketChannel) -> TicketResult {
    channel
        .await
        .unwrap_or_else(|_| Err(DeltaError::Internal("fetch ticket was dropped".into())))
}
