use super::model::ProgressEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

pub type SubscriberId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFilter {
    AllJobs,
    Job(Uuid),
}

impl SubscriptionFilter {
    fn matches(&self, job_id: Uuid) -> bool {
        match self {
            SubscriptionFilter::AllJobs => true,
            SubscriptionFilter::Job(id) => *id == job_id,
        }
    }
}

/// Receiving end handed to one listener.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    sender: mpsc::Sender<ProgressEvent>,
}

struct Registry {
    next_id: AtomicU64,
    buffer: usize,
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
}

/// Fan-out of progress events to live listeners.
///
/// Each listener owns a bounded buffer. `publish` never waits: a listener that
/// has gone away or fallen a full buffer behind is dropped on the spot.
/// Nothing is retained, so late subscribers only see what comes next.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    registry: Arc<Registry>,
}

impl ProgressBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.registry.buffer);
        self.subscribers().insert(id, Subscriber { filter, sender });
        debug!("Progress subscriber {} attached ({:?})", id, filter);
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers().remove(&id).is_some();
        if removed {
            debug!("Progress subscriber {} detached", id);
        }
        removed
    }

    /// Delivers `event` to every matching subscriber and returns how many
    /// received it.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let mut delivered = 0;
        self.subscribers().retain(|id, subscriber| {
            if !subscriber.filter.matches(event.job_id) {
                return true;
            }
            match subscriber.sender.try_send(event) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    debug!("Dropping progress subscriber {}: buffer full", id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Dropping progress subscriber {}: disconnected", id);
                    false
                }
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
