use crate::registry::Instance;
use crate::sync::ServiceSubscription;
use crate::Result;
use tokio::sync::mpsc;

#[derive(Clone, Debug)]
pub struct WatchEvent {
    // Logical name of the subscription that produced the event
    pub service: String,
    pub kind: WatchEventKind,
}

#[derive(Clone, Debug)]
pub enum WatchEventKind {
    /// Current instance list of the watched service.
    Instances(Vec<Instance>),
    /// A single failed poll; the watch keeps going.
    TransportError(String),
    /// The watch gave up and will not deliver anything else.
    ConnectionLost(String),
}

impl WatchEvent {
    pub fn instances(service: impl Into<String>, instances: Vec<Instance>) -> WatchEvent {
        WatchEvent {
            service: service.into(),
            kind: WatchEventKind::Instances(instances),
        }
    }
}

/// Source of instance-list updates.
///
/// `subscribe` establishes one watch for the subscription and returns once it
/// is registered. The watch pushes events into `events` for as long as it
/// lives; the first event carries the state at subscription time.
pub trait Registry {
    fn subscribe(&self, subscription: &ServiceSubscription, events: mpsc::Sender<WatchEvent>) -> Result<()>;
}
