//! Event bus for decoupled communication
//!
//! Scanner lifecycle events are published here as a fire-and-forget stream;
//! send failures (no subscribers) are ignored.

use serde::Serialize;
use tokio::sync::broadcast;

/// Scanner lifecycle events. The set is closed: every event a scan can emit
/// is listed here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    SeedStarted {
        roots: Vec<String>,
        total: u64,
    },
    SeedProgress {
        scanned: u64,
        total: u64,
        created: u64,
    },
    SeedPaused,
    SeedResumed,
    SeedFastComplete {
        created: u64,
        skipped: u64,
    },
    SeedEnrichComplete {
        enriched: u64,
    },
    SeedCompleted {
        scanned: u64,
        total: u64,
        created: u64,
        skipped: u64,
    },
    SeedCancelled {
        scanned: u64,
        total: u64,
        created: u64,
    },
    SeedError {
        message: String,
    },
}

impl Event {
    /// Wire topic for external sinks.
    pub fn topic(&self) -> &'static str {
        match self {
            Event::SeedStarted { .. } => "seed.started",
            Event::SeedProgress { .. } => "seed.progress",
            Event::SeedPaused => "seed.paused",
            Event::SeedResumed => "seed.resumed",
            Event::SeedFastComplete { .. } => "seed.fast_complete",
            Event::SeedEnrichComplete { .. } => "seed.enrich_complete",
            Event::SeedCompleted { .. } => "seed.completed",
            Event::SeedCancelled { .. } => "seed.cancelled",
            Event::SeedError { .. } => "seed.error",
        }
    }
}

/// Event bus for broadcasting events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Errors (no receivers) are ignored.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
