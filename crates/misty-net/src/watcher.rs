//! Event watcher: the single consumer of the overlay client's event bus.
//!
//! Subscribes once and dispatches every event to the session in arrival
//! order. When the stream ends or yields an error the watcher logs and stops
//! for good; it never resubscribes.

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::overlay::{EventStream, OverlayError};
use crate::session::Session;

pub struct EventWatcher {
    session: Session,
    events: EventStream,
}

impl EventWatcher {
    pub fn new(session: Session, events: EventStream) -> Self {
        Self { session, events }
    }

    /// Consume events until the stream ends or fails.
    pub async fn run(mut self) {
        let mut dispatched: u64 = 0;
        while let Some(item) = self.events.next().await {
            match item {
                Ok(event) => {
                    tracing::trace!(?event, "bus event");
                    self.session.dispatch(event).await;
                    dispatched += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, dispatched, "event bus failed, watcher stopping");
                    return;
                }
            }
        }
        tracing::warn!(dispatched, "event bus closed, watcher stopping");
    }
}

impl Session {
    /// Subscribe to the overlay event bus and spawn the watcher task.
    ///
    /// Subscription happens before this returns, so no event emitted after
    /// the call is missed. Call once per session.
    pub async fn watch(&self) -> Result<JoinHandle<()>, OverlayError> {
        let events = self.client().watch_events().await?;
        tracing::info!(hostname = %self.hostname(), "watching overlay event bus");
        Ok(tokio::spawn(EventWatcher::new(self.clone(), events).run()))
    }
}
