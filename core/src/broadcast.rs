//! Event fan-out to any number of listeners
//!
//! Producers (discovery, the adapter monitor, transfer workers) publish into
//! a single unbounded queue. One delivery stage drains it in order, copying
//! each event into every listener's own queue, and completes operation
//! replies from the same queue so a caller never sees its result before the
//! events its operation published.
//!
//! Listener queues are unbounded: publishing never waits on a listener, and a
//! listener that reads late still sees every event in order. A dropped
//! listener is skipped.

use crate::events::Event;
use crate::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Identity of an attached listener
pub type ListenerId = u64;

type ListenerSet = Arc<RwLock<HashMap<ListenerId, mpsc::UnboundedSender<Event>>>>;

/// Work items for the delivery stage
#[derive(Debug)]
enum Dispatch {
    Event(Event),
    Reply {
        reply: oneshot::Sender<Result<bool>>,
        outcome: Result<bool>,
    },
    Shutdown,
}

/// Listener registry and publish side of the delivery queue
pub struct EventBroadcaster {
    listeners: ListenerSet,
    next_id: AtomicU64,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventBroadcaster {
    /// Create a broadcaster and the delivery stage that must be run for
    /// events to reach listeners
    pub fn new() -> (Self, DeliveryStage) {
        let listeners: ListenerSet = Arc::new(RwLock::new(HashMap::new()));
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let broadcaster = Self {
            listeners: listeners.clone(),
            next_id: AtomicU64::new(1),
            dispatch_tx,
        };
        let stage = DeliveryStage {
            listeners,
            dispatch_rx,
        };
        (broadcaster, stage)
    }

    /// Add a listener, returning its id and the queue its events land in
    pub fn attach(&self) -> (ListenerId, mpsc::UnboundedReceiver<Event>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.listeners.write();
        listeners.insert(id, tx);
        info!("Listener {} attached ({} active)", id, listeners.len());
        (id, rx)
    }

    /// Remove a listener.
    ///
    /// Returns true only when this call removed the last listener.
    pub fn detach(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.remove(&id).is_none() {
            return false;
        }
        info!("Listener {} detached ({} active)", id, listeners.len());
        listeners.is_empty()
    }

    /// Drop every listener at once
    pub fn detach_all(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Queue an event for every listener attached when it is delivered
    pub fn publish(&self, event: Event) {
        debug!("Publishing {}", event);
        if self.dispatch_tx.send(Dispatch::Event(event)).is_err() {
            debug!("Delivery stage stopped, event discarded");
        }
    }

    /// Queue an operation result behind every event published before it
    pub(crate) fn reply(&self, reply: oneshot::Sender<Result<bool>>, outcome: Result<bool>) {
        if let Err(mpsc::error::SendError(Dispatch::Reply { reply, outcome })) =
            self.dispatch_tx.send(Dispatch::Reply { reply, outcome })
        {
            // Stage already gone; answer directly so the caller is not left hanging.
            let _ = reply.send(outcome);
        }
    }

    /// Wait until every event published before this call has been handed to
    /// the listeners attached at that point
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.reply(tx, Ok(true));
        let _ = rx.await;
    }

    /// Ask the delivery stage to exit after draining what is queued
    pub fn shutdown(&self) {
        let _ = self.dispatch_tx.send(Dispatch::Shutdown);
    }
}

/// The single ordered consumer of the delivery queue
pub struct DeliveryStage {
    listeners: ListenerSet,
    dispatch_rx: mpsc::UnboundedReceiver<Dispatch>,
}

impl DeliveryStage {
    /// Drain the queue until shutdown or until every publisher is gone.
    ///
    /// After a shutdown request the queue is closed and whatever is already in
    /// it is still delivered, so no queued reply is lost.
    pub async fn run(mut self) {
        while let Some(dispatch) = self.dispatch_rx.recv().await {
            match dispatch {
                Dispatch::Event(event) => self.fan_out(event),
                Dispatch::Reply { reply, outcome } => {
                    if reply.send(outcome).is_err() {
                        debug!("Caller went away before its result was delivered");
                    }
                }
                Dispatch::Shutdown => self.dispatch_rx.close(),
            }
        }
        debug!("Delivery stage stopped");
    }

    fn fan_out(&self, event: Event) {
        let listeners = self.listeners.read();
        for (id, sink) in listeners.iter() {
            if sink.send(event.clone()).is_err() {
                debug!("Listener {} queue closed", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ProgressSample, TransferState};
    use crate::PrinterError;

    fn progress(sent: usize) -> Event {
        Event::Progress {
            address: "AA".to_string(),
            sample: ProgressSample::new(100, sent),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_listener_in_order() {
        let (broadcaster, stage) = EventBroadcaster::new();
        let (_a, mut rx_a) = broadcaster.attach();
        let (_b, mut rx_b) = broadcaster.attach();
        tokio::spawn(stage.run());

        for sent in [0, 50, 100] {
            broadcaster.publish(progress(sent));
        }

        for rx in [&mut rx_a, &mut rx_b] {
            for sent in [0, 50, 100] {
                assert_eq!(rx.recv().await, Some(progress(sent)));
            }
        }
    }

    #[tokio::test]
    async fn test_slow_listener_does_not_block_others() {
        let (broadcaster, stage) = EventBroadcaster::new();
        let (_slow, mut slow_rx) = broadcaster.attach();
        let (_fast, mut fast_rx) = broadcaster.attach();
        tokio::spawn(stage.run());

        // The fast listener drains after every publish; the slow one never does.
        for sent in 0..=100 {
            broadcaster.publish(progress(sent));
            assert_eq!(fast_rx.recv().await, Some(progress(sent)));
        }

        // Reading late loses nothing.
        for sent in 0..=100 {
            assert_eq!(slow_rx.try_recv().ok(), Some(progress(sent)));
        }
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_listener_is_skipped() {
        let (broadcaster, stage) = EventBroadcaster::new();
        let (_gone, gone_rx) = broadcaster.attach();
        let (_live, mut live_rx) = broadcaster.attach();
        drop(gone_rx);
        tokio::spawn(stage.run());

        broadcaster.publish(Event::RadioDisabled);
        assert_eq!(live_rx.recv().await, Some(Event::RadioDisabled));
    }

    #[tokio::test]
    async fn test_reply_follows_earlier_events() {
        let (broadcaster, stage) = EventBroadcaster::new();
        let (_id, mut rx) = broadcaster.attach();

        let (reply_tx, reply_rx) = oneshot::channel();
        broadcaster.publish(Event::StateChanged {
            address: "AA".to_string(),
            state: TransferState::Completed,
        });
        broadcaster.reply(reply_tx, Ok(true));
        tokio::spawn(stage.run());

        assert_eq!(reply_rx.await, Ok(Ok(true)));
        // Delivered before the reply was completed, so already queued.
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::StateChanged {
                state: TransferState::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_reply_after_shutdown_still_answers() {
        let (broadcaster, stage) = EventBroadcaster::new();
        drop(stage);

        let (reply_tx, reply_rx) = oneshot::channel();
        broadcaster.reply(reply_tx, Err(PrinterError::Shutdown));
        assert_eq!(reply_rx.await, Ok(Err(PrinterError::Shutdown)));
    }

    #[tokio::test]
    async fn test_shutdown_delivers_queued_replies() {
        let (broadcaster, stage) = EventBroadcaster::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        broadcaster.reply(reply_tx, Ok(false));
        broadcaster.shutdown();

        let (late_tx, late_rx) = oneshot::channel();
        stage.run().await;
        // The stage is gone, so this one is answered in place.
        broadcaster.reply(late_tx, Ok(true));

        assert_eq!(reply_rx.await, Ok(Ok(false)));
        assert_eq!(late_rx.await, Ok(Ok(true)));
    }

    #[tokio::test]
    async fn test_flush_waits_for_delivery() {
        let (broadcaster, stage) = EventBroadcaster::new();
        let (_id, mut rx) = broadcaster.attach();
        tokio::spawn(stage.run());

        broadcaster.publish(Event::PermissionDenied);
        broadcaster.flush().await;
        assert_eq!(rx.try_recv().ok(), Some(Event::PermissionDenied));
    }

    #[test]
    fn test_detach_reports_last_listener() {
        let (broadcaster, _stage) = EventBroadcaster::new();
        let (a, _rx_a) = broadcaster.attach();
        let (b, _rx_b) = broadcaster.attach();
        assert_eq!(broadcaster.listener_count(), 2);

        assert!(!broadcaster.detach(a));
        assert!(!broadcaster.detach(a));
        assert!(broadcaster.detach(b));
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let (broadcaster, _stage) = EventBroadcaster::new();
        let (a, _rx_a) = broadcaster.attach();
        let (b, _rx_b) = broadcaster.attach();
        assert_ne!(a, b);
    }
}
