//! Visualization notifications.
//!
//! The broker emits these fire-and-forget: a sink that is slow, full or gone
//! never affects seating. Rendering is someone else's job.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use venue_env::TableId;

/// Observable change in the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum VenueEvent {
    TableOccupancyChanged {
        table_id: TableId,
        used_seats: u32,
        capacity: u32,
    },
    ProfitChanged {
        total: u64,
    },
    TableOnFire {
        table_id: TableId,
    },
}

/// Receiver of venue events.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Must not block and must not fail loudly.
    fn emit(&self, event: VenueEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: VenueEvent) {}
}

/// Forwards events into an unbounded channel; send errors are ignored.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<VenueEvent>,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VenueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: VenueEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(VenueEvent::ProfitChanged { total: 40 });
        assert_eq!(rx.try_recv().unwrap(), VenueEvent::ProfitChanged { total: 40 });
    }

    #[test]
    fn test_channel_sink_ignores_dropped_receiver() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        // Must not panic
        sink.emit(VenueEvent::TableOnFire { table_id: TableId(1) });
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_string(&VenueEvent::TableOnFire { table_id: TableId(3) }).unwrap();
        assert_eq!(json, r#"{"kind":"TableOnFire","table_id":3}"#);
    }
}
