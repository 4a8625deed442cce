//! In-process fan-out of like and comment events to connected browsers.

use futures::stream::{self, Stream};
use metrics::{counter, gauge};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::types::{RealtimeChannel, RealtimeEventKind};

pub const METRIC_REALTIME_EVENTS: &str = "threadline_realtime_events_total";
pub const METRIC_REALTIME_SUBSCRIBERS: &str = "threadline_realtime_subscribers";
pub const DEFAULT_HUB_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeEvent {
    pub channel: RealtimeChannel,
    pub event: RealtimeEventKind,
    pub thread_id: Option<Uuid>,
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl RealtimeEvent {
    pub fn new(
        channel: RealtimeChannel,
        event: RealtimeEventKind,
        thread_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            channel,
            event,
            thread_id,
            payload,
            at: OffsetDateTime::now_utc(),
        }
    }
}

/// What a subscriber wants to hear about. An empty channel list means every channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeFilter {
    pub channels: Vec<RealtimeChannel>,
    pub thread_id: Option<Uuid>,
}

impl RealtimeFilter {
    /// Parse a comma separated channel list, ignoring unknown names.
    pub fn parse(channels: Option<&str>, thread_id: Option<Uuid>) -> Self {
        let channels = channels
            .map(|raw| raw.split(',').filter_map(RealtimeChannel::parse).collect())
            .unwrap_or_default();
        Self {
            channels,
            thread_id,
        }
    }

    pub fn matches(&self, event: &RealtimeEvent) -> bool {
        let channel_ok = self.channels.is_empty() || self.channels.contains(&event.channel);
        let thread_ok = match self.thread_id {
            Some(wanted) => event.thread_id == Some(wanted),
            None => true,
        };
        channel_ok && thread_ok
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeHub {
    sender: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver to current subscribers; returns how many received it.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        counter!(
            METRIC_REALTIME_EVENTS,
            "channel" => event.channel.as_str(),
            "event" => event.event.as_str()
        )
        .increment(1);
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(
                    target = "threadline::application::realtime",
                    "no subscribers for realtime event"
                );
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stream of events matching `filter`. Lagging receivers skip what they
    /// missed; the stream ends once the hub is dropped.
    pub fn stream(&self, filter: RealtimeFilter) -> impl Stream<Item = RealtimeEvent> + use<> {
        stream::unfold(
            (self.subscribe(), filter, SubscriberGauge::open()),
            |(mut receiver, filter, gauge)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if filter.matches(&event) => {
                            return Some((event, (receiver, filter, gauge)));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                target = "threadline::application::realtime",
                                skipped, "realtime subscriber lagged"
                            );
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        )
    }
}

/// Tracks open streams; decremented when the stream is dropped.
struct SubscriberGauge;

impl SubscriberGauge {
    fn open() -> Self {
        gauge!(METRIC_REALTIME_SUBSCRIBERS).increment(1.0);
        Self
    }
}

impl Drop for SubscriberGauge {
    fn drop(&mut self) {
        gauge!(METRIC_REALTIME_SUBSCRIBERS).decrement(1.0);
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}
