//! Observable events
//!
//! Every structured log line carries one of these names in its `event`
//! field so log consumers can filter without parsing messages.

use std::fmt;

/// Observable events in the sync layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded
    ConfigLoaded,

    // Transport
    /// Transport reported connected
    TransportConnected,
    /// Transport reported disconnected
    TransportDisconnected,

    // Subscriptions
    /// Channel opened for a subscription
    SubscriptionOpened,
    /// Channel could not be opened
    SubscriptionFailed,
    /// Subscription torn down
    SubscriptionClosed,
    /// Every subscription torn down at once
    SubscriptionsCleared,
    /// A listener or subscription callback panicked
    ListenerPanicked,

    // Feeds
    /// Feed bound to a subject
    FeedActivated,
    /// Feed released
    FeedDeactivated,
    /// Snapshot fetch started
    SnapshotBegin,
    /// Snapshot applied to view state
    SnapshotApplied,
    /// One snapshot slice failed and fell back to its default
    SnapshotSliceFailed,
    /// Snapshot result arrived after the feed moved on
    SnapshotDiscarded,
    /// Refresh signal received from the stream
    RefreshRequested,
    /// Event could not be decoded and was ignored
    MalformedEvent,
    /// Server acknowledgement of an optimistic update failed
    ServerSyncFailed,

    // Presentation
    /// Toast handed to the presenter
    ToastDispatched,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::TransportConnected => "TRANSPORT_CONNECTED",
            Event::TransportDisconnected => "TRANSPORT_DISCONNECTED",

            Event::SubscriptionOpened => "SUBSCRIPTION_OPENED",
            Event::SubscriptionFailed => "SUBSCRIPTION_FAILED",
            Event::SubscriptionClosed => "SUBSCRIPTION_CLOSED",
            Event::SubscriptionsCleared => "SUBSCRIPTIONS_CLEARED",
            Event::ListenerPanicked => "LISTENER_PANICKED",

            Event::FeedActivated => "FEED_ACTIVATED",
            Event::FeedDeactivated => "FEED_DEACTIVATED",
            Event::SnapshotBegin => "SNAPSHOT_BEGIN",
            Event::SnapshotApplied => "SNAPSHOT_APPLIED",
            Event::SnapshotSliceFailed => "SNAPSHOT_SLICE_FAILED",
            Event::SnapshotDiscarded => "SNAPSHOT_DISCARDED",
            Event::RefreshRequested => "REFRESH_REQUESTED",
            Event::MalformedEvent => "MALFORMED_EVENT",
            Event::ServerSyncFailed => "SERVER_SYNC_FAILED",

            Event::ToastDispatched => "TOAST_DISPATCHED",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
