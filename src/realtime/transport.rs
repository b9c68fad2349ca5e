//! # Transport Seam
//!
//! The push transport is an external collaborator. It opens filtered
//! channels, delivers change events into the sink it was handed, and writes
//! the shared [`ConnectionState`]. Reconnection and backoff are its concern.
//!
//! [`MemoryTransport`] is an in-process implementation used by tests and
//! local tooling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::connection::ConnectionState;
use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangeEvent;
use super::predicate::Predicate;
use crate::locks::lock;

/// Receives events for one channel
pub type EventSink = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// What a channel listens to
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// Table name
    pub table: String,
    /// Row filter; empty means every row
    pub predicate: Predicate,
}

impl ChannelSpec {
    pub fn new(table: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            table: table.into(),
            predicate,
        }
    }

    /// Channel topic, e.g. `realtime:public:anomalies:user_id=eq.42`
    pub fn topic(&self) -> String {
        if self.predicate.is_empty() {
            format!("realtime:public:{}", self.table)
        } else {
            format!("realtime:public:{}:{}", self.table, self.predicate)
        }
    }
}

/// An open channel on the transport
pub trait ChannelHandle: Send {
    /// Stop delivery into this channel's sink. Must be idempotent.
    fn close(&mut self);
}

/// A push transport that multiplexes channels over one connection
pub trait Transport: Send + Sync {
    /// Open a channel. Events for it are pushed into `sink`.
    fn open_channel(
        &self,
        spec: &ChannelSpec,
        sink: EventSink,
    ) -> RealtimeResult<Box<dyn ChannelHandle>>;
}

struct OpenChannel {
    spec: ChannelSpec,
    sink: EventSink,
}

type ChannelTable = Mutex<HashMap<u64, OpenChannel>>;

/// In-process transport.
///
/// Events are pushed with [`MemoryTransport::emit`]. By default the
/// transport does no server-side filtering: every open channel on the
/// event's table receives it, so predicate evaluation is left to the
/// subscriber.
pub struct MemoryTransport {
    connection: Arc<ConnectionState>,
    channels: Arc<ChannelTable>,
    next_id: AtomicU64,
    failing_opens: AtomicUsize,
    opened_total: AtomicUsize,
    server_side_filtering: bool,
}

impl MemoryTransport {
    pub fn new(connection: Arc<ConnectionState>) -> Self {
        Self {
            connection,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            failing_opens: AtomicUsize::new(0),
            opened_total: AtomicUsize::new(0),
            server_side_filtering: false,
        }
    }

    /// Only deliver events whose row matches the channel predicate
    pub fn with_server_side_filtering(mut self) -> Self {
        self.server_side_filtering = true;
        self
    }

    /// Report the connection as up
    pub fn connect(&self) {
        self.connection.set_status(true);
    }

    /// Report the connection as down; open channels stay registered
    pub fn disconnect(&self) {
        self.connection.set_status(false);
    }

    /// Make the next `n` channel opens fail
    pub fn fail_next_opens(&self, n: usize) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Number of channels currently open
    pub fn open_count(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Number of channels ever opened
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }

    /// Specs of the currently open channels
    pub fn open_channels(&self) -> Vec<ChannelSpec> {
        let mut entries: Vec<(u64, ChannelSpec)> = lock(&self.channels)
            .iter()
            .map(|(id, c)| (*id, c.spec.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, spec)| spec).collect()
    }

    /// Push an event to every open channel on its table.
    ///
    /// Returns the number of channels the event was handed to. Nothing is
    /// delivered while disconnected.
    pub fn emit(&self, event: &ChangeEvent) -> usize {
        if !self.connection.is_connected() {
            tracing::debug!(table = %event.table, "dropping event while disconnected");
            return 0;
        }

        let mut targets: Vec<(u64, EventSink)> = lock(&self.channels)
            .iter()
            .filter(|(_, c)| c.spec.table == event.table)
            .filter(|(_, c)| !self.server_side_filtering || c.spec.predicate.matches(event))
            .map(|(id, c)| (*id, Arc::clone(&c.sink)))
            .collect();
        targets.sort_by_key(|(id, _)| *id);

        for (_, sink) in &targets {
            sink(event);
        }
        targets.len()
    }
}

impl Transport for MemoryTransport {
    fn open_channel(
        &self,
        spec: &ChannelSpec,
        sink: EventSink,
    ) -> RealtimeResult<Box<dyn ChannelHandle>> {
        let should_fail = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RealtimeError::ChannelOpen {
                topic: spec.topic(),
                reason: "channel open rejected".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.channels).insert(
            id,
            OpenChannel {
                spec: spec.clone(),
                sink,
            },
        );
        self.opened_total.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryChannel {
            id,
            channels: Arc::downgrade(&self.channels),
            closed: false,
        }))
    }
}

struct MemoryChannel {
    id: u64,
    channels: Weak<ChannelTable>,
    closed: bool,
}

impl ChannelHandle for MemoryChannel {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(channels) = self.channels.upgrade() {
            lock(&channels).remove(&self.id);
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}
