//! # Real-Time Subscriptions
//!
//! Client side of the change stream.
//!
//! ## Architecture
//!
//! - **Connection**: shared connected/disconnected flag with listener fan-out
//! - **Transport**: external push transport seam, plus an in-memory transport
//! - **Manager**: subscription ownership and event routing
//! - **Binding**: subscription lifetime tied to a consumer's active interval

pub mod binding;
pub mod connection;
pub mod errors;
pub mod event;
pub mod manager;
pub mod predicate;
pub mod transport;

pub use binding::{Binding, BindingKey};
pub use connection::{ConnectionListener, ConnectionState, ListenerHandle};
pub use errors::{RealtimeError, RealtimeResult};
pub use event::{ChangeEvent, Operation};
pub use manager::{EventCallback, RealtimeManager, RouteResult, SubscriptionHandle, SubscriptionInfo};
pub use predicate::{Filter, FilterOp, Predicate};
pub use transport::{ChannelHandle, ChannelSpec, EventSink, MemoryTransport, Transport};
