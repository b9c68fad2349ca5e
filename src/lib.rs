//! pulseboard - Client-side realtime sync for dashboard state
//!
//! Consumes row-level change events and keeps bounded, de-duplicated view
//! state consistent with a snapshot source.

pub mod config;
pub mod feeds;
mod locks;
pub mod observability;
pub mod presentation;
pub mod realtime;

pub use config::{ConfigError, SyncConfig};
pub use feeds::{ActivityFeed, DashboardFeed, NotificationFeed};
pub use presentation::{Presenter, Toast, ToastKind};
pub use realtime::{ChangeEvent, ConnectionState, RealtimeManager};
