//! Live covered-warrant board
//!
//! Runs the multi-session scraper and pushes enriched snapshots to
//! WebSocket subscribers.

pub mod server;
pub mod subscriber;
pub mod service;

pub use server::{BroadcasterStats, SnapshotBroadcaster, SubscriberInfo};
pub use service::{load_reference, FeedService};
pub use subscriber::DeliveryEnd;
