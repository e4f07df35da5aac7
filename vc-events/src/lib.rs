//! Catalog event broker and realtime quality-of-service monitor
//! (spec §4.5, §4.6).

pub mod broker;
pub mod monitor;

pub use broker::{BrokerConfig, CatalogEventBroker, Subscription};
pub use monitor::{MonitorSnapshot, RealtimeMonitor, Transport};
