//! Proxy layer: request coordination, outage cache, health probing.

pub mod cache;
pub mod health;
pub mod server;

pub use cache::ResponseCache;
pub use health::Health;
pub use server::ProxyServer;
