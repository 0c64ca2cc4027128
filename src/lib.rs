//! Sticky-session reverse proxy for SignalR and other WebSocket services.

pub mod admin;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod registry;
pub mod session;

pub use config::schema::ProxyConfig;
pub use error::{ForwardError, ProxyError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
