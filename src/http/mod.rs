//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, in-flight limit)
//!     → request.rs (request ID, access span)
//!     → proxy::router (cluster, session, upstream, forward)
//!     → Send to client
//! ```

pub mod request;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer, StartupError};
