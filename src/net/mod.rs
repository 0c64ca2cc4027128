//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Forward starts
//!     → connection.rs (ConnectionTracker::track, guard issued)
//!     → [plain response returned | upgrade tunnel relays bytes]
//!     → guard dropped, entry removed
//!
//! Connection States:
//!     Forwarding → Tunnel → (removed)
//! ```
//!
//! # Design Decisions
//! - Each forward tracked for observability and graceful shutdown
//! - The in-flight limit lives in the HTTP layer (semaphore permits in `AppState`)

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionState, ConnectionTracker};
