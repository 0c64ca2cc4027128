//! Session affinity subsystem.
//!
//! # Data Flow
//! ```text
//! Cookie header
//!     → cookie.rs (find cookie by cluster name)
//!     → codec.rs (base64 → decrypt → decode, or None)
//!     → store.rs (embedded record, or cache lookup by id)
//!     → ResolvedSession
//!
//! After forwarding:
//!     ResolvedSession → store.rs → codec.rs → Set-Cookie
//! ```
//!
//! # Design Decisions
//! - Affinity state is pushed to the client; no replica needs shared state
//! - Any decode failure is "no session", never an error response

pub mod cache;
pub mod cipher;
pub mod codec;
pub mod cookie;
pub mod record;
pub mod store;

pub use cache::{MemorySessionCache, SessionCache};
pub use cipher::{ChaChaTokenCipher, TokenCipher};
pub use codec::SessionCodec;
pub use cookie::CookiePolicy;
pub use record::SessionRecord;
pub use store::{CachedSession, EmbeddedSession, ResolvedSession, SessionStore};
