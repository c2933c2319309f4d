//! Sessions and conversation thread lifecycle.
//!
//! # Architecture
//!
//! - [`Session`]: one user's chat session, bound to at most one thread
//! - [`SessionStore`]: thread-safe store for all active sessions
//! - [`ThreadLifecycle`]: lazy thread creation and cleanup of runs left
//!   active by an interrupted turn
//!
//! # Example
//!
//! ```rust
//! use sales_assistant::session::SessionStore;
//!
//! let store = SessionStore::new();
//! let session = store.create();
//! let turn = session.begin_turn();
//! assert!(session.cancel_turn());
//! assert!(turn.is_cancelled());
//! ```

mod lifecycle;
mod thread;

pub use lifecycle::{DEFAULT_CANCEL_GRACE, ThreadLifecycle};
pub use thread::{DEFAULT_SESSION_TIMEOUT, Session, SessionStore};
