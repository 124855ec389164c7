//! Redis-backed persistence for challenge state.
//!
//! All cross-request state (configs, bypass tokens, event log) lives in
//! Redis; request handlers hold nothing beyond the request scope.

mod configs;
mod events;
mod tokens;

pub use configs::ConfigStore;
pub use events::EventLog;
pub use tokens::{IssuedToken, TokenStore, purge_worker};
