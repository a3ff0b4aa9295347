//! Data models for the esploratori registry.
//!
//! Field names follow the remote `utenti` documents so records pass through
//! the cache and the HTTP surface unchanged.

mod backup;
mod member;
mod notification;
mod section;

pub use backup::*;
pub use member::*;
pub use notification::*;
pub use section::*;
