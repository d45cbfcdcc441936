//! Persistent continuation tokens, one per project.

mod store;

pub use store::{ProjectKey, SessionRecord, SessionStore, StoreError};
