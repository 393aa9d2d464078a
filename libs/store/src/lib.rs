//! # Skein Object Store
//!
//! Each process hosts one `ObjectStore` shard: the authoritative home of
//! every object that process produced, plus a weak cache of payloads fetched
//! from other shards.
//!
//! Lifetime rules:
//! - An entry is created (`reserve`) with reference count 1, held by the
//!   `ObjectRef` returned to the submitter, and sealed exactly once with an
//!   immutable payload.
//! - Acquire/release messages are the only mutation path for the count. The
//!   owning process frees the payload when the count reaches zero and the
//!   entry is not pinned; no other process ever frees an entry.
//! - Cached remote payloads never affect the authoritative count.
//!
//! Payloads are sealed immutable, so concurrent readers across processes
//! need no locking beyond the map itself.

pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{ObjectStore, StoreStats};
