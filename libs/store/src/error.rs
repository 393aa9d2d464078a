//! Object store error types.

use skein_types::ObjectId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// No entry for this id in the local shard.
    #[error("Object {object} not found in local store")]
    NotFound { object: ObjectId },

    /// An entry with this id already exists; ids are never reused.
    #[error("Object {object} already reserved")]
    AlreadyReserved { object: ObjectId },

    /// The entry was sealed twice. Payloads are write-once.
    #[error("Object {object} already sealed")]
    AlreadySealed { object: ObjectId },

    /// The reference count was driven below zero, which means an acquire
    /// was lost or a release duplicated upstream.
    #[error("Reference count underflow for {object}")]
    RefCountUnderflow { object: ObjectId },

    /// The entry was fully released and can no longer be observed.
    #[error("Object {object} has been released")]
    Released { object: ObjectId },
}

pub type Result<T> = std::result::Result<T, StoreError>;
