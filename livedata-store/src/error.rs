//! Errors raised by [`LocalCollection`](crate::LocalCollection) mutations.

/// Store-level failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The document has no string `_id`.
    #[error("document is missing a string _id")]
    MissingId,

    /// A document with this `_id` is already stored.
    #[error("duplicate _id: {0}")]
    DuplicateId(String),

    /// A modifier tried to change or remove `_id`.
    #[error("modifier may not touch _id")]
    ImmutableId,

    /// `$inc` target or operand is not a number.
    #[error("cannot increment non-numeric field {0}")]
    NotNumeric(String),
}
