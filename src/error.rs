//! # Store Errors
//!
//! Operations in this crate return `eyre::Result`. Conditions a caller is
//! expected to react to are raised as a typed [`StoreError`] inside the
//! report, so they can be recovered with `downcast_ref`:
//!
//! ```ignore
//! match tree.get(key) {
//!     Ok(value) => Some(value),
//!     Err(e) if e.downcast_ref::<StoreError>() == Some(&StoreError::KeyNotFound) => None,
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! `HeaderCorrupt` is fatal for the open call that raised it. `DuplicateKey`
//! and `KeyNotFound` are ordinary outcomes and leave the store usable.
//! `LogicError` means an internal invariant broke and is never expected in a
//! correct build.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    HeaderCorrupt { reason: String },
    AddressRangeExceeded { offset: u64, limit: u64 },
    DuplicateKey,
    KeyNotFound,
    ReadOnly,
    LogicError(&'static str),
}

impl StoreError {
    pub fn header_corrupt(reason: impl Into<String>) -> Self {
        StoreError::HeaderCorrupt {
            reason: reason.into(),
        }
    }

    /// Returns the typed error carried by `report`, if any.
    pub fn of(report: &eyre::Report) -> Option<&StoreError> {
        report.downcast_ref::<StoreError>()
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::HeaderCorrupt { reason } => write!(f, "header corrupt: {}", reason),
            StoreError::AddressRangeExceeded { offset, limit } => write!(
                f,
                "virtual offset {} exceeds addressable range (limit {})",
                offset, limit
            ),
            StoreError::DuplicateKey => write!(f, "key already exists"),
            StoreError::KeyNotFound => write!(f, "key not found"),
            StoreError::ReadOnly => write!(f, "store is opened read-only"),
            StoreError::LogicError(msg) => write!(f, "logic error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}
