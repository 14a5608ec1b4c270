//! Error types for nvobj
//!
//! Every layer of the workspace reports failures through this one enum.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! None of the variants are retried internally. A failure raised inside a
//! transaction scope triggers rollback and is then handed back to the caller
//! unchanged.

use std::io;
use thiserror::Error;

/// Result type alias for nvobj operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the persistent object model
#[derive(Debug, Error)]
pub enum Error {
    /// Pool create/open/close failure or misuse of a closed pool
    #[error("pool error: {0}")]
    Pool(String),

    /// Transaction could not begin, or a finalized/aborted frame was reused
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Transaction was rolled back; carries the abort code
    #[error("explicit abort {code}")]
    TransactionAborted {
        /// Code passed to `abort`, or -1 for implicit aborts
        code: i32,
    },

    /// Allocation or undo registration attempted with no active transaction
    #[error("scope error: {0}")]
    Scope(String),

    /// Space exhaustion or constructor failure during allocation
    #[error("allocation error: {0}")]
    Allocation(String),

    /// Type registration conflict or unrepaired dispatch metadata
    #[error("type error: {0}")]
    Type(String),

    /// Lock/unlock protocol violation
    #[error("lock error: {0}")]
    Lock(String),

    /// Iterator or bounds misuse
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Dereference of a null persistent pointer
    #[error("null dereference: {0}")]
    NullDereference(String),

    /// I/O error (pool file, journal, config)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-media bytes failed validation
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Invalid configuration or process runtime misuse
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Abort code if this is a `TransactionAborted` error.
    pub fn abort_code(&self) -> Option<i32> {
        match self {
            Error::TransactionAborted { code } => Some(*code),
            _ => None,
        }
    }

    /// True if the error reports a rolled-back transaction.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::TransactionAborted { .. })
    }

    /// True for failures of the pool engine itself (space, I/O, media).
    ///
    /// These are fatal to the transaction that observed them but not to the
    /// pool.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Error::Allocation(_) | Error::Io(_) | Error::Corruption(_)
        )
    }
}
