use thiserror::Error;

/// Errors produced by the block-mapping tree engine.
///
/// `map` is failure-atomic: any `Err` here means blocks allocated during the
/// call were released and the previously committed tree is unchanged, except
/// where explicitly noted (see [`crate::mapper::map`]).
#[derive(Error, Debug)]
pub enum BmptError {
    #[error("inode does not use the block-mapping tree")]
    NotBmpt,

    #[error("block-mapping tree header is missing its magic number")]
    BadHeader,

    #[error("block allocator has no free blocks")]
    OutOfSpace,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt block-mapping tree: {0}")]
    Corrupt(&'static str),

    /// Caller-contract violation (e.g. `SET` without a record). Not part of
    /// the on-disk failure taxonomy; raised before any I/O is attempted.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
}
