use thiserror::Error;

/// Store failures a caller may want to tell apart.
///
/// These always travel inside an `anyhow::Error`, use `downcast_ref`
/// to match on them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata store quota exceeded, write needs {needed} bytes but the limit is {limit}")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("stored binary for key {key:?} has a corrupt frame")]
    CorruptFrame { key: String },

    #[error("mime type is {len} bytes long, at most {max} can be stored")]
    MimeTooLong { len: usize, max: usize },
}
