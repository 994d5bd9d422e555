use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DngError>;

/// The error-type produced while decoding a DNG file.
///
/// Whether an error voids the whole file or only one sub-image is decided by its kind,
/// see [DngError::is_fatal].
#[derive(Error, Debug)]
pub enum DngError {
    #[error("read of {len} bytes at offset {offset} exceeds the buffer of {available} bytes")]
    TruncatedData {
        offset: u64,
        len: u64,
        available: usize,
    },
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("malformed IFD chain: {0}")]
    MalformedChain(String),
    #[error("unsupported compression {code}: {reason}")]
    UnsupportedCompression { code: u32, reason: String },
    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),
    #[error("required tag {0} is missing")]
    MissingRequiredTag(&'static str),
    #[error("invalid image geometry: {0}")]
    InvalidGeometry(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl DngError {
    /// Errors that leave no usable directory structure behind.
    ///
    /// `TruncatedData` is only fatal while the directory is walked; the loader wraps the
    /// walk and decides that by phase, so here it counts as recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DngError::InvalidHeader(_) | DngError::MalformedChain(_) | DngError::Io(_)
        )
    }

    pub(crate) fn unsupported(code: u32, reason: impl Into<String>) -> Self {
        DngError::UnsupportedCompression {
            code,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        DngError::CorruptStream(reason.into())
    }

    pub(crate) fn geometry(reason: impl Into<String>) -> Self {
        DngError::InvalidGeometry(reason.into())
    }
}
