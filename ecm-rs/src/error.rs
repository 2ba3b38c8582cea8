use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Error types that may occur when encoding or decoding an ECM file.
#[derive(Debug, Error)]
pub enum EcmError {
    /// I/O failure or unexpected end of input while reading.
    #[error("read error: {0}")]
    FileRead(#[source] io::Error),
    /// I/O failure while writing the container or the restored image.
    #[error("write error: {0}")]
    FileWrite(#[source] io::Error),
    /// A mini-TOC failed to deflate or inflate.
    #[error("header compression error")]
    HeaderCompression,
    /// A working buffer could not be allocated.
    #[error("out of memory")]
    BufferMemory,
    /// Per-sector processing failed, or the whole-image EDC did not match.
    #[error("processing error: {0}")]
    Processing(&'static str),
    /// The sectors TOC overruns a stream boundary.
    #[error("corrupted stream script")]
    CorruptedStream,
    /// The ECM header is inconsistent with the file contents.
    #[error("corrupted header")]
    CorruptedHeader,
    /// The operation was aborted by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, EcmError>;

impl EcmError {
    pub(crate) fn read(e: io::Error) -> Self {
        EcmError::FileRead(e)
    }

    pub(crate) fn write(e: io::Error) -> Self {
        EcmError::FileWrite(e)
    }
}

impl From<TryReserveError> for EcmError {
    fn from(_: TryReserveError) -> Self {
        EcmError::BufferMemory
    }
}

impl From<EcmError> for io::Error {
    fn from(error: EcmError) -> Self {
        match error {
            EcmError::FileRead(inner) | EcmError::FileWrite(inner) => inner,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
