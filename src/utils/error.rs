use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;

#[derive(Debug)]
pub enum PngError {
    IoError(io::Error),
    InvalidSignature,
    InvalidDimensions { width: u32, height: u32 },
    ImageTooLarge { width: u32, height: u32, limit: u64 },
    ChunkTooLarge { chunk: String, length: u32, limit: u64 },
    TruncatedStream,
    CrcMismatch { chunk: String, expected: u32, calculated: u32 },
    InvalidChunk { chunk: String, reason: String },
    ChunkOrdering(String),
    SequenceNumber { expected: u32, found: u32 },
    SizeMismatch { width: u32, height: u32, new_width: u32, new_height: u32 },
    FrameIndex(String),
    CorruptImageData(String),
    OutOfBounds { start: usize, end: usize, len: usize },
    DecoderFailed,
    Custom(String),
}

impl PngError {
    pub(crate) fn invalid_chunk(chunk: &str, reason: impl Into<String>) -> Self {
        PngError::InvalidChunk {
            chunk: chunk.to_string(),
            reason: reason.into(),
        }
    }
}

impl Error for PngError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PngError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for PngError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PngError::IoError(err) => write!(f, "I/O error: {}", err),
            PngError::InvalidSignature => write!(f, "Not a PNG stream: invalid signature"),
            PngError::InvalidDimensions { width, height } => {
                write!(f, "Invalid image dimensions: {}x{}", width, height)
            }
            PngError::ImageTooLarge { width, height, limit } => {
                write!(f, "Image {}x{} exceeds the decoded size limit of {} bytes", width, height, limit)
            }
            PngError::ChunkTooLarge { chunk, length, limit } => {
                write!(f, "Chunk {} declares {} bytes, more than the {} bytes allowed", chunk, length, limit)
            }
            PngError::TruncatedStream => write!(f, "Stream ended in the middle of a chunk"),
            PngError::CrcMismatch { chunk, expected, calculated } => write!(
                f,
                "CRC mismatch for chunk {}: expected 0x{:08x}, calculated 0x{:08x}",
                chunk, expected, calculated
            ),
            PngError::InvalidChunk { chunk, reason } => write!(f, "Invalid {} chunk: {}", chunk, reason),
            PngError::ChunkOrdering(msg) => write!(f, "Chunk ordering violation: {}", msg),
            PngError::SequenceNumber { expected, found } => {
                write!(f, "Animation sequence number {} found, expected {}", found, expected)
            }
            PngError::SizeMismatch { width, height, new_width, new_height } => write!(
                f,
                "Image size already set to {}x{}, refusing {}x{}",
                width, height, new_width, new_height
            ),
            PngError::FrameIndex(msg) => write!(f, "Frame index violation: {}", msg),
            PngError::CorruptImageData(msg) => write!(f, "Corrupt image data: {}", msg),
            PngError::OutOfBounds { start, end, len } => {
                write!(f, "Range {}..{} out of bounds (len {})", start, end, len)
            }
            PngError::DecoderFailed => write!(f, "Decoder has failed and its codec context is gone"),
            PngError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<io::Error> for PngError {
    fn from(error: io::Error) -> Self {
        PngError::IoError(error)
    }
}

impl From<flate2::DecompressError> for PngError {
    fn from(error: flate2::DecompressError) -> Self {
        PngError::CorruptImageData(error.to_string())
    }
}

// Result type alias for decoder operations
pub type PngResult<T> = Result<T, PngError>;
