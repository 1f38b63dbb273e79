//! Error types for the image-purifier crate.

use std::path::PathBuf;

/// Errors that can occur while configuring or running a purification batch.
///
/// [`Error::InvalidOption`] is raised before any file is touched and aborts the
/// run. Every other variant produced while handling a file is recorded in that
/// file's [`ProcessingResult`](crate::ProcessingResult) and the batch carries on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input file could not be opened or decoded as an image.
    #[error("cannot read image {}: {source}", path.display())]
    UnreadableFile {
        /// Path of the offending input.
        path: PathBuf,
        /// Underlying decoder error.
        source: image::ImageError,
    },

    /// The output could not be written (directory creation or encoding failed).
    #[error("cannot write {}: {reason}", path.display())]
    UnwritableOutput {
        /// Path that was being written.
        path: PathBuf,
        /// Human-readable cause.
        reason: String,
    },

    /// The requested segmentation model could not be loaded.
    #[error("AI model unavailable: {0}")]
    AiModelUnavailable(String),

    /// The segmentation model ran but returned output that cannot be used.
    #[error("AI inference failed: {0}")]
    Inference(String),

    /// A command-line option or option combination is invalid.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// An I/O error occurred while discovering input files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error aborts the whole run rather than a single file.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidOption(_) | Self::Io(_))
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
