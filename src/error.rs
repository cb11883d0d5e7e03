use enough::StopReason;
use thiserror::Error;

/// Errors raised while reading or compositing a GIF stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GifError {
  /// Bad signature, unexpected block code or a read past the end of the data.
  #[error("format error: {0}")]
  Format(String),

  /// No input buffer was supplied.
  #[error("no input data to open")]
  Open,

  /// Neither a global nor a local color table applies to the frame.
  #[error("frame {frame} has no color table")]
  MissingColorTable { frame: usize },

  /// The LZW pixel stack would have grown past its fixed capacity.
  #[error("LZW dictionary capacity exhausted")]
  DictionaryFull,

  #[error("truncated sub-block at offset {offset}")]
  TruncatedSubBlock { offset: usize },

  #[error("frame {index} out of range ({count} frames)")]
  FrameOutOfRange { index: usize, count: usize },
}

/// Status reported by a decode session instead of raising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeStatus {
  #[default]
  Ok,
  FormatError,
  OpenError,
}

impl DecodeStatus {
  /// Legacy integer status (0 = no errors).
  pub fn code(self) -> i32 {
    match self {
      DecodeStatus::Ok => 0,
      DecodeStatus::FormatError => 1,
      DecodeStatus::OpenError => 2,
    }
  }

  pub fn is_ok(self) -> bool {
    self == DecodeStatus::Ok
  }
}

/// Errors absorbed by the transcode orchestrator.
#[derive(Error, Debug)]
pub enum TranscodeError {
  #[error("decode failed: {0}")]
  Decode(#[from] GifError),

  #[error("no frames decoded")]
  NoFrames,

  #[error("transcode cancelled")]
  Cancelled,

  #[error("encoder error: {0}")]
  Encode(String),

  #[error("image error: {0}")]
  Image(#[from] image::ImageError),
}

impl From<StopReason> for TranscodeError {
  fn from(_: StopReason) -> Self {
    TranscodeError::Cancelled
  }
}

impl From<gif::EncodingError> for TranscodeError {
  fn from(err: gif::EncodingError) -> Self {
    TranscodeError::Encode(err.to_string())
  }
}

pub type Result<T, E = GifError> = std::result::Result<T, E>;
