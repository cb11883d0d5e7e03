#![deny(clippy::all)]

//! Animated GIF transcoding: parse a GIF, rebuild every frame on a full
//! canvas, resample the frames to a bounding box and re-encode them.
//!
//! ```no_run
//! use gif_transcode::{transcode_gif, GifEncoder, ResizeTarget, Unstoppable};
//!
//! let data = std::fs::read("cat.gif").unwrap();
//! let mut encoder = GifEncoder::default();
//! let out = transcode_gif(&data, ResizeTarget::new(64, 64), &mut encoder, &Unstoppable, |_| {});
//! ```

pub mod compositor;
pub mod decoder;
pub mod error;
pub mod lzw;
pub mod reader;
pub mod resize;
pub mod transcode;

#[cfg(feature = "node")]
mod node;

pub use compositor::{composite, render_all, CompositeCanvas, Compositor};
pub use decoder::{decode, read, screen_size, ColorTable, Disposal, Frame, GifStream};
pub use enough::{Stop, StopReason, Unstoppable};
pub use error::{DecodeStatus, GifError, TranscodeError};
pub use resize::{should_scale, target_size, Constraints, Quality, ResizeTarget};
pub use transcode::{
  encode_still, resize_image, transcode_gif, transcode_with_options, try_transcode_gif,
  AnimationEncoder, CancelFlag, EncodeRequest, GifEncoder, GifEncoderConfig, OutputFormat,
  Progress, ResizeOutcome, Resized, SourceKind, TranscodeHandle, TranscodeJob, TranscodeOptions,
};
