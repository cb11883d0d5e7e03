use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use derivative::Derivative;
use enough::{Stop, StopReason};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::compositor::Compositor;
use crate::decoder;
use crate::error::TranscodeError;
use crate::resize::{self, Constraints, Quality, ResizeTarget};

/// Color handed to the animation encoder as the transparent marker (opaque white).
pub const TRANSPARENT_MARKER: u32 = 0xFFFF_FFFF;

/// Loop count requested from the encoder: repeat forever.
pub const LOOP_FOREVER: u16 = 0;

/// Per-call resize settings.
#[derive(Derivative, Clone, Copy, PartialEq)]
#[derivative(Debug, Default)]
pub struct TranscodeOptions {
  pub max_width: Option<f64>,
  pub max_height: Option<f64>,
  /// Percent in `0..=100`; anything else means full quality.
  #[derivative(Default(value = "100"))]
  pub quality: i32,
}

impl TranscodeOptions {
  pub fn constraints(&self) -> Constraints {
    Constraints::new(self.max_width, self.max_height)
  }

  pub fn quality(&self) -> Quality {
    Quality::new(self.quality)
  }
}

/// Pipeline chosen from a source file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  Gif,
  Still,
}

impl SourceKind {
  /// `gif` (any case) selects the animated pipeline; everything else,
  /// including no extension at all, is a still image.
  pub fn from_path(path: &str) -> Self {
    match Path::new(path).extension().and_then(|ext| ext.to_str()) {
      Some(ext) if ext.eq_ignore_ascii_case("gif") => SourceKind::Gif,
      _ => SourceKind::Still,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
  Gif,
  Png,
  Jpeg,
}

impl OutputFormat {
  pub fn extension(self) -> &'static str {
    match self {
      OutputFormat::Gif => "gif",
      OutputFormat::Png => "png",
      OutputFormat::Jpeg => "jpg",
    }
  }
}

/// Transcode progress, reported after each frame is resampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
  pub frame: usize,
  pub total: usize,
}

/// What the animation encoder receives.
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
  pub width: u32,
  pub height: u32,
  /// Resampled frames in display order, each `width` x `height`.
  pub frames: &'a [RgbaImage],
  /// One delay for every frame, in milliseconds.
  pub delay_ms: u32,
  /// 0 repeats forever.
  pub loop_count: u16,
  /// Packed `0xAARRGGBB` color to encode as transparent.
  pub transparent: u32,
}

/// Re-encodes a frame sequence into an animated image.
pub trait AnimationEncoder {
  fn encode(&mut self, request: &EncodeRequest<'_>) -> Result<Vec<u8>, TranscodeError>;
}

#[derive(Derivative, Clone, Copy, PartialEq, Eq)]
#[derivative(Debug, Default)]
pub struct GifEncoderConfig {
  /// Palette quantization speed, 1 (best) to 30 (fastest).
  #[derivative(Default(value = "10"))]
  pub speed: i32,
}

/// [`AnimationEncoder`] writing GIF89a through the `gif` crate.
#[derive(Debug, Clone, Default)]
pub struct GifEncoder {
  config: GifEncoderConfig,
}

impl GifEncoder {
  pub fn new(config: GifEncoderConfig) -> Self {
    Self { config }
  }
}

impl AnimationEncoder for GifEncoder {
  fn encode(&mut self, request: &EncodeRequest<'_>) -> Result<Vec<u8>, TranscodeError> {
    let width = u16::try_from(request.width)
      .map_err(|_| TranscodeError::Encode(format!("width {} too large", request.width)))?;
    let height = u16::try_from(request.height)
      .map_err(|_| TranscodeError::Encode(format!("height {} too large", request.height)))?;
    let speed = self.config.speed.clamp(1, 30);
    let delay = (request.delay_ms / 10).min(u16::MAX as u32) as u16;
    let repeat = match request.loop_count {
      LOOP_FOREVER => gif::Repeat::Infinite,
      n => gif::Repeat::Finite(n),
    };

    let mut out = Vec::new();
    {
      let mut encoder = gif::Encoder::new(&mut out, width, height, &[])?;
      encoder.set_repeat(repeat)?;
      for image in request.frames {
        if image.dimensions() != (request.width, request.height) {
          return Err(TranscodeError::Encode(format!(
            "frame is {:?}, expected {}x{}",
            image.dimensions(),
            request.width,
            request.height
          )));
        }
        let mut rgba = image.as_raw().clone();
        mark_transparent(&mut rgba, request.transparent);
        let mut frame = gif::Frame::from_rgba_speed(width, height, &mut rgba, speed);
        frame.delay = delay;
        encoder.write_frame(&frame)?;
      }
    }
    Ok(out)
  }
}

/// Clears the alpha of every pixel matching `marker`'s RGB.
fn mark_transparent(rgba: &mut [u8], marker: u32) {
  let [_, r, g, b] = marker.to_be_bytes();
  for pixel in rgba.chunks_exact_mut(4) {
    if pixel[..3] == [r, g, b] {
      pixel[3] = 0;
    }
  }
}

/// Converts a packed `0xAARRGGBB` canvas to an RGBA image.
pub fn canvas_to_image(pixels: &[u32], width: u32, height: u32) -> RgbaImage {
  RgbaImage::from_fn(width, height, |x, y| {
    let [a, r, g, b] = pixels[(y * width + x) as usize].to_be_bytes();
    Rgba([r, g, b, a])
  })
}

/// Decodes, composites and resamples every frame, then hands the sequence to
/// `encoder`.
///
/// Any failure, including a stream that decoded with a non-zero status, is an
/// error: partial output never reaches the encoder.
pub fn try_transcode_gif<E, S, P>(
  data: &[u8],
  target: ResizeTarget,
  encoder: &mut E,
  stop: &S,
  mut progress: P,
) -> Result<Vec<u8>, TranscodeError>
where
  E: AnimationEncoder + ?Sized,
  S: Stop + ?Sized,
  P: FnMut(Progress),
{
  stop.check()?;
  let stream = decoder::decode(data);
  stream.check()?;
  let total = stream.frame_count();
  if total == 0 {
    return Err(TranscodeError::NoFrames);
  }

  let (width, height) = (stream.width as u32, stream.height as u32);
  let mut compositor = Compositor::new(&stream);
  let mut frames = Vec::with_capacity(total);
  let mut total_delay: u64 = 0;
  loop {
    let index = compositor.position();
    let canvas = match compositor.next_frame() {
      Some(canvas) => canvas?,
      None => break,
    };
    stop.check()?;
    let image = canvas_to_image(canvas, width, height);
    frames.push(imageops::resize(
      &image,
      target.width,
      target.height,
      FilterType::Nearest,
    ));
    total_delay += stream.delay(index).unwrap_or(0) as u64;
    debug!(index, total, "frame resampled");
    progress(Progress {
      frame: index + 1,
      total,
    });
  }

  let delay_ms = (total_delay / total as u64) as u32;
  stop.check()?;
  encoder.encode(&EncodeRequest {
    width: target.width,
    height: target.height,
    frames: &frames,
    delay_ms,
    loop_count: LOOP_FOREVER,
    transparent: TRANSPARENT_MARKER,
  })
}

/// [`try_transcode_gif`] with failures logged and reported as `None`.
pub fn transcode_gif<E, S, P>(
  data: &[u8],
  target: ResizeTarget,
  encoder: &mut E,
  stop: &S,
  progress: P,
) -> Option<Vec<u8>>
where
  E: AnimationEncoder + ?Sized,
  S: Stop + ?Sized,
  P: FnMut(Progress),
{
  match try_transcode_gif(data, target, encoder, stop, progress) {
    Ok(bytes) => Some(bytes),
    Err(err) => {
      warn!(%err, "gif transcode failed");
      None
    }
  }
}

/// [`transcode_gif`] with the target computed from the GIF's logical screen.
pub fn transcode_with_options<E, S, P>(
  data: &[u8],
  options: &TranscodeOptions,
  encoder: &mut E,
  stop: &S,
  progress: P,
) -> Option<Vec<u8>>
where
  E: AnimationEncoder + ?Sized,
  S: Stop + ?Sized,
  P: FnMut(Progress),
{
  let (width, height) = decoder::screen_size(data)?;
  let target = resize::target_size(width as u32, height as u32, &options.constraints());
  transcode_gif(data, target, encoder, stop, progress)
}

/// Scales a still image without antialiasing.
pub fn scale_still(image: &DynamicImage, target: ResizeTarget) -> DynamicImage {
  image.resize_exact(target.width, target.height, FilterType::Nearest)
}

/// PNG when the image has alpha, otherwise JPEG at `quality`.
pub fn encode_still(
  image: &DynamicImage,
  quality: Quality,
) -> Result<(Vec<u8>, OutputFormat), TranscodeError> {
  let mut buf = Vec::new();
  let (width, height) = (image.width(), image.height());
  if image.color().has_alpha() {
    if quality.lossy().is_some() {
      debug!("compression is not supported for PNG, keeping original quality");
    }
    let rgba = image.to_rgba8();
    PngEncoder::new(&mut buf).write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)?;
    Ok((buf, OutputFormat::Png))
  } else {
    let rgb = image.to_rgb8();
    JpegEncoder::new_with_quality(&mut buf, quality.lossy().unwrap_or(100)).write_image(
      rgb.as_raw(),
      width,
      height,
      ExtendedColorType::Rgb8,
    )?;
    Ok((buf, OutputFormat::Jpeg))
  }
}

/// A re-encoded image ready to be written by the caller.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Resized {
  #[derivative(Debug = "ignore")]
  pub data: Vec<u8>,
  pub format: OutputFormat,
  pub target: ResizeTarget,
  /// `scaled_` plus the source's file name.
  pub file_name: String,
}

#[derive(Debug, Clone)]
pub enum ResizeOutcome {
  /// Nothing was requested; use the source as it is.
  Unchanged,
  Resized(Resized),
}

/// Resizes and re-encodes `data` if `options` ask for it.
///
/// GIF sources go through [`transcode_gif`]; when that produces nothing the
/// first frame is scaled and encoded as a still image at full quality.
pub fn resize_image<E, S, P>(
  data: &[u8],
  file_name: &str,
  options: &TranscodeOptions,
  encoder: &mut E,
  stop: &S,
  progress: P,
) -> Result<ResizeOutcome, TranscodeError>
where
  E: AnimationEncoder + ?Sized,
  S: Stop + ?Sized,
  P: FnMut(Progress),
{
  let constraints = options.constraints();
  let quality = options.quality();
  if !resize::should_scale(&constraints, quality) {
    return Ok(ResizeOutcome::Unchanged);
  }

  let source = image::load_from_memory(data)?;
  let target = resize::target_size(source.width(), source.height(), &constraints);
  let scaled_name = scaled_file_name(file_name);
  debug!(?target, kind = ?SourceKind::from_path(file_name), "resizing");

  if SourceKind::from_path(file_name) == SourceKind::Gif {
    if let Some(bytes) = transcode_gif(data, target, encoder, stop, progress) {
      return Ok(ResizeOutcome::Resized(Resized {
        data: bytes,
        format: OutputFormat::Gif,
        target,
        file_name: scaled_name,
      }));
    }
    warn!("gif transcode produced nothing, falling back to a still frame");
    stop.check()?;
    let (bytes, format) = encode_still(&scale_still(&source, target), Quality::FULL)?;
    return Ok(ResizeOutcome::Resized(Resized {
      data: bytes,
      format,
      target,
      file_name: scaled_name,
    }));
  }

  stop.check()?;
  let (bytes, format) = encode_still(&scale_still(&source, target), quality)?;
  Ok(ResizeOutcome::Resized(Resized {
    data: bytes,
    format,
    target,
    file_name: scaled_name,
  }))
}

fn scaled_file_name(path: &str) -> String {
  let name = Path::new(path)
    .file_name()
    .and_then(|name| name.to_str())
    .unwrap_or(path);
  format!("scaled_{}", name)
}

/// Shareable cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

impl Stop for CancelFlag {
  fn check(&self) -> Result<(), StopReason> {
    if self.is_cancelled() {
      Err(StopReason::Cancelled)
    } else {
      Ok(())
    }
  }
}

/// One GIF transcode run off the calling thread.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TranscodeJob {
  #[derivative(Debug = "ignore")]
  data: Vec<u8>,
  target: ResizeTarget,
  config: GifEncoderConfig,
  cancel: CancelFlag,
}

impl TranscodeJob {
  pub fn new(data: Vec<u8>, target: ResizeTarget) -> Self {
    Self {
      data,
      target,
      config: GifEncoderConfig::default(),
      cancel: CancelFlag::new(),
    }
  }

  pub fn with_config(mut self, config: GifEncoderConfig) -> Self {
    self.config = config;
    self
  }

  pub fn cancel_flag(&self) -> CancelFlag {
    self.cancel.clone()
  }

  /// Runs the job on the current thread.
  pub fn run<P: FnMut(Progress)>(&self, progress: P) -> Option<Vec<u8>> {
    let mut encoder = GifEncoder::new(self.config);
    transcode_gif(&self.data, self.target, &mut encoder, &self.cancel, progress)
  }

  pub fn spawn<P>(self, progress: P) -> TranscodeHandle
  where
    P: FnMut(Progress) + Send + 'static,
  {
    let cancel = self.cancel.clone();
    let handle = thread::spawn(move || self.run(progress));
    TranscodeHandle { handle, cancel }
  }
}

/// A spawned [`TranscodeJob`].
#[derive(Debug)]
pub struct TranscodeHandle {
  handle: JoinHandle<Option<Vec<u8>>>,
  cancel: CancelFlag,
}

impl TranscodeHandle {
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  /// Blocks until the job finishes; `None` if it failed, was cancelled or
  /// panicked.
  pub fn join(self) -> Option<Vec<u8>> {
    self.handle.join().ok().flatten()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sniffs_gif_extension_case_insensitively() {
    assert_eq!(SourceKind::from_path("/tmp/cat.GIF"), SourceKind::Gif);
    assert_eq!(SourceKind::from_path("cat.gif"), SourceKind::Gif);
    assert_eq!(SourceKind::from_path("cat.png"), SourceKind::Still);
    assert_eq!(SourceKind::from_path("cat"), SourceKind::Still);
    assert_eq!(SourceKind::from_path(""), SourceKind::Still);
  }

  #[test]
  fn scaled_names() {
    assert_eq!(scaled_file_name("/a/b/cat.gif"), "scaled_cat.gif");
    assert_eq!(scaled_file_name("cat"), "scaled_cat");
  }

  #[test]
  fn canvas_conversion_unpacks_argb() {
    let image = canvas_to_image(&[0xFF10_2030, 0], 2, 1);
    assert_eq!(image.get_pixel(0, 0), &Rgba([0x10, 0x20, 0x30, 0xFF]));
    assert_eq!(image.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
  }

  #[test]
  fn marker_color_becomes_transparent() {
    let mut rgba = vec![255, 255, 255, 255, 1, 2, 3, 255];
    mark_transparent(&mut rgba, TRANSPARENT_MARKER);
    assert_eq!(rgba, vec![255, 255, 255, 0, 1, 2, 3, 255]);
  }

  #[test]
  fn cancel_flag_stops() {
    let flag = CancelFlag::new();
    assert!(flag.check().is_ok());
    flag.clone().cancel();
    assert!(flag.is_cancelled());
    assert!(flag.check().is_err());
  }

  #[test]
  fn cancelled_before_start() {
    let flag = CancelFlag::new();
    flag.cancel();
    let mut encoder = GifEncoder::default();
    let result = try_transcode_gif(b"GIF89a", ResizeTarget::new(1, 1), &mut encoder, &flag, |_| {});
    assert!(matches!(result, Err(TranscodeError::Cancelled)));
  }

  #[test]
  fn garbage_is_absorbed() {
    let mut encoder = GifEncoder::default();
    let flag = CancelFlag::new();
    assert!(transcode_gif(b"not a gif", ResizeTarget::new(1, 1), &mut encoder, &flag, |_| {}).is_none());
  }

  #[test]
  fn still_encoding_picks_format_by_alpha() {
    let opaque = DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
    let (bytes, format) = encode_still(&opaque, Quality::new(50)).unwrap();
    assert_eq!(format, OutputFormat::Jpeg);
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

    let alpha = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
    let (bytes, format) = encode_still(&alpha, Quality::new(50)).unwrap();
    assert_eq!(format, OutputFormat::Png);
    assert_eq!(&bytes[1..4], b"PNG");
  }

  #[test]
  fn unchanged_when_nothing_requested() {
    let mut encoder = GifEncoder::default();
    let outcome = resize_image(
      b"whatever",
      "a.gif",
      &TranscodeOptions::default(),
      &mut encoder,
      &CancelFlag::new(),
      |_| {},
    )
    .unwrap();
    assert!(matches!(outcome, ResizeOutcome::Unchanged));
  }
}
