use napi::bindgen_prelude::{AbortSignal, AsyncTask, Buffer};
use napi::{Env, Error, Result, Status, Task};
use napi_derive::napi;

use crate::compositor::render_all;
use crate::decoder::{self, GifStream};
use crate::error::TranscodeError;
use crate::resize::{self, Constraints, Quality};
use crate::transcode::{
  self, canvas_to_image, CancelFlag, GifEncoder, ResizeOutcome, TranscodeOptions,
};

fn to_napi<E: std::fmt::Display>(err: E) -> Error {
  Error::from_reason(err.to_string())
}

#[napi(js_name = "Gif")]
pub struct Gif {
  pub version: String,
  pub width: u32,
  pub height: u32,
  pub loop_count: u32,
  pub frame_count: u32,
  pub delays: Vec<u32>,
  stream: GifStream,
}

#[napi]
impl Gif {
  /// RGBA canvas after each frame, in display order.
  #[napi]
  pub fn process_frames(&self) -> Result<Vec<Buffer>> {
    let frames = render_all(&self.stream).map_err(to_napi)?;
    Ok(
      frames
        .iter()
        .map(|pixels| Buffer::from(canvas_to_image(pixels, self.width, self.height).into_raw()))
        .collect(),
    )
  }
}

#[napi(js_name = "Decoder")]
pub struct Decoder {}

#[napi]
impl Decoder {
  #[napi]
  pub fn decode(data: Buffer) -> Result<Gif> {
    let stream = decoder::decode(&data);
    stream.check().map_err(to_napi)?;

    Ok(Gif {
      version: stream.version.clone(),
      width: stream.width as u32,
      height: stream.height as u32,
      loop_count: stream.loop_count as u32,
      frame_count: stream.frame_count() as u32,
      delays: stream.frames.iter().map(|frame| frame.delay).collect(),
      stream,
    })
  }
}

#[napi(object)]
#[derive(Default)]
pub struct ResizeOptions {
  pub max_width: Option<f64>,
  pub max_height: Option<f64>,
  pub quality: Option<i32>,
}

impl From<ResizeOptions> for TranscodeOptions {
  fn from(options: ResizeOptions) -> Self {
    TranscodeOptions {
      max_width: options.max_width,
      max_height: options.max_height,
      quality: options.quality.unwrap_or(100),
    }
  }
}

#[napi(object)]
pub struct Dimensions {
  pub width: u32,
  pub height: u32,
  /// False when the source can be used as it is.
  pub resize: bool,
}

#[napi]
pub fn compute_resize_target(
  width: u32,
  height: u32,
  max_width: Option<f64>,
  max_height: Option<f64>,
  quality: Option<i32>,
) -> Dimensions {
  let constraints = Constraints::new(max_width, max_height);
  let target = resize::target_size(width, height, &constraints);
  Dimensions {
    width: target.width,
    height: target.height,
    resize: resize::should_scale(&constraints, Quality::new(quality.unwrap_or(100))),
  }
}

fn cancelled_error() -> Error {
  Error::new(Status::Cancelled, "transcode cancelled")
}

pub struct TranscodeTask {
  data: Vec<u8>,
  options: TranscodeOptions,
  cancel: CancelFlag,
}

impl Task for TranscodeTask {
  type Output = Vec<u8>;
  type JsValue = Buffer;

  fn compute(&mut self) -> Result<Self::Output> {
    let mut encoder = GifEncoder::default();
    let out =
      transcode::transcode_with_options(&self.data, &self.options, &mut encoder, &self.cancel, |_| {});
    if self.cancel.is_cancelled() {
      return Err(cancelled_error());
    }
    Ok(out.unwrap_or_default())
  }

  fn resolve(&mut self, _env: Env, output: Self::Output) -> Result<Self::JsValue> {
    Ok(output.into())
  }
}

/// Resolves to the re-encoded GIF, or an empty buffer when transcoding failed.
#[napi]
pub fn transcode_gif(
  data: Buffer,
  options: Option<ResizeOptions>,
  signal: Option<AbortSignal>,
) -> AsyncTask<TranscodeTask> {
  AsyncTask::with_optional_signal(
    TranscodeTask {
      data: data.to_vec(),
      options: options.unwrap_or_default().into(),
      cancel: CancelFlag::new(),
    },
    signal,
  )
}

#[napi(object)]
pub struct ResizedImage {
  pub data: Buffer,
  pub file_name: String,
  pub format: String,
  pub unchanged: bool,
}

pub struct ResizeTask {
  data: Vec<u8>,
  file_name: String,
  options: TranscodeOptions,
  cancel: CancelFlag,
}

impl Task for ResizeTask {
  type Output = ResizeOutcome;
  type JsValue = ResizedImage;

  fn compute(&mut self) -> Result<Self::Output> {
    let mut encoder = GifEncoder::default();
    transcode::resize_image(
      &self.data,
      &self.file_name,
      &self.options,
      &mut encoder,
      &self.cancel,
      |_| {},
    )
    .map_err(|err| match err {
      TranscodeError::Cancelled => cancelled_error(),
      err => to_napi(err),
    })
  }

  fn resolve(&mut self, _env: Env, output: Self::Output) -> Result<Self::JsValue> {
    Ok(match output {
      ResizeOutcome::Unchanged => ResizedImage {
        data: std::mem::take(&mut self.data).into(),
        file_name: self.file_name.clone(),
        format: String::new(),
        unchanged: true,
      },
      ResizeOutcome::Resized(resized) => ResizedImage {
        data: resized.data.into(),
        file_name: resized.file_name,
        format: resized.format.extension().to_string(),
        unchanged: false,
      },
    })
  }
}

#[napi]
pub fn resize_image(
  data: Buffer,
  file_name: String,
  options: Option<ResizeOptions>,
  signal: Option<AbortSignal>,
) -> AsyncTask<ResizeTask> {
  AsyncTask::with_optional_signal(
    ResizeTask {
      data: data.to_vec(),
      file_name,
      options: options.unwrap_or_default().into(),
      cancel: CancelFlag::new(),
    },
    signal,
  )
}

/// Runs transcodes that can be stopped between frames.
///
/// `signal` only drops work that has not started yet; `cancel()` also stops
/// a running task, which then rejects with a cancelled status. A cancelled
/// transcoder stays cancelled.
#[napi]
#[derive(Default)]
pub struct Transcoder {
  cancel: CancelFlag,
}

#[napi]
impl Transcoder {
  #[napi(constructor)]
  pub fn new() -> Self {
    Self::default()
  }

  #[napi]
  pub fn transcode_gif(
    &self,
    data: Buffer,
    options: Option<ResizeOptions>,
    signal: Option<AbortSignal>,
  ) -> AsyncTask<TranscodeTask> {
    AsyncTask::with_optional_signal(
      TranscodeTask {
        data: data.to_vec(),
        options: options.unwrap_or_default().into(),
        cancel: self.cancel.clone(),
      },
      signal,
    )
  }

  #[napi]
  pub fn resize_image(
    &self,
    data: Buffer,
    file_name: String,
    options: Option<ResizeOptions>,
    signal: Option<AbortSignal>,
  ) -> AsyncTask<ResizeTask> {
    AsyncTask::with_optional_signal(
      ResizeTask {
        data: data.to_vec(),
        file_name,
        options: options.unwrap_or_default().into(),
        cancel: self.cancel.clone(),
      },
      signal,
    )
  }

  #[napi]
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  #[napi(getter)]
  pub fn cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}
