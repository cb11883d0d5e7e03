use derivative::Derivative;
use tracing::debug;

use crate::decoder::{ColorTable, Disposal, Frame, GifStream};
use crate::error::{GifError, Result};
use crate::lzw::LzwDecoder;
use crate::reader::ByteReader;

/// Interlace passes as (first row, row step).
const INTERLACE_PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

/// The canvas state carried from one frame to the next.
///
/// All three buffers are `width * height` packed `0xAARRGGBB` pixels, sized
/// once and never resized.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct CompositeCanvas {
  width: usize,
  height: usize,
  /// Canvas before the most recently committed frame.
  #[derivative(Debug = "ignore")]
  previous: Vec<u32>,
  #[derivative(Debug = "ignore")]
  current: Vec<u32>,
  /// Where the next frame is assembled before it is committed.
  #[derivative(Debug = "ignore")]
  scratch: Vec<u32>,
  /// Set once a local-table frame names the background index as its
  /// transparent index; background fills are 0 from then on.
  background_cleared: bool,
}

impl CompositeCanvas {
  pub fn new(width: u16, height: u16) -> Self {
    let len = width as usize * height as usize;
    Self {
      width: width as usize,
      height: height as usize,
      previous: vec![0; len],
      current: vec![0; len],
      scratch: vec![0; len],
      background_cleared: false,
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn current(&self) -> &[u32] {
    &self.current
  }

  pub fn previous(&self) -> &[u32] {
    &self.previous
  }

  pub fn background_cleared(&self) -> bool {
    self.background_cleared
  }
}

/// Renders frame `index` of `stream` on top of `canvas`.
///
/// `canvas` must hold the result of rendering frame `index - 1` (or be fresh
/// for frame 0). On success the new image is `canvas.current()`; on failure
/// the canvas is left untouched.
pub fn composite(
  stream: &GifStream,
  index: usize,
  canvas: &mut CompositeCanvas,
  lzw: &mut LzwDecoder,
  indices: &mut Vec<u8>,
) -> Result<()> {
  let frame = stream.frame(index).ok_or(GifError::FrameOutOfRange {
    index,
    count: stream.frame_count(),
  })?;
  let previous_frame = index.checked_sub(1).and_then(|i| stream.frame(i));

  let table = frame
    .local_table
    .as_ref()
    .or(stream.global_table.as_ref())
    .ok_or(GifError::MissingColorTable { frame: index })?;

  // The transparency flag is not consulted here.
  let clears_background =
    frame.local_table.is_some() && frame.transparent_index == stream.background_index;
  let background = if canvas.background_cleared || clears_background {
    0
  } else {
    stream.background_color()
  };
  // A transparent frame leaves disposed holes inert instead of opaque.
  let fill = if frame.transparency { 0 } else { background };

  indices.clear();
  indices.resize(frame.pixel_count(), 0);
  let mut reader = ByteReader::new(stream.raw());
  reader.seek(frame.data_offset);
  let decoded = lzw.decode(&mut reader, indices);
  if let Some(err) = reader.take_error() {
    return Err(err);
  }

  debug!(
    index,
    pixels = decoded.pixels,
    expected = indices.len(),
    "compositing frame"
  );

  let table = table.with_transparent(frame.transparent());
  let CompositeCanvas {
    width,
    height,
    previous,
    current,
    scratch,
    background_cleared,
  } = canvas;
  *background_cleared |= clears_background;
  dispose(previous_frame, fill, *width, *height, previous, current, scratch);
  draw(frame, &table, indices, *width, *height, scratch);
  commit(previous, current, scratch);
  Ok(())
}

/// Prepares `scratch` according to how the previous frame asked to be removed.
fn dispose(
  previous_frame: Option<&Frame>,
  fill: u32,
  width: usize,
  height: usize,
  previous: &[u32],
  current: &[u32],
  scratch: &mut [u32],
) {
  let prev = match previous_frame {
    Some(prev) => prev,
    None => return,
  };
  match prev.disposal {
    Disposal::Unspecified | Disposal::None => scratch.copy_from_slice(current),
    Disposal::Background => {
      scratch.copy_from_slice(current);
      let x0 = (prev.x as usize).min(width);
      let x1 = (prev.x as usize + prev.width as usize).min(width);
      let y0 = (prev.y as usize).min(height);
      let y1 = (prev.y as usize + prev.height as usize).min(height);
      for line in y0..y1 {
        scratch[line * width + x0..line * width + x1].fill(fill);
      }
    }
    Disposal::Previous => scratch.copy_from_slice(previous),
  }
}

/// Order in which the rows of a frame are stored in its pixel data.
fn row_order(height: usize, interlace: bool) -> Box<dyn Iterator<Item = usize>> {
  if !interlace {
    return Box::new(0..height);
  }
  Box::new(
    INTERLACE_PASSES
      .into_iter()
      .flat_map(move |(start, step)| (start..height).step_by(step)),
  )
}

/// Places decoded indices into `scratch`, clipped to the canvas.
///
/// A translated color of exactly 0 never overwrites the canvas. That covers
/// the transparent index, and also any palette entry whose packed value
/// happens to be 0.
fn draw(
  frame: &Frame,
  table: &ColorTable,
  indices: &[u8],
  width: usize,
  height: usize,
  scratch: &mut [u32],
) {
  let frame_width = frame.width as usize;
  let x0 = frame.x as usize;
  if x0 >= width {
    return;
  }
  let x1 = (x0 + frame_width).min(width);

  for (row, line) in row_order(frame.height as usize, frame.interlace).enumerate() {
    let line = line + frame.y as usize;
    if line >= height {
      continue;
    }
    let src = &indices[row * frame_width..row * frame_width + (x1 - x0)];
    let dst = &mut scratch[line * width + x0..line * width + x1];
    for (pixel, &index) in dst.iter_mut().zip(src) {
      let color = table.get(index);
      if color != 0 {
        *pixel = color;
      }
    }
  }
}

fn commit(previous: &mut [u32], current: &mut [u32], scratch: &[u32]) {
  previous.copy_from_slice(current);
  current.copy_from_slice(scratch);
}

/// Plays a stream's frames in order over one owned canvas.
#[derive(Debug)]
pub struct Compositor<'a> {
  stream: &'a GifStream,
  canvas: CompositeCanvas,
  lzw: LzwDecoder,
  indices: Vec<u8>,
  next: usize,
}

impl<'a> Compositor<'a> {
  pub fn new(stream: &'a GifStream) -> Self {
    Self {
      stream,
      canvas: CompositeCanvas::new(stream.width, stream.height),
      lzw: LzwDecoder::new(),
      indices: Vec::new(),
      next: 0,
    }
  }

  /// Index of the frame the next call renders.
  pub fn position(&self) -> usize {
    self.next
  }

  pub fn canvas(&self) -> &CompositeCanvas {
    &self.canvas
  }

  /// Renders the next frame and returns the full canvas.
  ///
  /// Returns `None` after the last frame. An error ends playback.
  pub fn next_frame(&mut self) -> Option<Result<&[u32]>> {
    if self.next >= self.stream.frame_count() {
      return None;
    }
    let index = self.next;
    match composite(
      self.stream,
      index,
      &mut self.canvas,
      &mut self.lzw,
      &mut self.indices,
    ) {
      Ok(()) => {
        self.next += 1;
        Some(Ok(self.canvas.current()))
      }
      Err(err) => {
        self.next = self.stream.frame_count();
        Some(Err(err))
      }
    }
  }
}

/// Renders every frame of `stream`, stopping at the first error.
pub fn render_all(stream: &GifStream) -> Result<Vec<Vec<u32>>> {
  let mut compositor = Compositor::new(stream);
  let mut frames = Vec::with_capacity(stream.frame_count());
  while let Some(frame) = compositor.next_frame() {
    frames.push(frame?.to_vec());
  }
  Ok(frames)
}
