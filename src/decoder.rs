use byteorder::{ByteOrder, LittleEndian};
use derivative::Derivative;
use tracing::{debug, trace, warn};

use crate::error::{DecodeStatus, GifError};
use crate::lzw::LzwDecoder;
use crate::reader::{Block, ByteReader, MAX_BLOCK_SIZE};

pub const MAX_COLORS: usize = 256;

/// Canvases and frames above this many pixels are rejected as malformed.
pub const MAX_PIXELS: usize = 1 << 26;

const IMAGE_SEPARATOR: u8 = 0x2C;
const EXTENSION_INTRODUCER: u8 = 0x21;
const TRAILER: u8 = 0x3B;

const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const APPLICATION_LABEL: u8 = 0xFF;
const COMMENT_LABEL: u8 = 0xFE;
const PLAIN_TEXT_LABEL: u8 = 0x01;

const NETSCAPE_ID: &[u8; 11] = b"NETSCAPE2.0";

/// 256 packed `0xAARRGGBB` colors; entries past the declared size stay 0.
#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct ColorTable {
  len: usize,
  #[derivative(Debug = "ignore")]
  entries: Box<[u32; MAX_COLORS]>,
}

impl ColorTable {
  /// Builds a table from packed RGB triplets, full opacity.
  pub fn from_rgb(rgb: &[u8]) -> Self {
    let mut entries = Box::new([0u32; MAX_COLORS]);
    let mut len = 0;
    for (entry, color) in entries.iter_mut().zip(rgb.chunks_exact(3)) {
      *entry = 0xFF00_0000 | (color[0] as u32) << 16 | (color[1] as u32) << 8 | color[2] as u32;
      len += 1;
    }
    Self { len, entries }
  }

  /// Number of colors the stream declared.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn get(&self, index: u8) -> u32 {
    self.entries[index as usize]
  }

  pub fn entries(&self) -> &[u32; MAX_COLORS] {
    &self.entries
  }

  /// Copy of the table with `index` forced to 0, which the compositor
  /// treats as "leave the canvas pixel alone".
  pub fn with_transparent(&self, index: Option<u8>) -> ColorTable {
    let mut table = self.clone();
    if let Some(index) = index {
      table.entries[index as usize] = 0;
    }
    table
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposal {
  Unspecified,
  /// Keep the frame on the canvas.
  #[default]
  None,
  /// Clear the frame's rectangle to the background color.
  Background,
  /// Restore the canvas as it was before the frame was drawn.
  Previous,
}

impl Disposal {
  /// Decodes the 3-bit disposal field of a graphic control extension.
  ///
  /// Method 0 is treated as "keep" for encoders that leave it unset; the
  /// reserved values 4-7 map to `Unspecified`.
  pub fn from_bits(bits: u8) -> Self {
    match bits {
      0 | 1 => Disposal::None,
      2 => Disposal::Background,
      3 => Disposal::Previous,
      _ => Disposal::Unspecified,
    }
  }
}

/// Metadata a graphic control extension stages for the next image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GraphicControl {
  disposal: Disposal,
  transparency: bool,
  transparent_index: u8,
  delay: u32,
}

#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug, Default)]
pub struct Frame {
  pub x: u16,
  pub y: u16,
  pub width: u16,
  pub height: u16,
  pub disposal: Disposal,
  pub transparency: bool,
  pub transparent_index: u8,
  /// Delay to the next frame in milliseconds.
  pub delay: u32,
  pub interlace: bool,
  pub local_table: Option<ColorTable>,
  /// Offset of the LZW minimum code size byte in the raw stream.
  pub data_offset: usize,
}

impl Frame {
  pub fn pixel_count(&self) -> usize {
    self.width as usize * self.height as usize
  }

  /// Transparent index, if the frame declares one.
  pub fn transparent(&self) -> Option<u8> {
    self.transparency.then_some(self.transparent_index)
  }
}

/// A parsed GIF document.
///
/// Pixel data stays compressed in `raw`; frames are decoded on demand by the
/// compositor from their saved offsets.
#[derive(Derivative, Clone)]
#[derivative(Debug, Default)]
pub struct GifStream {
  pub version: String,
  pub width: u16,
  pub height: u16,
  pub global_table: Option<ColorTable>,
  pub background_index: u8,
  pub pixel_aspect: u8,
  #[derivative(Default(value = "1"))]
  pub loop_count: u16,
  pub frames: Vec<Frame>,
  pub status: DecodeStatus,
  pub error: Option<GifError>,
  #[derivative(Debug = "ignore")]
  pub(crate) raw: Vec<u8>,
}

impl GifStream {
  pub fn raw(&self) -> &[u8] {
    &self.raw
  }

  pub fn frame_count(&self) -> usize {
    self.frames.len()
  }

  pub fn frame(&self, index: usize) -> Option<&Frame> {
    self.frames.get(index)
  }

  /// Display duration of frame `index` in milliseconds.
  pub fn delay(&self, index: usize) -> Option<u32> {
    self.frame(index).map(|frame| frame.delay)
  }

  pub fn canvas_len(&self) -> usize {
    self.width as usize * self.height as usize
  }

  /// Background color from the global table, 0 without one.
  pub fn background_color(&self) -> u32 {
    self
      .global_table
      .as_ref()
      .map_or(0, |table| table.get(self.background_index))
  }

  /// Status as a result, for callers that want to bail on any error.
  pub fn check(&self) -> Result<(), GifError> {
    match (&self.status, &self.error) {
      (DecodeStatus::Ok, _) => Ok(()),
      (DecodeStatus::OpenError, _) => Err(GifError::Open),
      (_, Some(err)) => Err(err.clone()),
      (_, None) => Err(GifError::Format("unknown format error".to_string())),
    }
  }
}

/// Parses a GIF held entirely in memory.
///
/// Never panics on malformed input: failures are reported through
/// [`GifStream::status`], and frames completed before the failure are kept.
pub fn decode(data: &[u8]) -> GifStream {
  read(Some(data))
}

/// Like [`decode`], with an absent buffer reported as an open error.
pub fn read(data: Option<&[u8]>) -> GifStream {
  let data = match data {
    Some(data) => data,
    None => {
      warn!("no gif data to read");
      return GifStream {
        status: DecodeStatus::OpenError,
        error: Some(GifError::Open),
        ..GifStream::default()
      };
    }
  };

  let mut parser = Parser::new(data);
  parser.read_header();
  if !parser.reader.is_err() {
    parser.read_contents();
  }
  parser.finish()
}

/// Logical screen size from the header alone, `None` if it is not a GIF.
pub fn screen_size(data: &[u8]) -> Option<(u16, u16)> {
  let mut reader = ByteReader::new(data);
  let id = reader.read_bytes(6)?;
  if &id[..3] != b"GIF" {
    return None;
  }
  let width = reader.read_short();
  let height = reader.read_short();
  (!reader.is_err()).then_some((width, height))
}

struct Parser<'a> {
  reader: ByteReader<'a>,
  stream: GifStream,
  pending: Option<GraphicControl>,
  lzw: LzwDecoder,
  block: Block,
}

impl<'a> Parser<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self {
      reader: ByteReader::new(data),
      stream: GifStream {
        raw: data.to_vec(),
        ..GifStream::default()
      },
      pending: None,
      lzw: LzwDecoder::new(),
      block: [0; MAX_BLOCK_SIZE + 1],
    }
  }

  fn finish(mut self) -> GifStream {
    if let Some(err) = self.reader.take_error() {
      self.stream.status = DecodeStatus::FormatError;
      self.stream.error = Some(err);
    }
    debug!(
      frames = self.stream.frames.len(),
      status = ?self.stream.status,
      "gif parsed"
    );
    self.stream
  }

  fn read_header(&mut self) {
    let id = match self.reader.read_bytes(6) {
      Some(id) => id,
      None => return,
    };
    if &id[..3] != b"GIF" {
      self.reader.fail(GifError::Format(format!(
        "the data's signature is not GIF, got {:?}",
        String::from_utf8_lossy(&id[..3])
      )));
      return;
    }
    self.stream.version = String::from_utf8_lossy(&id[3..]).into_owned();

    self.read_logical_screen_descriptor();
  }

  fn read_logical_screen_descriptor(&mut self) {
    trace!(offset = self.reader.position(), "logical screen descriptor");

    let lsd = match self.reader.read_bytes(7) {
      Some(lsd) => lsd,
      None => return,
    };
    self.stream.width = LittleEndian::read_u16(&lsd[0..2]);
    self.stream.height = LittleEndian::read_u16(&lsd[2..4]);

    let packed_field = lsd[4];
    let global_color_flag = (packed_field & 0b1000_0000) != 0;
    // color resolution and sort flag are not used
    let global_color_size = 2usize << (packed_field & 0b0000_0111);

    self.stream.background_index = lsd[5];
    self.stream.pixel_aspect = lsd[6];

    if self.stream.canvas_len() > MAX_PIXELS {
      self.reader.fail(GifError::Format(format!(
        "canvas {}x{} too large",
        self.stream.width, self.stream.height
      )));
      return;
    }

    if global_color_flag {
      self.stream.global_table = self.read_color_table(global_color_size);
    }
  }

  fn read_color_table(&mut self, ncolors: usize) -> Option<ColorTable> {
    self.reader.read_bytes(3 * ncolors).map(ColorTable::from_rgb)
  }

  fn read_contents(&mut self) {
    let mut done = false;
    while !(done || self.reader.is_err()) {
      let introducer = self.reader.read_byte();
      if self.reader.is_err() {
        break;
      }
      match introducer {
        IMAGE_SEPARATOR => self.read_image(),
        EXTENSION_INTRODUCER => {
          let label = self.reader.read_byte();
          match label {
            GRAPHIC_CONTROL_LABEL => self.read_graphic_control_extension(),
            APPLICATION_LABEL => self.read_application_extension(),
            COMMENT_LABEL | PLAIN_TEXT_LABEL => {
              trace!(offset = self.reader.position(), label, "skipping extension");
              self.reader.skip_sub_blocks();
            }
            _ => self.reader.skip_sub_blocks(),
          }
        }
        TRAILER => {
          trace!(offset = self.reader.position(), "trailer");
          done = true;
        }
        code => {
          let offset = self.reader.position() - 1;
          self.reader.fail(GifError::Format(format!(
            "unexpected block 0x{:02X} at offset {}",
            code, offset
          )));
        }
      }
    }
  }

  fn read_graphic_control_extension(&mut self) {
    trace!(offset = self.reader.position(), "graphic control extension");

    self.reader.read_byte(); // block size
    let packed_field = self.reader.read_byte();
    let delay = self.reader.read_short() as u32 * 10;
    let transparent_index = self.reader.read_byte();
    self.reader.read_byte(); // block terminator

    self.pending = Some(GraphicControl {
      disposal: Disposal::from_bits((packed_field & 0b0001_1100) >> 2),
      transparency: (packed_field & 0b0000_0001) != 0,
      transparent_index,
      delay,
    });
  }

  fn read_application_extension(&mut self) {
    trace!(offset = self.reader.position(), "application extension");

    let size = self.reader.read_sub_block(&mut self.block);
    if size == 0 {
      return;
    }
    if size != NETSCAPE_ID.len() || &self.block[..size] != NETSCAPE_ID {
      self.reader.skip_sub_blocks();
      return;
    }

    loop {
      let size = self.reader.read_sub_block(&mut self.block);
      if size == 0 {
        break;
      }
      if self.block[0] == 1 && size >= 3 {
        self.stream.loop_count = LittleEndian::read_u16(&self.block[1..3]);
        debug!(loop_count = self.stream.loop_count, "netscape loop count");
      }
    }
  }

  fn read_image(&mut self) {
    trace!(offset = self.reader.position(), "image descriptor");

    let control = self.pending.take().unwrap_or_default();
    let mut frame = Frame {
      disposal: control.disposal,
      transparency: control.transparency,
      transparent_index: control.transparent_index,
      delay: control.delay,
      ..Frame::default()
    };

    frame.x = self.reader.read_short();
    frame.y = self.reader.read_short();
    frame.width = self.reader.read_short();
    frame.height = self.reader.read_short();

    let packed_field = self.reader.read_byte();
    let local_color_table_flag = (packed_field & 0b1000_0000) != 0;
    frame.interlace = (packed_field & 0b0100_0000) != 0;
    let local_color_table_size = 2usize << (packed_field & 0b0000_0111);

    if local_color_table_flag {
      frame.local_table = self.read_color_table(local_color_table_size);
    }
    if self.reader.is_err() {
      return;
    }
    if frame.pixel_count() > MAX_PIXELS {
      self.reader.fail(GifError::Format(format!(
        "frame {}x{} too large",
        frame.width, frame.height
      )));
      return;
    }

    frame.data_offset = self.reader.position();

    // Advance past the image data; indices are decoded again on demand.
    let decoded = self.lzw.skip(&mut self.reader, frame.pixel_count());
    if !decoded.terminated {
      self.reader.skip_sub_blocks();
    }
    if self.reader.is_err() {
      return;
    }

    debug!(
      index = self.stream.frames.len(),
      x = frame.x,
      y = frame.y,
      width = frame.width,
      height = frame.height,
      disposal = ?frame.disposal,
      delay = frame.delay,
      interlace = frame.interlace,
      "frame"
    );
    self.stream.frames.push(frame);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const HEADER: &[u8] = b"GIF89a";

  fn screen(width: u16, height: u16, packed: u8) -> Vec<u8> {
    let mut data = HEADER.to_vec();
    data.extend(width.to_le_bytes());
    data.extend(height.to_le_bytes());
    data.extend([packed, 0, 0]);
    data
  }

  #[test]
  fn screen_size_from_header() {
    assert_eq!(screen_size(&screen(640, 480, 0)), Some((640, 480)));
    assert_eq!(screen_size(b"GIF89a\x01"), None);
    assert_eq!(screen_size(b"JFIF00\x01\x00\x01\x00"), None);
  }

  #[test]
  fn rejects_bad_signature() {
    let stream = decode(b"PNG89a\x01\x00\x01\x00\x00\x00\x00\x3B");
    assert_eq!(stream.status, DecodeStatus::FormatError);
    assert_eq!(stream.frame_count(), 0);
  }

  #[test]
  fn missing_buffer_is_open_error() {
    let stream = read(None);
    assert_eq!(stream.status, DecodeStatus::OpenError);
    assert_eq!(stream.check(), Err(GifError::Open));
  }

  #[test]
  fn truncated_after_header() {
    let stream = decode(HEADER);
    assert_eq!(stream.status, DecodeStatus::FormatError);
    assert_eq!(stream.frame_count(), 0);

    let stream = decode(&screen(4, 4, 0));
    assert_eq!(stream.status, DecodeStatus::FormatError);
    assert_eq!(stream.frame_count(), 0);
  }

  #[test]
  fn reads_screen_and_global_table() {
    let mut data = screen(3, 2, 0b1000_0000);
    data.extend([255, 0, 0, 0, 0, 255]);
    data.push(TRAILER);
    let stream = decode(&data);
    assert!(stream.status.is_ok());
    assert_eq!(stream.version, "89a");
    assert_eq!((stream.width, stream.height), (3, 2));
    let table = stream.global_table.as_ref().unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(0), 0xFFFF_0000);
    assert_eq!(table.get(1), 0xFF00_00FF);
    assert_eq!(table.get(2), 0);
    assert_eq!(stream.background_color(), 0xFFFF_0000);
    assert_eq!(stream.loop_count, 1);
  }

  #[test]
  fn netscape_loop_count_and_skipped_extensions() {
    let mut data = screen(1, 1, 0);
    data.extend([EXTENSION_INTRODUCER, APPLICATION_LABEL, 11]);
    data.extend(NETSCAPE_ID);
    data.extend([3, 1, 5, 0, 0]);
    data.extend([EXTENSION_INTRODUCER, COMMENT_LABEL, 2, b'h', b'i', 0]);
    data.extend([EXTENSION_INTRODUCER, APPLICATION_LABEL, 11]);
    data.extend(b"XMP DataXMP");
    data.extend([1, 0, 0]);
    data.push(TRAILER);
    let stream = decode(&data);
    assert!(stream.status.is_ok());
    assert_eq!(stream.loop_count, 5);
  }

  #[test]
  fn unexpected_block_is_format_error() {
    let mut data = screen(1, 1, 0);
    data.push(0x00);
    let stream = decode(&data);
    assert_eq!(stream.status, DecodeStatus::FormatError);
    assert!(matches!(stream.check(), Err(GifError::Format(_))));
  }

  #[test]
  fn disposal_bits() {
    assert_eq!(Disposal::from_bits(0), Disposal::None);
    assert_eq!(Disposal::from_bits(1), Disposal::None);
    assert_eq!(Disposal::from_bits(2), Disposal::Background);
    assert_eq!(Disposal::from_bits(3), Disposal::Previous);
    assert_eq!(Disposal::from_bits(6), Disposal::Unspecified);
  }

  #[test]
  fn graphic_control_stages_next_frame_only() {
    let mut data = screen(2, 1, 0b1000_0000);
    data.extend([0, 0, 0, 255, 255, 255]);
    // disposal 2, transparent index 1, delay 7cs
    data.extend([EXTENSION_INTRODUCER, GRAPHIC_CONTROL_LABEL, 4, 0b0000_1001, 7, 0, 1, 0]);
    let image = [IMAGE_SEPARATOR, 0, 0, 0, 0, 2, 0, 1, 0, 0, 2, 2, 0x44, 0x01, 0];
    data.extend(image);
    data.extend(image);
    data.push(TRAILER);

    let stream = decode(&data);
    assert!(stream.status.is_ok(), "{:?}", stream.error);
    assert_eq!(stream.frame_count(), 2);
    let first = &stream.frames[0];
    assert_eq!(first.disposal, Disposal::Background);
    assert_eq!(first.transparent(), Some(1));
    assert_eq!(stream.delay(0), Some(70));
    let second = &stream.frames[1];
    assert_eq!(second.disposal, Disposal::None);
    assert_eq!(second.transparent(), None);
    assert_eq!(stream.delay(1), Some(0));
    assert_eq!(stream.delay(2), None);
    assert_eq!(second.data_offset, first.data_offset + image.len());
  }
}
