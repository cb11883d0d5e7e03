#![allow(dead_code)]

//! Hand-built GIF streams for the integration tests.
//!
//! Image data is written with literal codes only, with a clear code before the
//! dictionary would grow the code width, so the LZW side stays trivially
//! correct and any mismatch points at the decoder.

pub const RED: [u8; 3] = [0xFF, 0x00, 0x00];
pub const GREEN: [u8; 3] = [0x00, 0xFF, 0x00];
pub const BLUE: [u8; 3] = [0x00, 0x00, 0xFF];
pub const WHITE: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// Packs an RGB triple the way the decoder stores palette entries.
pub fn argb(rgb: [u8; 3]) -> u32 {
  0xFF00_0000 | (rgb[0] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[2] as u32
}

#[derive(Debug, Clone)]
pub struct FrameDesc {
  pub x: u16,
  pub y: u16,
  pub width: u16,
  pub height: u16,
  /// Row-major indices in display order.
  pub indices: Vec<u8>,
  /// Disposal method bits 0..=3; `None` writes no graphic control extension.
  pub disposal: Option<u8>,
  pub transparent: Option<u8>,
  /// Centiseconds.
  pub delay: u16,
  pub interlace: bool,
  pub local_palette: Option<Vec<[u8; 3]>>,
}

impl FrameDesc {
  pub fn filled(x: u16, y: u16, width: u16, height: u16, index: u8) -> Self {
    Self {
      x,
      y,
      width,
      height,
      indices: vec![index; width as usize * height as usize],
      disposal: None,
      transparent: None,
      delay: 0,
      interlace: false,
      local_palette: None,
    }
  }

  pub fn with_indices(mut self, indices: Vec<u8>) -> Self {
    assert_eq!(indices.len(), self.width as usize * self.height as usize);
    self.indices = indices;
    self
  }

  pub fn disposal(mut self, disposal: u8) -> Self {
    self.disposal = Some(disposal);
    self
  }

  pub fn delay(mut self, centiseconds: u16) -> Self {
    self.delay = centiseconds;
    self.disposal.get_or_insert(0);
    self
  }

  pub fn transparent(mut self, index: u8) -> Self {
    self.transparent = Some(index);
    self.disposal.get_or_insert(0);
    self
  }

  pub fn interlaced(mut self) -> Self {
    self.interlace = true;
    self
  }

  pub fn local_palette(mut self, palette: Vec<[u8; 3]>) -> Self {
    self.local_palette = Some(palette);
    self
  }
}

#[derive(Debug, Clone)]
pub struct GifBuilder {
  width: u16,
  height: u16,
  palette: Option<Vec<[u8; 3]>>,
  background: u8,
  loop_count: Option<u16>,
  frames: Vec<FrameDesc>,
}

impl GifBuilder {
  pub fn new(width: u16, height: u16) -> Self {
    Self {
      width,
      height,
      palette: None,
      background: 0,
      loop_count: None,
      frames: Vec::new(),
    }
  }

  pub fn palette(mut self, palette: &[[u8; 3]]) -> Self {
    self.palette = Some(palette.to_vec());
    self
  }

  pub fn background(mut self, index: u8) -> Self {
    self.background = index;
    self
  }

  pub fn looping(mut self, count: u16) -> Self {
    self.loop_count = Some(count);
    self
  }

  pub fn frame(mut self, frame: FrameDesc) -> Self {
    self.frames.push(frame);
    self
  }

  pub fn build(&self) -> Vec<u8> {
    let mut out = b"GIF89a".to_vec();
    out.extend(self.width.to_le_bytes());
    out.extend(self.height.to_le_bytes());
    match &self.palette {
      Some(palette) => {
        let bits = table_bits(palette.len());
        out.extend([0b1000_0000 | bits, self.background, 0]);
        write_table(&mut out, palette, bits);
      }
      None => out.extend([0, self.background, 0]),
    }

    if let Some(count) = self.loop_count {
      out.extend([0x21, 0xFF, 11]);
      out.extend(b"NETSCAPE2.0");
      out.extend([3, 1]);
      out.extend(count.to_le_bytes());
      out.push(0);
    }

    for frame in &self.frames {
      if let Some(disposal) = frame.disposal {
        out.extend([0x21, 0xF9, 4]);
        out.push((disposal & 0b111) << 2 | frame.transparent.is_some() as u8);
        out.extend(frame.delay.to_le_bytes());
        out.push(frame.transparent.unwrap_or(0));
        out.push(0);
      }

      out.push(0x2C);
      for value in [frame.x, frame.y, frame.width, frame.height] {
        out.extend(value.to_le_bytes());
      }
      let mut packed = if frame.interlace { 0b0100_0000 } else { 0 };
      let local_bits = frame.local_palette.as_ref().map(|p| table_bits(p.len()));
      if let Some(bits) = local_bits {
        packed |= 0b1000_0000 | bits;
      }
      out.push(packed);
      if let (Some(palette), Some(bits)) = (&frame.local_palette, local_bits) {
        write_table(&mut out, palette, bits);
      }

      let indices = if frame.interlace {
        interlace_rows(&frame.indices, frame.width as usize, frame.height as usize)
      } else {
        frame.indices.clone()
      };
      let max_index = indices.iter().copied().max().unwrap_or(0);
      out.extend(lzw_literals(&indices, min_code_size(max_index)));
    }

    out.push(0x3B);
    out
  }
}

/// Size field for a color table of `len` entries (holds `2 << bits`).
fn table_bits(len: usize) -> u8 {
  let mut bits = 0;
  while (2usize << bits) < len {
    bits += 1;
  }
  bits
}

fn write_table(out: &mut Vec<u8>, palette: &[[u8; 3]], bits: u8) {
  for index in 0..(2usize << bits) {
    out.extend(palette.get(index).copied().unwrap_or([0, 0, 0]));
  }
}

fn min_code_size(max_index: u8) -> u8 {
  let mut size = 2;
  while (1u16 << size) <= max_index as u16 {
    size += 1;
  }
  size
}

/// Rows in the order an interlaced frame stores them.
pub fn interlace_rows(indices: &[u8], width: usize, height: usize) -> Vec<u8> {
  let mut out = Vec::with_capacity(indices.len());
  for (start, step) in [(0, 8), (4, 8), (2, 4), (1, 2)] {
    for row in (start..height).step_by(step) {
      out.extend(&indices[row * width..(row + 1) * width]);
    }
  }
  out
}

/// Encodes `indices` as LZW image data: minimum code size byte, sub-blocks
/// and the zero-length terminator.
pub fn lzw_literals(indices: &[u8], min_code_size: u8) -> Vec<u8> {
  let clear = 1u32 << min_code_size;
  let width = min_code_size as u32 + 1;
  // The decoder widens its codes once `clear - 1` entries follow a clear.
  let run = (clear - 2) as usize;

  let mut codes = Vec::new();
  for chunk in indices.chunks(run) {
    codes.push(clear);
    codes.extend(chunk.iter().map(|&index| index as u32));
  }
  codes.push(clear + 1);

  let mut bytes = Vec::new();
  let mut acc: u32 = 0;
  let mut nbits = 0;
  for code in codes {
    acc |= code << nbits;
    nbits += width;
    while nbits >= 8 {
      bytes.push(acc as u8);
      acc >>= 8;
      nbits -= 8;
    }
  }
  if nbits > 0 {
    bytes.push(acc as u8);
  }

  let mut out = vec![min_code_size];
  for block in bytes.chunks(255) {
    out.push(block.len() as u8);
    out.extend(block);
  }
  out.push(0);
  out
}
