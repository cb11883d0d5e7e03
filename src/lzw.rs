use derivative::Derivative;
use tracing::trace;

use crate::error::{GifError, Result};
use crate::reader::{Block, ByteReader, MAX_BLOCK_SIZE};

/// Dictionary and pixel stack capacity (12-bit codes).
pub const MAX_STACK_SIZE: usize = 4096;

/// Largest LZW minimum code size that still leaves room for the clear and
/// end-of-information codes inside a 12-bit dictionary.
const MAX_MIN_CODE_SIZE: u32 = 11;

/// Fixed-capacity stack the expansion of one code is unwound through.
///
/// Every push is checked before it writes, so a hostile code stream can at
/// worst stop decoding.
#[derive(Derivative)]
#[derivative(Debug)]
struct PixelStack {
  #[derivative(Debug = "ignore")]
  items: Vec<u8>,
  top: usize,
}

impl PixelStack {
  fn new() -> Self {
    Self {
      items: vec![0; MAX_STACK_SIZE + 1],
      top: 0,
    }
  }

  fn push(&mut self, byte: u8) -> Result<()> {
    if self.top >= self.items.len() {
      return Err(GifError::DictionaryFull);
    }
    self.items[self.top] = byte;
    self.top += 1;
    Ok(())
  }

  fn pop(&mut self) -> Option<u8> {
    if self.top == 0 {
      return None;
    }
    self.top -= 1;
    Some(self.items[self.top])
  }

  fn clear(&mut self) {
    self.top = 0;
  }
}

/// Outcome of decoding one frame's pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
  /// Indices actually produced; the rest of the destination is zero-filled.
  pub pixels: usize,
  /// The zero-length sub-block closing the image data was consumed.
  pub terminated: bool,
}

/// GIF-flavoured LZW decompressor.
///
/// The dictionary tables and pixel stack are allocated once and reused for
/// every frame of a stream.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct LzwDecoder {
  #[derivative(Debug = "ignore")]
  prefix: Vec<u16>,
  #[derivative(Debug = "ignore")]
  suffix: Vec<u8>,
  stack: PixelStack,
  #[derivative(Debug = "ignore")]
  block: Block,
}

impl Default for LzwDecoder {
  fn default() -> Self {
    Self::new()
  }
}

impl LzwDecoder {
  pub fn new() -> Self {
    Self {
      prefix: vec![0; MAX_STACK_SIZE],
      suffix: vec![0; MAX_STACK_SIZE],
      stack: PixelStack::new(),
      block: [0; MAX_BLOCK_SIZE + 1],
    }
  }

  /// Decodes indices into `dst`, starting at the LZW minimum code size byte.
  ///
  /// Stops at the end-of-information code, at a code past the dictionary, at
  /// the end of the sub-block chain, when the pixel stack is exhausted or when
  /// `dst` is full. Never writes past `dst.len()`; indices after an early stop
  /// are zero.
  pub fn decode(&mut self, reader: &mut ByteReader<'_>, dst: &mut [u8]) -> Decoded {
    let decoded = self.run(reader, dst.len(), |i, pixel| dst[i] = pixel);
    dst[decoded.pixels..].fill(0);
    decoded
  }

  /// Runs the decoder over `npix` indices without keeping them, leaving the
  /// reader after the image data.
  pub fn skip(&mut self, reader: &mut ByteReader<'_>, npix: usize) -> Decoded {
    self.run(reader, npix, |_, _| {})
  }

  fn run<F>(&mut self, reader: &mut ByteReader<'_>, npix: usize, mut emit: F) -> Decoded
  where
    F: FnMut(usize, u8),
  {
    let data_size = reader.read_byte() as u32;
    if data_size > MAX_MIN_CODE_SIZE {
      reader.fail(GifError::Format(format!(
        "LZW minimum code size {} out of range",
        data_size
      )));
    }
    if reader.is_err() {
      return Decoded {
        pixels: 0,
        terminated: false,
      };
    }

    let clear = 1u32 << data_size;
    let end_of_information = clear + 1;
    let mut available = clear + 2;
    let mut old_code: Option<u32> = None;
    let mut code_size = data_size + 1;
    let mut code_mask = (1u32 << code_size) - 1;
    for code in 0..clear as usize {
      self.prefix[code] = 0;
      self.suffix[code] = code as u8;
    }
    self.stack.clear();

    let mut datum: u32 = 0;
    let mut bits: u32 = 0;
    let mut count: usize = 0;
    let mut bi: usize = 0;
    let mut first: u8 = 0;
    let mut pi: usize = 0;
    let mut terminated = false;

    while pi < npix {
      if let Some(pixel) = self.stack.pop() {
        emit(pi, pixel);
        pi += 1;
        continue;
      }
      if bits < code_size {
        // Load bytes until there are enough bits for a code.
        if count == 0 {
          count = reader.read_sub_block(&mut self.block);
          if count == 0 {
            terminated = !reader.is_err();
            break;
          }
          bi = 0;
        }
        datum += (self.block[bi] as u32) << bits;
        bits += 8;
        bi += 1;
        count -= 1;
        continue;
      }

      let code = datum & code_mask;
      datum >>= code_size;
      bits -= code_size;

      if code > available || code == end_of_information {
        break;
      }
      if code == clear {
        code_size = data_size + 1;
        code_mask = (1u32 << code_size) - 1;
        available = clear + 2;
        old_code = None;
        continue;
      }
      let prev = match old_code {
        Some(prev) => prev,
        None => {
          first = self.suffix[code as usize];
          if self.stack.push(first).is_err() {
            break;
          }
          old_code = Some(code);
          continue;
        }
      };

      first = match self.expand(code, prev, clear, available, first) {
        Ok(first) => first,
        Err(err) => {
          trace!(%err, pixels = pi, "lzw expansion stopped");
          break;
        }
      };

      if (available as usize) < MAX_STACK_SIZE {
        self.prefix[available as usize] = prev as u16;
        self.suffix[available as usize] = first;
        available += 1;
        if available & code_mask == 0 && (available as usize) < MAX_STACK_SIZE {
          code_size += 1;
          code_mask += available;
        }
      }
      old_code = Some(code);
    }

    Decoded {
      pixels: pi,
      terminated,
    }
  }

  /// Pushes the expansion of `code` onto the pixel stack, last byte first.
  ///
  /// Returns the first byte of the expansion.
  fn expand(&mut self, code: u32, prev: u32, clear: u32, available: u32, first: u8) -> Result<u8> {
    let mut code = code;
    if code == available {
      self.stack.push(first)?;
      code = prev;
    }
    while code > clear {
      self.stack.push(self.suffix[code as usize])?;
      code = self.prefix[code as usize] as u32;
    }
    let first = self.suffix[code as usize];
    self.stack.push(first)?;
    Ok(first)
  }
}
