use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::error::GifError;

/// Largest payload a single GIF data sub-block can carry.
pub const MAX_BLOCK_SIZE: usize = 255;

/// Scratch buffer for one data sub-block.
pub type Block = [u8; MAX_BLOCK_SIZE + 1];

/// Forward-only little-endian reader over an in-memory GIF.
///
/// A read past the end of the buffer records a sticky format error instead of
/// panicking. Once the error is set every read returns zero and consumes
/// nothing, so callers can finish a block and check [`ByteReader::is_err`]
/// afterwards.
pub struct ByteReader<'a> {
  bytes: &'a [u8],
  offset: usize,
  error: Option<GifError>,
}

impl<'a> ByteReader<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    Self {
      bytes,
      offset: 0,
      error: None,
    }
  }

  pub fn position(&self) -> usize {
    self.offset
  }

  pub fn remaining(&self) -> usize {
    self.bytes.len().saturating_sub(self.offset)
  }

  pub fn is_err(&self) -> bool {
    self.error.is_some()
  }

  pub fn error(&self) -> Option<&GifError> {
    self.error.as_ref()
  }

  pub fn take_error(&mut self) -> Option<GifError> {
    self.error.take()
  }

  /// Records `err` unless an earlier error is already pending.
  pub fn fail(&mut self, err: GifError) {
    if self.error.is_none() {
      warn!(offset = self.offset, %err, "gif stream error");
      self.error = Some(err);
    }
  }

  fn underflow(&mut self, wanted: usize) {
    let msg = format!(
      "wanted {} bytes at offset {}, {} left",
      wanted,
      self.offset,
      self.remaining()
    );
    self.fail(GifError::Format(msg));
  }

  pub fn read_byte(&mut self) -> u8 {
    if self.is_err() {
      return 0;
    }
    match self.bytes.get(self.offset) {
      Some(byte) => {
        self.offset += 1;
        *byte
      }
      None => {
        self.underflow(1);
        0
      }
    }
  }

  pub fn read_short(&mut self) -> u16 {
    match self.read_bytes(2) {
      Some(bytes) => LittleEndian::read_u16(bytes),
      None => 0,
    }
  }

  /// Reads exactly `len` bytes, or nothing at all if fewer remain.
  pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
    if self.is_err() {
      return None;
    }
    if len > self.remaining() {
      self.underflow(len);
      return None;
    }
    let bytes = &self.bytes[self.offset..self.offset + len];
    self.offset += len;
    Some(bytes)
  }

  /// Reads one length-prefixed data sub-block into `block`.
  ///
  /// Returns the number of payload bytes read; 0 marks the end of the
  /// sub-block chain, or a truncated block (which also sets the error).
  pub fn read_sub_block(&mut self, block: &mut Block) -> usize {
    let size = self.read_byte() as usize;
    if size == 0 {
      return 0;
    }
    let start = self.offset;
    match self.read_bytes(size) {
      Some(bytes) => {
        block[..size].copy_from_slice(bytes);
        size
      }
      None => {
        self.error = Some(GifError::TruncatedSubBlock { offset: start });
        0
      }
    }
  }

  /// Skips sub-blocks up to and including the zero-length terminator.
  pub fn skip_sub_blocks(&mut self) {
    loop {
      let size = self.read_byte() as usize;
      if size == 0 || self.is_err() {
        break;
      }
      if self.read_bytes(size).is_none() {
        break;
      }
    }
  }

  /// Repositions to an absolute offset, e.g. a frame's saved pixel data start.
  pub fn seek(&mut self, offset: usize) {
    if self.is_err() {
      return;
    }
    if offset > self.bytes.len() {
      self.fail(GifError::Format(format!(
        "seek to {} past end of {} bytes",
        offset,
        self.bytes.len()
      )));
      return;
    }
    self.offset = offset;
  }
}
