//! Seekable plaintext view over an encrypted, unit-aligned byte source.
//!
//! Disc content is decrypted one fixed-size unit at a time. The stream keeps
//! at most one decrypted unit in memory and never decrypts the same unit twice
//! while the cursor stays inside it.

use super::decrypt::UnitDecryptor;
use log::trace;
use std::io::{self, Read, Seek, SeekFrom};

/// Common unit sizes defined by the disc formats.
pub mod unit_sizes {
    /// DVD-Video sector.
    pub const DVD_SECTOR: usize = 2048;
    /// BluRay aligned unit (3 x 2048 byte sectors, 32 source packets).
    pub const BLURAY_ALIGNED_UNIT: usize = 6144;
}

/// Read-only, seekable stream of decrypted bytes.
///
/// The stream takes ownership of both the raw source and the decryptor. A
/// caller that wants to keep using a decryptor afterwards can pass `&mut D`
/// instead, or recover both halves with [`into_parts`](Self::into_parts).
pub struct DecryptedUnitStream<R, D> {
    raw: R,
    decryptor: D,
    raw_length: u64,
    unit_size: usize,
    /// Offset of the current unit; always a multiple of `unit_size`.
    unit_offset: u64,
    /// Cursor inside the current unit, `0 <= intra_offset < unit_size`.
    intra_offset: usize,
    buffer: Vec<u8>,
    /// Number of valid plaintext bytes in `buffer` for `unit_offset`.
    loaded: Option<usize>,
    /// Current position of the raw source, when known.
    raw_pos: Option<u64>,
}

impl<R: Read + Seek, D: UnitDecryptor> DecryptedUnitStream<R, D> {
    /// Wraps `raw`, whose total length is `raw_length` bytes.
    pub fn new(raw: R, raw_length: u64, unit_size: usize, decryptor: D) -> io::Result<Self> {
        if unit_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unit size must be non-zero",
            ));
        }

        Ok(Self {
            raw,
            decryptor,
            raw_length,
            unit_size,
            unit_offset: 0,
            intra_offset: 0,
            buffer: vec![0u8; unit_size],
            loaded: None,
            raw_pos: None,
        })
    }

    /// Wraps `raw`, determining its length by seeking to its end.
    pub fn from_source(mut raw: R, unit_size: usize, decryptor: D) -> io::Result<Self> {
        let raw_length = raw.seek(SeekFrom::End(0))?;
        raw.seek(SeekFrom::Start(0))?;
        let mut stream = Self::new(raw, raw_length, unit_size, decryptor)?;
        stream.raw_pos = Some(0);
        Ok(stream)
    }

    pub fn raw_length(&self) -> u64 {
        self.raw_length
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// Absolute plaintext position.
    pub fn position(&self) -> u64 {
        self.unit_offset + self.intra_offset as u64
    }

    /// Releases the raw source and the decryptor.
    pub fn into_parts(self) -> (R, D) {
        (self.raw, self.decryptor)
    }

    /// Reads and decrypts the unit at `unit_offset` into the buffer.
    fn load_unit(&mut self) -> io::Result<()> {
        let expected = (self.raw_length - self.unit_offset).min(self.unit_size as u64) as usize;

        if self.raw_pos != Some(self.unit_offset) {
            self.raw.seek(SeekFrom::Start(self.unit_offset))?;
            self.raw_pos = Some(self.unit_offset);
        }

        let mut filled = 0;
        while filled < expected {
            match self.raw.read(&mut self.buffer[filled..expected]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.raw_pos = None;
                    return Err(e);
                }
            }
        }
        self.raw_pos = Some(self.unit_offset + filled as u64);

        if filled < expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "source ended at {} bytes, expected {}",
                    self.unit_offset + filled as u64,
                    self.raw_length
                ),
            ));
        }

        // A trailing partial unit is zero padded; only `expected` bytes are served.
        self.buffer[filled..].fill(0);

        let unit_index = self.unit_offset / self.unit_size as u64;
        trace!("Decrypting unit {unit_index} ({expected} bytes)");
        self.decryptor
            .decrypt_unit(unit_index, &mut self.buffer)
            .map_err(io::Error::other)?;

        self.loaded = Some(expected);
        Ok(())
    }
}

impl<R: Read + Seek, D: UnitDecryptor> Read for DecryptedUnitStream<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position() >= self.raw_length {
            return Ok(0);
        }

        if self.loaded.is_none() {
            self.load_unit()?;
        }
        let valid = self.loaded.unwrap_or(0);
        if self.intra_offset >= valid {
            return Ok(0);
        }

        let n = buf.len().min(valid - self.intra_offset);
        buf[..n].copy_from_slice(&self.buffer[self.intra_offset..self.intra_offset + n]);
        self.intra_offset += n;

        if self.intra_offset == self.unit_size {
            self.unit_offset += self.unit_size as u64;
            self.intra_offset = 0;
            self.loaded = None;
        }

        Ok(n)
    }
}

impl<R: Read + Seek, D: UnitDecryptor> Seek for DecryptedUnitStream<R, D> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position().checked_add_signed(delta),
            SeekFrom::End(delta) => self.raw_length.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;

        let unit_size = self.unit_size as u64;
        let new_unit_offset = target - target % unit_size;
        let new_intra_offset = (target % unit_size) as usize;

        if new_unit_offset == self.unit_offset && self.loaded.is_some() {
            self.intra_offset = new_intra_offset;
            return Ok(target);
        }

        self.unit_offset = new_unit_offset;
        self.intra_offset = new_intra_offset;
        self.loaded = None;

        if new_unit_offset < self.raw_length {
            self.raw.seek(SeekFrom::Start(new_unit_offset))?;
            self.raw_pos = Some(new_unit_offset);
            // Mid-unit positions are served from a decrypted buffer right away;
            // unit-aligned ones wait for the next read.
            if new_intra_offset != 0 {
                self.load_unit()?;
            }
        }

        Ok(target)
    }
}
