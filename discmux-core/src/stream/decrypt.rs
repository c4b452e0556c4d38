//! Block-decryption capability.
//!
//! Native providers (AACS, CSS, ...) live outside this crate. They are handed
//! to each [`DecryptedUnitStream`](super::DecryptedUnitStream) explicitly at
//! construction time; there is no process-wide registration hook.

use crate::catalog::Segment;
use crate::error::CoreResult;
use thiserror::Error;

/// Failure reported by a decryption provider for a single unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unit {unit}: {message}")]
pub struct DecryptError {
    pub unit: u64,
    pub message: String,
}

impl DecryptError {
    pub fn new(unit: u64, message: impl Into<String>) -> Self {
        Self {
            unit,
            message: message.into(),
        }
    }
}

/// Decrypts one fixed-size unit in place.
///
/// `buffer.len()` always equals the unit size of the stream the decryptor
/// was handed to. `unit_index` is the zero-based unit number within the
/// segment.
pub trait UnitDecryptor: Send {
    fn decrypt_unit(&mut self, unit_index: u64, buffer: &mut [u8]) -> Result<(), DecryptError>;
}

impl<D: UnitDecryptor + ?Sized> UnitDecryptor for Box<D> {
    fn decrypt_unit(&mut self, unit_index: u64, buffer: &mut [u8]) -> Result<(), DecryptError> {
        (**self).decrypt_unit(unit_index, buffer)
    }
}

impl<D: UnitDecryptor + ?Sized> UnitDecryptor for &mut D {
    fn decrypt_unit(&mut self, unit_index: u64, buffer: &mut [u8]) -> Result<(), DecryptError> {
        (**self).decrypt_unit(unit_index, buffer)
    }
}

/// Leaves units untouched. Used for unencrypted discs and decrypted backups.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDecryptor;

impl UnitDecryptor for PassthroughDecryptor {
    fn decrypt_unit(&mut self, _unit_index: u64, _buffer: &mut [u8]) -> Result<(), DecryptError> {
        Ok(())
    }
}

/// Supplies a fresh decryptor for each segment that gets opened.
pub trait DecryptorProvider: Send + Sync {
    fn decryptor_for(&self, segment: &Segment) -> CoreResult<Box<dyn UnitDecryptor>>;
}

impl DecryptorProvider for PassthroughDecryptor {
    fn decryptor_for(&self, _segment: &Segment) -> CoreResult<Box<dyn UnitDecryptor>> {
        Ok(Box::new(PassthroughDecryptor))
    }
}
