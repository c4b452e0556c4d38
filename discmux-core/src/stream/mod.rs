//! Byte sources that back virtual inputs.

pub mod decrypt;
pub mod synthetic;
pub mod unit_stream;

pub use decrypt::{DecryptError, DecryptorProvider, PassthroughDecryptor, UnitDecryptor};
pub use unit_stream::{DecryptedUnitStream, unit_sizes};

use crate::error::CoreResult;
use std::io::{Cursor, Read};

/// A sequential byte source owned by a bridge.
pub type ByteSource = Box<dyn Read + Send>;

/// Opens a bridge's source once the consumer has connected.
///
/// Opening lazily means segments the transcoder never reads are never
/// decrypted.
pub type SourceOpener = Box<dyn FnOnce() -> CoreResult<ByteSource> + Send>;

/// Wraps an in-memory document as a lazily opened source.
pub fn memory_source(contents: impl Into<Vec<u8>>) -> SourceOpener {
    let bytes = contents.into();
    Box::new(move || Ok(Box::new(Cursor::new(bytes)) as ByteSource))
}
