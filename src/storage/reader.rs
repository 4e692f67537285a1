//! Cassette file reader

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use super::format::Cassette;
use crate::{ReelError, Result};

/// Load an entire cassette into memory
///
/// # Errors
///
/// Returns `FileNotFound` if the path does not exist, `Io` if it cannot be
/// read, and `MalformedCassette` if a record does not parse
pub fn read_cassette(path: &Path) -> Result<Cassette> {
    let data = fs::read(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            ReelError::FileNotFound(path.display().to_string())
        } else {
            ReelError::Io(e)
        }
    })?;

    let cassette = Cassette::decode(path, &data)?;

    debug!(
        "Read cassette {}: {} interactions ({} bytes)",
        path.display(),
        cassette.len(),
        data.len()
    );

    Ok(cassette)
}
