use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::domain::error::{RelayError, RelayResult};

/// Open the tee file for appending, buffered until the display flushes.
///
/// When the file already has content a blank line separates this session's
/// bytes from the previous ones.
pub fn open_tee(path: &Path) -> RelayResult<BufWriter<File>> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| tee_error(path, e))?;

    let existing = file.metadata().map_err(|e| tee_error(path, e))?.len();
    if existing > 0 {
        file.write_all(b"\n").map_err(|e| tee_error(path, e))?;
    }

    info!("teeing received data to {}", path.display());
    Ok(BufWriter::new(file))
}

fn tee_error(path: &Path, err: io::Error) -> RelayError {
    RelayError::Config {
        message: format!("Could not open tee file '{}': {}", path.display(), err),
    }
}
