//! The weights-file codec.
//!
//! A weights file is the entire weight vector dumped as contiguous
//! little-endian `i16` values, no header. Everything else is carried by the
//! file name: `WEIGHTS_<YYYY-MM-DD_HH-MM-SS>.16w<count>` records when the
//! weights were saved, their bit width, and how many there are.

use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use crate::Weight;

/// Why a weights file could not be loaded.
#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum WeightsFileError {
    /// The file could not be opened or read.
    #[display("reading weights data: {_0}")]
    Io(io::Error),

    /// The file length does not match the weight count the events require.
    #[display(
        "weights file is {actual} bytes but {expected} bytes are required for {count} weights"
    )]
    #[from(skip)]
    SizeMismatch {
        expected: u64,
        actual: u64,
        count: usize,
    },
}

/// Loads exactly `count` weights from `path`.
pub fn read_weights(path: &Path, count: usize) -> Result<Vec<Weight>, WeightsFileError> {
    let mut file = File::open(path)?;
    let actual = file.metadata()?.len();
    let expected = count as u64 * 2;
    if actual != expected {
        return Err(WeightsFileError::SizeMismatch {
            expected,
            actual,
            count,
        });
    }

    let mut bytes = Vec::with_capacity(actual as usize);
    file.read_to_end(&mut bytes)?;
    let weights = bytes
        .chunks_exact(2)
        .map(|pair| Weight::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(weights)
}

/// The canonical file name for a weight vector saved at `timestamp`
/// (formatted `%Y-%m-%d_%H-%M-%S`).
#[must_use]
pub fn file_name(timestamp: &str, count: usize) -> String {
    format!("WEIGHTS_{timestamp}.16w{count}")
}

/// Writes `weights` under the canonical name inside `dir` and returns the
/// path of the new file.
pub fn write_weights(dir: &Path, timestamp: &str, weights: &[Weight]) -> io::Result<PathBuf> {
    let path = dir.join(file_name(timestamp, weights.len()));
    let mut file = File::create(&path)?;
    let mut bytes = Vec::with_capacity(weights.len() * 2);
    for weight in weights {
        bytes.extend_from_slice(&weight.to_le_bytes());
    }
    file.write_all(&bytes)?;
    Ok(path)
}
