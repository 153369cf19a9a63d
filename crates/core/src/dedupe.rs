use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{Result, SorterError};

const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Compares one source file against any number of candidates.
///
/// Sizes are compared first; the source digest is computed at most once and only
/// when some candidate has a matching size.
#[derive(Debug)]
pub struct ContentComparator {
    source: PathBuf,
    size_bytes: u64,
    digest: Option<blake3::Hash>,
}

impl ContentComparator {
    pub fn for_source(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|source| comparison_failed(path, source))?;
        Ok(Self {
            source: path.to_path_buf(),
            size_bytes: metadata.len(),
            digest: None,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// True when `candidate` exists and is byte-identical to the source.
    pub fn matches(&mut self, candidate: &Path) -> Result<bool> {
        let metadata = match fs::metadata(candidate) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(comparison_failed(candidate, err)),
        };
        if metadata.len() != self.size_bytes {
            return Ok(false);
        }

        let source_digest = match self.digest {
            Some(digest) => digest,
            None => {
                let digest = hash_file(&self.source)?;
                self.digest = Some(digest);
                digest
            }
        };
        Ok(hash_file(candidate)? == source_digest)
    }
}

pub fn is_duplicate(path_a: &Path, path_b: &Path) -> Result<bool> {
    if !path_b.exists() {
        return Ok(false);
    }
    ContentComparator::for_source(path_a)?.matches(path_b)
}

/// Streams the file through BLAKE3 in fixed-size chunks.
pub fn hash_file(path: &Path) -> Result<blake3::Hash> {
    let file = File::open(path).map_err(|source| comparison_failed(path, source))?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0_u8; HASH_CHUNK_BYTES];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(bytes_read) => bytes_read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(comparison_failed(path, err)),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

fn comparison_failed(path: &Path, source: io::Error) -> SorterError {
    SorterError::ComparisonFailed {
        path: path.to_path_buf(),
        source,
    }
}
