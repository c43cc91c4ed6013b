//! Content digest of a build context.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::TagPolicyError;

/// Directories that never contribute to the digest.
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Compute a deterministic digest over every file under `context`.
///
/// Files are visited in sorted path order and each contributes its
/// relative path (with `/` separators) and its contents, each prefixed by
/// its length as a big-endian `u64`. Renames, edits, additions and removals
/// all change the result.
/// Returns the first 16 bytes of the SHA-256 as lowercase hex.
pub fn context_digest(context: &Path) -> Result<String, TagPolicyError> {
    let context_err = |source| TagPolicyError::Context {
        path: context.to_path_buf(),
        source,
    };

    if !context.is_dir() {
        return Err(context_err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "build context is not a directory",
        )));
    }

    let mut hasher = Sha256::new();
    let walker = WalkDir::new(context)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .is_some_and(|n| SKIPPED_DIRS.contains(&n)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| context_err(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(context)
            .unwrap_or(entry.path());
        let relative: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();

        let relative = relative.join("/");
        let contents = fs::read(entry.path()).map_err(context_err)?;
        update_framed(&mut hasher, relative.as_bytes());
        update_framed(&mut hasher, &contents);
    }

    let result = hasher.finalize();
    Ok(hex::encode(&result[..16]))
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
