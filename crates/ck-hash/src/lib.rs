#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

const CHUNK_SIZE: usize = 4096;

/// Errors here are always fatal to the whole hash computation: a partial
/// or best-effort hash must never be returned.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The fixture's own metadata files are excluded from its hash, so the
/// hash is a function of test content only, not of the bookkeeping
/// attached to it.
#[must_use]
pub fn is_metadata_file(name: &str) -> bool {
    name.starts_with("cat") && name.ends_with(".yaml")
}

/// Compute the content identity of a fixture directory.
///
/// Traversal is deterministic regardless of filesystem enumeration
/// order: at each level, regular files are fed in lexicographic
/// (case-sensitive) name order before subdirectories are descended, and
/// subdirectories are visited in that same order. Each file contributes
/// its `/`-joined path relative to `root` (UTF-8) followed by its raw
/// bytes, so renames and moves change the hash even when content does
/// not. Hashing an effectively empty directory yields the SHA-256
/// empty-input digest.
pub fn hash_directory(root: &Path) -> Result<String, HashError> {
    let mut hasher = Sha256::new();
    hash_level(&mut hasher, root, String::new())?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_level(hasher: &mut Sha256, dir: &Path, rel_prefix: String) -> Result<(), HashError> {
    let mut files = Vec::new();
    let mut subdirs = Vec::new();

    let entries = fs::read_dir(dir).map_err(|source| HashError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| HashError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if path.is_dir() {
            subdirs.push((name, path));
        } else {
            files.push((name, path));
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    subdirs.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, path) in files {
        if is_metadata_file(&name) {
            continue;
        }
        let rel = join_rel(&rel_prefix, &name);
        hasher.update(rel.as_bytes());
        hash_file_contents(hasher, &path)?;
    }

    for (name, path) in subdirs {
        hash_level(hasher, &path, join_rel(&rel_prefix, &name))?;
    }

    Ok(())
}

// Relative paths always use '/' so the hash is identical across
// platforms.
fn join_rel(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}

fn hash_file_contents(hasher: &mut Sha256, path: &Path) -> Result<(), HashError> {
    let mut file = File::open(path).map_err(|source| HashError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut chunk).map_err(|source| HashError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if read == 0 {
            return Ok(());
        }
        hasher.update(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{hash_directory, is_metadata_file};

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, body).expect("write");
    }

    #[test]
    fn metadata_filter_matches_prefix_and_extension() {
        assert!(is_metadata_file("cat.yaml"));
        assert!(is_metadata_file("cat001.yaml"));
        assert!(!is_metadata_file("cat.yml"));
        assert!(!is_metadata_file("concat.yaml"));
        assert!(!is_metadata_file("dog.yaml"));
    }

    #[test]
    fn hash_is_stable_across_invocations() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/main.go", "package main\n");
        write(dir.path(), "README.md", "leap\n");

        let first = hash_directory(dir.path()).expect("hash");
        let second = hash_directory(dir.path()).expect("hash");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn metadata_files_do_not_affect_the_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "solution.py", "x = 1\n");

        let before = hash_directory(dir.path()).expect("hash");
        write(dir.path(), "cat.yaml", "uuid: abc\nhash: def\n");
        write(dir.path(), "cat002.yaml", "anything: else\n");
        let with_metadata = hash_directory(dir.path()).expect("hash");
        assert_eq!(before, with_metadata);

        write(dir.path(), "cat.yaml", "uuid: rewritten entirely\n");
        assert_eq!(before, hash_directory(dir.path()).expect("hash"));
    }

    #[test]
    fn content_changes_change_the_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "solution.py", "x = 1\n");
        let before = hash_directory(dir.path()).expect("hash");

        write(dir.path(), "solution.py", "x = 2\n");
        assert_ne!(before, hash_directory(dir.path()).expect("hash"));
    }

    #[test]
    fn renames_change_the_hash_even_with_identical_bytes() {
        let left = tempfile::tempdir().expect("tempdir");
        let right = tempfile::tempdir().expect("tempdir");
        write(left.path(), "a.txt", "same body\n");
        write(right.path(), "b.txt", "same body\n");

        let l = hash_directory(left.path()).expect("hash");
        let r = hash_directory(right.path()).expect("hash");
        assert_ne!(l, r);
    }

    #[test]
    fn moves_between_subdirectories_change_the_hash() {
        let left = tempfile::tempdir().expect("tempdir");
        let right = tempfile::tempdir().expect("tempdir");
        write(left.path(), "src/lib.rs", "pub fn f() {}\n");
        write(right.path(), "lib/src.rs", "pub fn f() {}\n");

        assert_ne!(
            hash_directory(left.path()).expect("hash"),
            hash_directory(right.path()).expect("hash")
        );
    }

    #[test]
    fn added_files_change_the_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "one.txt", "1");
        let before = hash_directory(dir.path()).expect("hash");
        write(dir.path(), "two.txt", "2");
        assert_ne!(before, hash_directory(dir.path()).expect("hash"));
    }

    #[test]
    fn metadata_only_directory_hashes_to_the_empty_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "cat.yaml", "uuid: abc\n");
        assert_eq!(hash_directory(dir.path()).expect("hash"), EMPTY_SHA256);

        let empty = tempfile::tempdir().expect("tempdir");
        assert_eq!(hash_directory(empty.path()).expect("hash"), EMPTY_SHA256);
    }

    #[test]
    fn missing_root_is_a_fatal_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gone = dir.path().join("never-created");
        let err = hash_directory(&gone).expect_err("must fail");
        assert!(err.to_string().contains("never-created"));
    }

    #[test]
    fn identical_trees_hash_identically() {
        let left = tempfile::tempdir().expect("tempdir");
        let right = tempfile::tempdir().expect("tempdir");
        for root in [left.path(), right.path()] {
            write(root, "exercises/leap/leap.go", "package leap\n");
            write(root, "exercises/leap/leap_test.go", "package leap // test\n");
            write(root, "notes.txt", "n\n");
        }
        assert_eq!(
            hash_directory(left.path()).expect("hash"),
            hash_directory(right.path()).expect("hash")
        );
    }
}
