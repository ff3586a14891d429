#![forbid(unsafe_code)]

//! Property-based suite for directory content hashing.
//!
//! Strategy generators produce arbitrary small directory trees; the
//! properties pin the identity contract: determinism, insensitivity to
//! fixture metadata, and sensitivity to content, names, and structure.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use proptest::prelude::*;

use ck_hash::hash_directory;

type Tree = BTreeMap<Vec<String>, Vec<u8>>;

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

/// One path segment. Lowercase only, so trees are valid on
/// case-insensitive filesystems too.
fn arb_segment() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

/// A relative file path as segments, nested up to three levels deep.
fn arb_rel_path() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(arb_segment(), 1..=3)
}

/// A directory tree as path -> contents. Paths where one file would
/// have to double as another file's parent directory are discarded.
fn arb_tree() -> impl Strategy<Value = Tree> {
    proptest::collection::btree_map(
        arb_rel_path(),
        proptest::collection::vec(any::<u8>(), 0..64),
        1..8,
    )
    .prop_filter("no file may also be a directory", |tree| {
        let paths: Vec<&Vec<String>> = tree.keys().collect();
        !paths.iter().any(|file| {
            paths
                .iter()
                .any(|other| other.len() > file.len() && other.starts_with(file))
        })
    })
}

fn materialize(root: &Path, tree: &Tree) {
    for (segments, contents) in tree {
        let mut path = root.to_path_buf();
        for segment in segments {
            path.push(segment);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write");
    }
}

fn file_path(root: &Path, segments: &[String]) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in segments {
        path.push(segment);
    }
    path
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Two independent materializations of the same tree hash identically,
    /// whatever order the filesystem hands entries back in.
    #[test]
    fn prop_hash_is_deterministic(tree in arb_tree()) {
        let left = tempfile::tempdir().expect("tempdir");
        let right = tempfile::tempdir().expect("tempdir");
        materialize(left.path(), &tree);
        materialize(right.path(), &tree);
        prop_assert_eq!(
            hash_directory(left.path()).expect("hash"),
            hash_directory(right.path()).expect("hash")
        );
    }

    /// Adding, rewriting, or removing `cat*.yaml` metadata never moves
    /// the hash.
    #[test]
    fn prop_metadata_files_never_affect_hash(tree in arb_tree(), noise in any::<u8>()) {
        let dir = tempfile::tempdir().expect("tempdir");
        materialize(dir.path(), &tree);
        let baseline = hash_directory(dir.path()).expect("hash");

        let meta = dir.path().join("cat.yaml");
        let numbered = dir.path().join(format!("cat{noise:03}.yaml"));
        fs::write(&meta, format!("uuid: {noise}\n")).expect("write");
        fs::write(&numbered, "anything: else\n").expect("write");
        prop_assert_eq!(&hash_directory(dir.path()).expect("hash"), &baseline);

        fs::write(&meta, "hash: rewritten\n").expect("write");
        prop_assert_eq!(&hash_directory(dir.path()).expect("hash"), &baseline);

        fs::remove_file(&meta).expect("rm");
        fs::remove_file(&numbered).expect("rm");
        prop_assert_eq!(&hash_directory(dir.path()).expect("hash"), &baseline);
    }

    /// Changing any one file's bytes changes the hash.
    #[test]
    fn prop_content_change_changes_hash(tree in arb_tree()) {
        let dir = tempfile::tempdir().expect("tempdir");
        materialize(dir.path(), &tree);
        let baseline = hash_directory(dir.path()).expect("hash");

        let (segments, contents) = tree.iter().next().expect("non-empty tree");
        let mut altered = contents.clone();
        altered.push(0x01);
        fs::write(file_path(dir.path(), segments), &altered).expect("write");
        prop_assert_ne!(hash_directory(dir.path()).expect("hash"), baseline);
    }

    /// Renaming a file changes the hash even when its bytes do not.
    #[test]
    fn prop_rename_changes_hash(tree in arb_tree()) {
        let dir = tempfile::tempdir().expect("tempdir");
        materialize(dir.path(), &tree);
        let baseline = hash_directory(dir.path()).expect("hash");

        let segments = tree.keys().next().expect("non-empty tree");
        let from = file_path(dir.path(), segments);
        // Segment names are at most six characters, so this cannot
        // collide with anything the generator produced.
        let to = from.with_file_name("renamedfile");
        fs::rename(&from, &to).expect("rename");
        prop_assert_ne!(hash_directory(dir.path()).expect("hash"), baseline);
    }

    /// Removing a file changes the hash.
    #[test]
    fn prop_removal_changes_hash(tree in arb_tree()) {
        let dir = tempfile::tempdir().expect("tempdir");
        materialize(dir.path(), &tree);
        let baseline = hash_directory(dir.path()).expect("hash");

        let segments = tree.keys().next().expect("non-empty tree");
        fs::remove_file(file_path(dir.path(), segments)).expect("rm");
        prop_assert_ne!(hash_directory(dir.path()).expect("hash"), baseline);
    }

    /// Moving a file between directories changes the hash even when the
    /// flat byte content of the tree is unchanged.
    #[test]
    fn prop_move_between_directories_changes_hash(tree in arb_tree()) {
        let dir = tempfile::tempdir().expect("tempdir");
        materialize(dir.path(), &tree);
        let baseline = hash_directory(dir.path()).expect("hash");

        let segments = tree.keys().next().expect("non-empty tree");
        let from = file_path(dir.path(), segments);
        let nest = dir.path().join("relocated0");
        fs::create_dir_all(&nest).expect("mkdir");
        fs::rename(&from, nest.join(from.file_name().expect("name"))).expect("rename");
        prop_assert_ne!(hash_directory(dir.path()).expect("hash"), baseline);
    }
}
