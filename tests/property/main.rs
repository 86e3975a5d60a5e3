//! Property tests for snapshot shard partitioning.
//!
//! Run with: `cargo test --test property`

use proptest::prelude::*;

use statusd_rs::status::IndexSnapshot;

fn raw_entry(path: &str) -> git2::IndexEntry {
    git2::IndexEntry {
        ctime: git2::IndexTime::new(0, 0),
        mtime: git2::IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        file_size: 0,
        id: git2::Oid::zero(),
        flags: (path.len().min(0xFFF)) as u16,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

/// Drops duplicates and file/directory conflicts (a path that is also a
/// prefix directory of another) so the set is a valid index shape.
fn sanitize(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths.dedup();
    let all = paths.clone();
    paths
        .into_iter()
        .filter(|path| {
            let prefix = format!("{path}/");
            !all.iter().any(|other| other.starts_with(&prefix))
        })
        .collect()
}

fn snapshot_of(paths: &[String], workers: usize) -> IndexSnapshot {
    let mut index = git2::Index::new().unwrap();
    for path in paths {
        index.add(&raw_entry(path)).unwrap();
    }
    IndexSnapshot::build(&index, None, workers)
}

fn top_dir(path: &[u8]) -> &[u8] {
    match path.iter().position(|&b| b == b'/') {
        Some(i) => &path[..i],
        None => path,
    }
}

// Final segments may carry a dotted suffix: "a.b" sorts between "a" and
// "a/…", the shape that trips naive prefix lookups.
fn path_strategy() -> impl Strategy<Value = String> {
    (
        proptest::collection::vec("[a-d]{1,3}", 0..3),
        "[a-d]{1,3}(\\.[a-d]{1,2})?",
    )
        .prop_map(|(mut segments, file)| {
            segments.push(file);
            segments.join("/")
        })
}

proptest! {
    #[test]
    fn shards_partition_the_sorted_entries(
        paths in proptest::collection::vec(path_strategy(), 0..200),
        workers in 1usize..8,
    ) {
        let paths = sanitize(paths);
        let snap = snapshot_of(&paths, workers);

        // Sorted and complete.
        prop_assert_eq!(snap.len(), paths.len());
        let mut sorted = paths.clone();
        sorted.sort();
        for (entry, expected) in snap.entries().iter().zip(&sorted) {
            prop_assert_eq!(snap.path(entry), expected.as_bytes());
        }

        let shards = snap.shards();
        if paths.is_empty() {
            prop_assert!(shards.is_empty());
            return Ok(());
        }

        // Disjoint, contiguous, covering.
        prop_assert_eq!(shards[0].start, 0);
        prop_assert_eq!(shards.last().unwrap().end, snap.len());
        for pair in shards.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
        }
        for shard in shards {
            prop_assert!(shard.start < shard.end);
        }

        // Boundaries only where the top-level directory changes, so no
        // top-level directory is split across shards.
        for pair in shards.windows(2) {
            let last = snap.path(&snap.entries()[pair[0].end - 1]);
            let first = snap.path(&snap.entries()[pair[1].start]);
            prop_assert_ne!(top_dir(last), top_dir(first));
        }
    }

    #[test]
    fn tracked_names_are_always_found(
        paths in proptest::collection::vec(path_strategy(), 1..100),
    ) {
        let paths = sanitize(paths);
        let snap = snapshot_of(&paths, 4);

        for path in &paths {
            prop_assert!(snap.contains_name(path.as_bytes()));
            // Every ancestor directory is tracked as a prefix.
            let bytes = path.as_bytes();
            for (i, &b) in bytes.iter().enumerate() {
                if b == b'/' {
                    prop_assert!(snap.contains_name(&bytes[..i]));
                }
            }
        }
    }
}
