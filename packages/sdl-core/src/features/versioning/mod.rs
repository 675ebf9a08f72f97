//! Version manager: scan-vs-head change detection
//!
//! Compares a fresh repo scan (`file -> content hash`) against the per-file
//! fingerprints recorded at the head version and produces the pass's
//! `{added, modified, removed}` file sets. A file whose hash is unchanged is
//! skipped entirely; a scan with an empty delta creates no version.

use std::collections::BTreeMap;
use std::collections::HashMap;

/// File sets for one indexing pass, each sorted for determinism.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDelta {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl ScanDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Files needing extraction this pass.
    pub fn changed(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }
}

/// Diff the previous head fingerprints against the current scan.
pub fn compute_delta(
    previous: &HashMap<String, String>,
    current: &BTreeMap<String, String>,
) -> ScanDelta {
    let mut delta = ScanDelta::default();

    for (path, hash) in current {
        match previous.get(path) {
            None => delta.added.push(path.clone()),
            Some(prev) if prev != hash => delta.modified.push(path.clone()),
            Some(_) => {}
        }
    }

    let mut removed: Vec<String> = previous
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect();
    removed.sort();
    delta.removed = removed;

    delta
}
