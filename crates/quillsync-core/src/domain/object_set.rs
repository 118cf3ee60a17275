//! Path-keyed object set algebra
//!
//! An [`ObjectSet`] maps forward-slash paths to [`ObjectInfo`] values
//! and provides the set operations the reconciliation planner is built
//! from. All operations are pure: they build new sets and never mutate
//! their operands. On key conflicts values are taken from the left
//! operand.
//!
//! Backed by a `BTreeMap` so iteration order - and with it the order
//! of planned actions - is deterministic.

use std::collections::BTreeMap;

use crate::domain::object_info::ObjectInfo;

/// Mapping `full path -> ObjectInfo` with key-based set algebra.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSet {
    entries: BTreeMap<String, ObjectInfo>,
}

impl ObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// O(log n) lookup by exact path.
    pub fn find(&self, full_path: &str) -> Option<&ObjectInfo> {
        if full_path.is_empty() {
            return None;
        }
        self.entries.get(full_path)
    }

    pub fn contains(&self, full_path: &str) -> bool {
        self.find(full_path).is_some()
    }

    /// Inserts keyed by the object's own `full_path`, replacing any
    /// previous entry. Keeps the set internally consistent: every key
    /// equals its value's path.
    pub fn insert(&mut self, obj: ObjectInfo) {
        if !obj.full_path.is_empty() {
            self.entries.insert(obj.full_path.clone(), obj);
        }
    }

    /// Inserts under an explicit key. Needed for sets whose keys have
    /// been re-rooted by [`subset_by_path`](Self::subset_by_path)
    /// while the values keep their original paths.
    pub fn insert_at(&mut self, key: impl Into<String>, obj: ObjectInfo) {
        let key = key.into();
        if !key.is_empty() {
            self.entries.insert(key, obj);
        }
    }

    pub fn remove(&mut self, full_path: &str) -> Option<ObjectInfo> {
        if full_path.is_empty() {
            return None;
        }
        self.entries.remove(full_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ObjectInfo)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &ObjectInfo> {
        self.entries.values()
    }

    /// All entries under `dir`, re-keyed relative to it.
    ///
    /// Files qualify through their parent directory, so a file
    /// directly inside `dir` is included while `dir` itself is not.
    /// Directories qualify by prefix and are excluded from being their
    /// own parent. Result keys are stripped of the `dir/` prefix.
    /// An empty `dir` returns a copy of the whole set.
    pub fn subset_by_path(&self, dir: &str) -> Self {
        if dir.is_empty() {
            return self.clone();
        }
        let mut subset = Self::new();
        for (key, obj) in &self.entries {
            let base = if obj.is_dir {
                if key == dir {
                    continue;
                }
                key.as_str()
            } else {
                match parent_of(key) {
                    Some(parent) => parent,
                    None => continue,
                }
            };
            if base == dir || base.starts_with(dir) && base.as_bytes().get(dir.len()) == Some(&b'/')
            {
                let stripped = key.strip_prefix(dir).and_then(|k| k.strip_prefix('/'));
                subset.insert_at(stripped.unwrap_or(key), obj.clone());
            }
        }
        subset
    }

    /// Entries for which the predicate holds.
    pub fn subset_by_predicate(&self, mut pred: impl FnMut(&str, &ObjectInfo) -> bool) -> Self {
        let mut subset = Self::new();
        for (key, obj) in &self.entries {
            if pred(key, obj) {
                subset.insert_at(key.clone(), obj.clone());
            }
        }
        subset
    }

    /// Key-based difference: entries of `self` whose key is absent
    /// from `other`.
    pub fn subtract(&self, other: &Self) -> Self {
        self.subset_by_predicate(|key, _| !other.entries.contains_key(key))
    }

    /// Key-based intersection; values come from `self`.
    pub fn intersect(&self, other: &Self) -> Self {
        self.subset_by_predicate(|key, _| other.entries.contains_key(key))
    }

    /// Key-based union; on conflict the value from `self` wins.
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = other.clone();
        for (key, obj) in &self.entries {
            merged.insert_at(key.clone(), obj.clone());
        }
        merged
    }

    /// Entries whose key exists in both sets but whose values disagree
    /// per `eq`; values come from `self`.
    pub fn diff_by_equality(
        &self,
        other: &Self,
        mut eq: impl FnMut(&ObjectInfo, &ObjectInfo) -> bool,
    ) -> Self {
        let mut diff = Self::new();
        for (key, obj) in &self.entries {
            if let Some(theirs) = other.entries.get(key) {
                if !eq(obj, theirs) {
                    diff.insert_at(key.clone(), obj.clone());
                }
            }
        }
        diff
    }
}

/// Parent directory of a forward-slash path, `None` when the path has
/// no separator.
pub fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}
