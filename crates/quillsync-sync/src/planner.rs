//! Reconciliation planner
//!
//! Given three views of the book set - the local source tree, the
//! previous-sync history snapshot, and the device - derive an ordered,
//! minimal plan of mutations that converges them. The decision per
//! path follows the presence triple `(L, H, D)`:
//!
//! ```text
//! # | L H D | Cause                   | Operation
//! --+-------+-------------------------+---------------------------
//! 1 | - - - | nothing                 | ignore
//! 2 | - - + | manually added (D)      | ignore
//! 3 | + - - | manually added (L)      | copy to device
//! 4 | + - + | reconciled out of band  | ignore
//! 5 | - + - | manually removed (L,D)  | ignore
//! 6 | - + + | manually removed (L)    | remove from device
//! 7 | + + - | manually removed (D)    | remove from local
//! 8 | + + + | steady state            | ignore; re-copy on content change
//! ```
//!
//! A book changed locally since the last sync is case #8 detected by
//! fingerprint and handled as #3 (with a preliminary remove of the
//! stale device file). Case #7 is suppressed entirely - no removal,
//! no copy-back - under `ignore_device_removals` and in mail mode;
//! case #6 is additionally suppressed in mail mode, where the device
//! view is seeded from history because the true state is unobservable.
//!
//! The planner is pure over its inputs and performs no I/O besides
//! stat-ing parked thumbnail files. Removals precede copies; every
//! copy is preceded by the `mkdir` chain it needs; source removals are
//! followed by upward empty-directory cleanup.

use std::fmt;
use std::path::Path;

use chrono::Utc;

use quillsync_core::config::Config;
use quillsync_core::domain::object_set::parent_of;
use quillsync_core::{ObjectInfo, ObjectSet, SyncError, THUMBNAIL_FOLDER};

/// Which side of the sync an action runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Source,
    Destination,
}

/// What the action does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionVerb {
    MkDir,
    Remove,
    Copy,
}

impl ActionVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionVerb::MkDir => "MkDir",
            ActionVerb::Remove => "Remove",
            ActionVerb::Copy => "Copy",
        }
    }
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned mutation: a verb, the side to run it on, and the
/// subject object.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub target: Target,
    pub verb: ActionVerb,
    pub object: ObjectInfo,
}

impl Action {
    fn new(target: Target, verb: ActionVerb, object: ObjectInfo) -> Self {
        tracing::debug!(
            action = verb.as_str(),
            subject = if object.is_dir { "directory" } else { "file" },
            object = %object.full_path,
            "Making action"
        );
        Self {
            target,
            verb,
            object,
        }
    }
}

/// Planner output: the ordered actions plus the mutated source-rooted
/// set to persist as the next history snapshot.
#[derive(Debug)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub snapshot: ObjectSet,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlannerOptions {
    /// Do not respect book removals performed on the device (case #7).
    pub ignore_device_removals: bool,
    /// Mail delivery: the device is write-only, its view is seeded
    /// from history, and only copy actions make sense.
    pub mail_mode: bool,
}

/// Computes the action plan from the three enumerated sets.
pub fn prepare(
    source: ObjectSet,
    history: ObjectSet,
    device: ObjectSet,
    cfg: &Config,
    thumbs_dir: Option<&Path>,
    opts: PlannerOptions,
) -> Result<Plan, SyncError> {
    let mut src_all = source;
    let mut dst_all = if opts.mail_mode {
        // no view into the device over mail - assume it still holds
        // what the last sync left there
        history.clone()
    } else {
        device
    };

    let is_book = |v: &ObjectInfo| {
        v.is_file
            && ext_of(&v.name)
                .map(|ext| cfg.book_extensions.contains(&ext))
                .unwrap_or(false)
    };

    let mut local_books = src_all
        .subset_by_path(&cfg.source)
        .subset_by_predicate(|_, v| is_book(v));
    if local_books.is_empty() {
        return Err(SyncError::NoFiles("no books in the source path".to_string()));
    }
    tracing::debug!(count = local_books.len(), "Local books");

    let history_books = history.subset_by_predicate(|_, v| is_book(v));
    tracing::debug!(count = history_books.len(), "History books");

    let target_exists = dst_all.contains(&cfg.target);
    let thumbs_available = dst_all.contains(THUMBNAIL_FOLDER);
    tracing::debug!(target_exists, thumbs_available, "Device state");

    let mut device_books = if opts.mail_mode {
        dst_all.clone()
    } else if target_exists {
        dst_all
            .subset_by_path(&cfg.target)
            .subset_by_predicate(|_, v| is_book(v))
    } else {
        ObjectSet::new()
    };

    let mut device_thumbs = if thumbs_available {
        let under = dst_all.subset_by_path(THUMBNAIL_FOLDER);
        // thumbnails in subdirectories are not ours to manage
        let dirs: Vec<String> = under
            .iter()
            .filter(|(_, v)| v.is_dir)
            .map(|(k, _)| format!("{k}/"))
            .collect();
        under.subset_by_predicate(|k, v| {
            v.is_file
                && !dirs.iter().any(|d| k.starts_with(d.as_str()))
                && ext_of(&v.name)
                    .map(|ext| cfg.thumb_extensions.contains(&ext))
                    .unwrap_or(false)
        })
    } else {
        ObjectSet::new()
    };

    let mut actions = Vec::new();

    // case #7 ----------------------------------------------------------------
    // books were manually removed from the device since last sync

    let removed_on_device = if opts.mail_mode {
        ObjectSet::new()
    } else {
        history_books.subtract(&device_books).intersect(&local_books)
    };
    if !removed_on_device.is_empty() {
        if opts.ignore_device_removals {
            // keep the local copies and do not copy them back either
            tracing::debug!(count = removed_on_device.len(), "Removed from device, ignoring");
        } else {
            tracing::debug!(count = removed_on_device.len(), "Removed from device");
            for (_, obj) in removed_on_device.iter() {
                push_remove_with_cleanup(&mut actions, obj, &cfg.source, &mut src_all);
                for path in supplemental_artifact_paths(&obj.full_path) {
                    if let Some(extra) = src_all.find(&path).cloned() {
                        push_remove_with_cleanup(&mut actions, &extra, &cfg.source, &mut src_all);
                    }
                }
                if thumbs_available && !obj.thumb_name.is_empty() {
                    if let Some(thumb) = device_thumbs.find(&obj.thumb_name).cloned() {
                        actions.push(Action::new(Target::Destination, ActionVerb::Remove, thumb.clone()));
                        dst_all.remove(&thumb.full_path);
                        device_thumbs.remove(&obj.thumb_name);
                    }
                }
            }
        }
        local_books = local_books.subtract(&removed_on_device);
    }

    // case #6 ----------------------------------------------------------------
    // books were manually removed from local storage since last sync

    let removed_locally = device_books.subtract(&local_books).intersect(&history_books);
    if !removed_locally.is_empty() && !opts.mail_mode {
        tracing::debug!(count = removed_locally.len(), "Removed locally");

        // Devices like to grow additional files next to a book; only
        // remove entries this tool is aware of and leave the rest.
        for (key, obj) in removed_locally.iter() {
            actions.push(Action::new(Target::Destination, ActionVerb::Remove, obj.clone()));
            dst_all.remove(&obj.full_path);
            for path in supplemental_artifact_paths(&obj.full_path) {
                if let Some(extra) = dst_all.find(&path).cloned() {
                    actions.push(Action::new(Target::Destination, ActionVerb::Remove, extra));
                    dst_all.remove(&path);
                }
            }
            if thumbs_available {
                if let Some(hist) = history_books.find(key) {
                    if !hist.thumb_name.is_empty() {
                        if let Some(thumb) = device_thumbs.find(&hist.thumb_name).cloned() {
                            actions.push(Action::new(
                                Target::Destination,
                                ActionVerb::Remove,
                                thumb.clone(),
                            ));
                            dst_all.remove(&thumb.full_path);
                            device_thumbs.remove(&hist.thumb_name);
                        }
                    }
                }
            }
        }
        device_books = device_books.subtract(&removed_locally);
    }

    // case #3 ----------------------------------------------------------------
    // books were manually added to local storage or changed locally

    let changed_local_books = local_books.diff_by_equality(&history_books, |a, b| {
        a.is_dir || a.persistent_id == b.persistent_id
    });
    if !changed_local_books.is_empty() {
        tracing::debug!(count = changed_local_books.len(), "Changed locally");
    }

    let to_copy = local_books.subtract(&device_books).union(&changed_local_books);
    for (_, obj) in to_copy.iter() {
        push_copy_with_parents(&mut actions, obj, cfg, &mut dst_all, opts.mail_mode);

        if opts.mail_mode {
            continue; // no page indexes or thumbnails over mail
        }

        for path in supplemental_artifact_paths(&obj.full_path) {
            if let Some(extra) = src_all.find(&path).cloned() {
                push_copy_with_parents(&mut actions, &extra, cfg, &mut dst_all, false);
            }
        }

        if thumbs_available && !obj.thumb_name.is_empty() {
            let Some(thumbs_dir) = thumbs_dir else { continue };
            let from = thumbs_dir.join(&obj.thumb_name);
            let Ok(meta) = std::fs::metadata(&from) else {
                tracing::debug!(thumb = %obj.thumb_name, "Unable to stat thumbnail, skipping");
                continue;
            };

            if let Some(old) = device_thumbs.find(&obj.thumb_name).cloned() {
                actions.push(Action::new(Target::Destination, ActionVerb::Remove, old.clone()));
                dst_all.remove(&old.full_path);
                device_thumbs.remove(&obj.thumb_name);
            }
            let thumb = ObjectInfo {
                name: obj.thumb_name.clone(),
                is_file: true,
                modified: obj.modified,
                size: meta.len(),
                full_path: format!("{THUMBNAIL_FOLDER}/{}", obj.thumb_name),
                object_name: from.to_string_lossy().into_owned(),
                ..ObjectInfo::default()
            };
            device_thumbs.insert_at(obj.thumb_name.clone(), thumb.clone());
            dst_all.insert(thumb.clone());
            actions.push(Action::new(Target::Destination, ActionVerb::Copy, thumb));
        }
    }

    Ok(Plan {
        actions,
        snapshot: src_all,
    })
}

// ---------------------------------------------------------------------------
// Action builders
// ---------------------------------------------------------------------------

/// Removes `obj` from the source plus every ancestor directory left
/// empty by it, up to (not including) the source root.
fn push_remove_with_cleanup(
    actions: &mut Vec<Action>,
    obj: &ObjectInfo,
    source_root: &str,
    src: &mut ObjectSet,
) {
    actions.push(Action::new(Target::Source, ActionVerb::Remove, obj.clone()));
    src.remove(&obj.full_path);

    let mut dir = parent_of(&obj.full_path).map(|d| d.to_string());
    while let Some(current) = dir {
        if current == source_root {
            break;
        }
        if !src.subset_by_path(&current).is_empty() {
            break;
        }
        if let Some(entry) = src.find(&current).cloned() {
            actions.push(Action::new(Target::Source, ActionVerb::Remove, entry));
            src.remove(&current);
        }
        dir = parent_of(&current).map(|d| d.to_string());
    }
}

/// Copies `obj` to the destination, creating any missing directories
/// on the way and removing a stale file already occupying the target
/// path. In mail mode the destination path is informational only.
fn push_copy_with_parents(
    actions: &mut Vec<Action>,
    obj: &ObjectInfo,
    cfg: &Config,
    dst: &mut ObjectSet,
    mail_mode: bool,
) {
    let source_prefix = format!("{}/", cfg.source);
    let rel = obj
        .full_path
        .strip_prefix(&source_prefix)
        .unwrap_or(&obj.full_path)
        .to_string();

    let dst_path = if mail_mode {
        rel
    } else {
        push_mkdir_chain(actions, parent_of(&rel), &cfg.target, dst);
        let dst_path = format!("{}/{rel}", cfg.target);

        // overwrite in place confuses some hosts - remove stale files first
        if let Some(prev) = dst.find(&dst_path).cloned() {
            if !prev.is_dir {
                actions.push(Action::new(Target::Destination, ActionVerb::Remove, prev));
                dst.remove(&dst_path);
            }
        }
        dst_path
    };

    let copy = ObjectInfo {
        name: obj.name.clone(),
        persistent_id: obj.persistent_id.clone(),
        is_file: true,
        modified: obj.modified,
        size: obj.size,
        full_path: dst_path,
        object_name: obj.full_path.clone(),
        ..ObjectInfo::default()
    };
    dst.insert(copy.clone());
    actions.push(Action::new(Target::Destination, ActionVerb::Copy, copy));
}

/// Emits one mkdir per missing directory from the destination root
/// (inclusive) down to `dir` (a root-relative path).
fn push_mkdir_chain(
    actions: &mut Vec<Action>,
    dir: Option<&str>,
    root: &str,
    dst: &mut ObjectSet,
) {
    let parts: Vec<&str> = match dir {
        None => Vec::new(),
        Some(dir) => dir.split('/').collect(),
    };
    let mut head = root.to_string();
    for i in 0..=parts.len() {
        if dst.find(&head).is_none() {
            let entry = ObjectInfo::directory(head.clone(), Utc::now());
            dst.insert(entry.clone());
            actions.push(Action::new(Target::Destination, ActionVerb::MkDir, entry));
        }
        if i == parts.len() {
            break;
        }
        head = format!("{head}/{}", parts[i]);
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Conventional locations of a book's paired page-index sidecar: next
/// to the book, or inside a sibling `<stem>.sdr/` directory. These are
/// co-managed with the book and never trigger actions on their own.
fn supplemental_artifact_paths(full_path: &str) -> [String; 2] {
    let (dir, file) = match full_path.rfind('/') {
        Some(idx) => (&full_path[..idx], &full_path[idx + 1..]),
        None => ("", full_path),
    };
    let stem = match file.rfind('.') {
        Some(idx) => &file[..idx],
        None => file,
    };
    let join = |leaf: String| {
        if dir.is_empty() {
            leaf
        } else {
            format!("{dir}/{leaf}")
        }
    };
    [
        join(format!("{stem}.apnx")),
        join(format!("{stem}.sdr/{stem}.apnx")),
    ]
}

/// Lower-cased extension including the dot, `None` without one.
fn ext_of(name: &str) -> Option<String> {
    name.rfind('.').map(|idx| name[idx..].to_lowercase())
}
