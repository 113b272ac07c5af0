//! Virtual folders: directories of symlinks that mirror a store query.
//!
//! Each sync reconciles the directory against the query result (or, for the
//! recently-added folder, against a walk of the library). Links that
//! already have the right name and target are left alone, so repeated syncs
//! with an unchanged store do not touch the filesystem. Entries that are not
//! symlinks are never modified.

pub mod naming;

use crate::canonical::{canonical_path, normalize_lexically};
use crate::context::OpContext;
use crate::error::{Result, ShelfError};
use crate::record::{is_document_file, MetadataRecord};
use crate::store::Store;
use chrono::Utc;
use naming::NameAllocator;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::{DirEntry, WalkDir};

pub use naming::{link_timestamp, strip_link_prefix};

/// What a virtual folder shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FolderKind {
    /// The `limit` most recently opened files, newest first.
    RecentlyOpened { limit: usize },
    Favorites,
    ToRead,
    /// Documents under the library root modified within the last
    /// `max_age_days` days.
    RecentlyAdded { max_age_days: u64 },
}

impl FolderKind {
    pub fn label(&self) -> &'static str {
        match self {
            FolderKind::RecentlyOpened { .. } => "recently opened",
            FolderKind::Favorites => "favorites",
            FolderKind::ToRead => "to read",
            FolderKind::RecentlyAdded { .. } => "recently added",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualFolder {
    #[serde(flatten)]
    pub kind: FolderKind,
    pub dir: PathBuf,
    /// Tree walked by a recently-added folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_root: Option<PathBuf>,
}

impl VirtualFolder {
    pub fn new(kind: FolderKind, dir: impl Into<PathBuf>) -> Self {
        VirtualFolder {
            kind,
            dir: dir.into(),
            library_root: None,
        }
    }

    pub fn recently_added(
        dir: impl Into<PathBuf>,
        library_root: impl Into<PathBuf>,
        max_age_days: u64,
    ) -> Self {
        VirtualFolder {
            kind: FolderKind::RecentlyAdded { max_age_days },
            dir: dir.into(),
            library_root: Some(library_root.into()),
        }
    }
}

/// Outcome of one folder sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Links already correct and left untouched.
    pub kept: usize,
    pub created: usize,
    /// Stale links removed, including links re-pointed to a new target.
    pub removed: usize,
    /// Records skipped because their file no longer exists.
    pub skipped_missing: usize,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        self.created > 0 || self.removed > 0
    }
}

/// Reconcile one folder against the store.
///
/// An I/O failure aborts with [`ShelfError::Link`]. Changes made before the
/// failure stay in place; the next sync converges.
pub fn sync_folder(store: &Store, ctx: &OpContext, folder: &VirtualFolder) -> Result<SyncReport> {
    sync_folder_skipping(store, ctx, folder, &[])
}

/// Like [`sync_folder`]. A recently-added walk also leaves out everything
/// under `skip_dirs`, normally the other virtual folders.
pub fn sync_folder_skipping(
    store: &Store,
    ctx: &OpContext,
    folder: &VirtualFolder,
    skip_dirs: &[PathBuf],
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let desired = match folder.kind {
        FolderKind::RecentlyOpened { limit } => {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            record_links(folder.kind, &store.list_recently_opened(ctx, limit)?, &mut report)
        }
        FolderKind::Favorites => record_links(folder.kind, &store.list_favorites(ctx)?, &mut report),
        FolderKind::ToRead => record_links(folder.kind, &store.list_to_read(ctx)?, &mut report),
        FolderKind::RecentlyAdded { max_age_days } => {
            let root = folder.library_root.as_deref().ok_or_else(|| {
                ShelfError::InvalidInput(format!(
                    "recently added folder {} has no library root",
                    folder.dir.display()
                ))
            })?;
            recently_added_links(store, ctx, root, &folder.dir, max_age_days, skip_dirs)?
        }
    };

    apply(&folder.dir, desired, &mut report)?;
    log::info!(
        "Synced {} folder {}: {} kept, {} created, {} removed, {} missing",
        folder.kind.label(),
        folder.dir.display(),
        report.kept,
        report.created,
        report.removed,
        report.skipped_missing
    );
    Ok(report)
}

/// Reconcile a recently-opened folder holding at most `limit` links.
pub fn sync_recently_opened(
    store: &Store,
    ctx: &OpContext,
    dir: &Path,
    limit: usize,
) -> Result<SyncReport> {
    sync_folder(store, ctx, &VirtualFolder::new(FolderKind::RecentlyOpened { limit }, dir))
}

/// Sync every folder in order, stopping at the first error. No folder's links
/// show up in a recently-added folder.
pub fn sync_all(store: &Store, ctx: &OpContext, folders: &[VirtualFolder]) -> Result<Vec<SyncReport>> {
    let dirs: Vec<PathBuf> = folders.iter().map(|f| f.dir.clone()).collect();
    folders
        .iter()
        .map(|f| sync_folder_skipping(store, ctx, f, &dirs))
        .collect()
}

fn record_links(
    kind: FolderKind,
    records: &[MetadataRecord],
    report: &mut SyncReport,
) -> HashMap<String, PathBuf> {
    let mut names = NameAllocator::default();
    let mut desired = HashMap::new();
    for record in records {
        let Some(target) = existing_target(record) else {
            log::debug!("Skipping {}: file is missing", record.path);
            report.skipped_missing += 1;
            continue;
        };
        let name = names.claim(link_name(kind, record, &target));
        desired.insert(name, target);
    }
    desired
}

/// Documents under `root` modified within `max_age_days`, named from their
/// records when one exists. Hidden entries, `dir` itself and `skip_dirs` are
/// not descended into. A missing root yields an empty folder.
fn recently_added_links(
    store: &Store,
    ctx: &OpContext,
    root: &Path,
    dir: &Path,
    max_age_days: u64,
    skip_dirs: &[PathBuf],
) -> Result<HashMap<String, PathBuf>> {
    ctx.check()?;
    let mut desired = HashMap::new();
    let root = match std::fs::canonicalize(root) {
        Ok(root) => root,
        Err(e) => {
            log::warn!("Library root {} is unavailable: {e}", root.display());
            return Ok(desired);
        }
    };
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(max_age_days.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let skipped: Vec<PathBuf> = skip_dirs
        .iter()
        .map(PathBuf::as_path)
        .chain(std::iter::once(dir))
        .map(|d| PathBuf::from(canonical_path(d)))
        .collect();

    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !(is_hidden(entry) || skipped.iter().any(|d| d == entry.path()))
        });

    let mut names = NameAllocator::default();
    for entry in walker {
        ctx.check()?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_document_file(entry.path()) {
            continue;
        }
        let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
            continue;
        };
        if modified < cutoff {
            continue;
        }

        let key = canonical_path(entry.path());
        let file_name = entry.file_name().to_string_lossy();
        let name = match store.get(ctx, &key)? {
            Some(record) => naming::link_base(&file_name, &record.title, &record.year),
            None => naming::link_base(&file_name, "", ""),
        };
        desired.insert(names.claim(name), PathBuf::from(key));
    }
    Ok(desired)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

fn existing_target(record: &MetadataRecord) -> Option<PathBuf> {
    let path = record.path.trim();
    if path.is_empty() {
        return None;
    }
    let target = PathBuf::from(canonical_path(path));
    target.exists().then_some(target)
}

fn link_name(kind: FolderKind, record: &MetadataRecord, target: &Path) -> String {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match kind {
        FolderKind::RecentlyOpened { .. } => naming::recent_link_name(
            &file_name,
            &record.title,
            &record.year,
            record.last_opened_at.unwrap_or_else(Utc::now),
        ),
        FolderKind::Favorites | FolderKind::ToRead | FolderKind::RecentlyAdded { .. } => {
            naming::link_base(&file_name, &record.title, &record.year)
        }
    }
}

fn apply(dir: &Path, mut desired: HashMap<String, PathBuf>, report: &mut SyncReport) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| ShelfError::link(dir, e))?;
    let dir = std::fs::canonicalize(dir).map_err(|e| ShelfError::link(dir, e))?;

    // Remove first so a re-pointed name is free before it is created again.
    for (name, target) in existing_links(&dir)? {
        if desired.get(&name) == Some(&target) {
            desired.remove(&name);
            report.kept += 1;
            continue;
        }
        let link = dir.join(&name);
        std::fs::remove_file(&link).map_err(|e| ShelfError::link(&link, e))?;
        log::debug!("Removed stale link {}", link.display());
        report.removed += 1;
    }

    let mut pending: Vec<_> = desired.into_iter().collect();
    pending.sort();
    for (name, target) in pending {
        let link = dir.join(&name);
        if std::fs::symlink_metadata(&link).is_ok() {
            log::warn!("Not replacing {}: entry is not a link", link.display());
            continue;
        }
        create_symlink(&relative_to(&target, &dir), &link).map_err(|e| ShelfError::link(&link, e))?;
        log::debug!("Linked {} -> {}", link.display(), target.display());
        report.created += 1;
    }
    Ok(())
}

/// Symlinks in `dir` with their targets resolved against `dir`.
fn existing_links(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut links = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| ShelfError::link(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ShelfError::link(dir, e))?;
        let path = entry.path();
        let is_link = std::fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            log::warn!("Ignoring link with non UTF-8 name: {}", path.display());
            continue;
        };
        let target = match std::fs::read_link(&path) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Ignoring unreadable link {}: {e}", path.display());
                continue;
            }
        };
        links.push((name, normalize_lexically(&dir.join(target))));
    }
    Ok(links)
}

/// Lexical path from `base` to `target`. Both must be absolute.
fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component> = target.components().collect();
    let base: Vec<Component> = base.components().collect();
    if target.first() != base.first() {
        return target.iter().collect();
    }
    let common = target
        .iter()
        .zip(&base)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for component in &target[common..] {
        rel.push(component.as_os_str());
    }
    rel
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
