use crate::canonical::canonical_path;
use crate::context::OpContext;
use crate::error::{Result, ShelfError};
use crate::record::{MetadataRecord, ReadingState};
use crate::store::Store;
use crate::virtual_dir::{self, FolderKind, SyncReport, VirtualFolder};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// A boolean flag a user can toggle on a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Favorite,
    ToRead,
}

impl Flag {
    pub fn label(&self) -> &'static str {
        match self {
            Flag::Favorite => "Favorite",
            Flag::ToRead => "To-read",
        }
    }

    fn get(&self, record: &MetadataRecord) -> bool {
        match self {
            Flag::Favorite => record.favorite,
            Flag::ToRead => record.to_read,
        }
    }

    fn set(&self, record: &mut MetadataRecord, value: bool) {
        match self {
            Flag::Favorite => record.favorite = value,
            Flag::ToRead => record.to_read = value,
        }
    }

    fn folder_kind(&self) -> FolderKind {
        match self {
            Flag::Favorite => FolderKind::Favorites,
            Flag::ToRead => FolderKind::ToRead,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToggleSummary {
    pub on: usize,
    pub off: usize,
}

/// Fields to change in [`Library::edit`]. `None` leaves a field as it is.
/// Unknown keys are rejected so a misspelled field is not silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<String>,
    pub published: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub tag: Option<String>,
    pub favorite: Option<bool>,
    pub to_read: Option<bool>,
    pub reading_state: Option<ReadingState>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        *self == MetadataPatch::default()
    }

    pub fn apply(&self, record: &mut MetadataRecord) {
        let text_fields = [
            (&self.title, &mut record.title),
            (&self.author, &mut record.author),
            (&self.year, &mut record.year),
            (&self.published, &mut record.published),
            (&self.url, &mut record.url),
            (&self.doi, &mut record.doi),
            (&self.abstract_text, &mut record.abstract_text),
            (&self.tag, &mut record.tag),
        ];
        for (patch, field) in text_fields {
            if let Some(value) = patch {
                *field = value.trim().to_string();
            }
        }
        if let Some(v) = self.favorite {
            record.favorite = v;
        }
        if let Some(v) = self.to_read {
            record.to_read = v;
        }
        if let Some(v) = self.reading_state {
            record.reading_state = v;
        }
    }
}

/// User-level operations on a library: every path is canonicalized before it
/// reaches the store, and virtual folders are resynced after changes that
/// affect them.
pub struct Library<'a> {
    store: &'a Store,
    folders: Vec<VirtualFolder>,
    ctx: OpContext,
}

impl<'a> Library<'a> {
    pub fn new(store: &'a Store, folders: Vec<VirtualFolder>) -> Self {
        Library {
            store,
            folders,
            ctx: OpContext::background(),
        }
    }

    /// Use `ctx` for every store call made through this library.
    pub fn with_context(mut self, ctx: OpContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn folders(&self) -> &[VirtualFolder] {
        &self.folders
    }

    /// Canonical keys of the existing regular files among `paths`, deduplicated
    /// and sorted.
    pub fn canonical_file_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<String> {
        let unique: BTreeSet<String> = paths
            .iter()
            .map(canonical_path)
            .filter(|key| !key.is_empty() && Path::new(key).is_file())
            .collect();
        unique.into_iter().collect()
    }

    /// The stored record for a canonical key, or a fresh one.
    pub fn load_record(&self, key: &str) -> Result<MetadataRecord> {
        Ok(self
            .store
            .get(&self.ctx, key)?
            .unwrap_or_else(|| MetadataRecord::new(key)))
    }

    /// Record that `path` was opened now and refresh the recently-opened
    /// folders. Returns the canonical key.
    pub fn record_opened(&self, path: impl AsRef<Path>) -> Result<String> {
        let key = canonical_path(path);
        if key.is_empty() {
            return Err(ShelfError::InvalidInput("path must not be empty".into()));
        }
        self.store.record_opened(&self.ctx, &key, Utc::now())?;
        log::debug!("Recorded open of {key}");
        self.sync_matching(|kind| matches!(kind, FolderKind::RecentlyOpened { .. }))?;
        Ok(key)
    }

    /// Flip `flag` on each file. Non-files are skipped.
    pub fn toggle_flag<P: AsRef<Path>>(&self, paths: &[P], flag: Flag) -> Result<ToggleSummary> {
        let mut summary = ToggleSummary::default();
        for key in self.require_files(paths)? {
            let mut record = self.load_record(&key)?;
            let value = !flag.get(&record);
            flag.set(&mut record, value);
            self.store.upsert(&self.ctx, &record)?;
            if value {
                summary.on += 1;
            } else {
                summary.off += 1;
            }
        }
        log::info!("{} toggled ({} on, {} off)", flag.label(), summary.on, summary.off);
        self.sync_matching(|kind| kind == flag.folder_kind())?;
        Ok(summary)
    }

    /// Advance each file's reading state (unread -> reading -> read -> unread).
    /// Returns how many files landed in each state, in state order, omitting
    /// zero counts.
    pub fn cycle_reading_state<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<(ReadingState, usize)>> {
        let mut counts = [0usize; 3];
        for key in self.require_files(paths)? {
            let mut record = self.load_record(&key)?;
            record.reading_state = record.reading_state.next();
            self.store.upsert(&self.ctx, &record)?;
            if let Some(i) = ReadingState::ALL.iter().position(|s| *s == record.reading_state) {
                counts[i] += 1;
            }
        }
        Ok(ReadingState::ALL
            .into_iter()
            .zip(counts)
            .filter(|(_, n)| *n > 0)
            .collect())
    }

    /// Returns the number of files updated.
    pub fn set_reading_state<P: AsRef<Path>>(&self, paths: &[P], state: ReadingState) -> Result<usize> {
        let keys = self.require_files(paths)?;
        for key in &keys {
            let mut record = self.load_record(key)?;
            record.reading_state = state;
            self.store.upsert(&self.ctx, &record)?;
        }
        Ok(keys.len())
    }

    /// Clear the chosen flags. Returns the number of records that changed.
    pub fn unmark<P: AsRef<Path>>(&self, paths: &[P], favorite: bool, to_read: bool) -> Result<usize> {
        if !favorite && !to_read {
            return Err(ShelfError::InvalidInput("nothing to unmark".into()));
        }
        let mut changed = 0;
        for key in self.require_files(paths)? {
            let Some(mut record) = self.store.get(&self.ctx, &key)? else {
                continue;
            };
            let before = (record.favorite, record.to_read);
            if favorite {
                record.favorite = false;
            }
            if to_read {
                record.to_read = false;
            }
            if (record.favorite, record.to_read) != before {
                self.store.upsert(&self.ctx, &record)?;
                changed += 1;
            }
        }
        self.sync_matching(|kind| {
            (favorite && kind == FolderKind::Favorites) || (to_read && kind == FolderKind::ToRead)
        })?;
        Ok(changed)
    }

    /// Apply `patch` to the record of `path` and save it.
    pub fn edit(&self, path: impl AsRef<Path>, patch: &MetadataPatch) -> Result<MetadataRecord> {
        let key = canonical_path(path);
        if key.is_empty() {
            return Err(ShelfError::InvalidInput("path must not be empty".into()));
        }
        let mut record = self.load_record(&key)?;
        patch.apply(&mut record);
        self.store.upsert(&self.ctx, &record)?;
        if patch.favorite.is_some() || patch.to_read.is_some() || patch.title.is_some() || patch.year.is_some() {
            self.sync_folders()?;
        }
        // Read back so callers see the stored timestamps.
        self.load_record(&key)
    }

    /// Rename a file or directory on disk and carry its metadata along.
    /// Returns the number of records moved.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<usize> {
        let (from, to) = (from.as_ref(), to.as_ref());
        if !from.exists() && std::fs::symlink_metadata(from).is_err() {
            return Err(ShelfError::InvalidInput(format!("{} does not exist", from.display())));
        }
        if to.exists() {
            return Err(ShelfError::InvalidInput(format!("{} already exists", to.display())));
        }
        // Resolve before the move, while the source still exists.
        let old_key = canonical_path(from);
        std::fs::rename(from, to)?;
        self.track_move(&old_key, to)
    }

    /// Update the store after `old_key` was moved to `to` on disk by someone
    /// else. Returns the number of records moved.
    pub fn track_move(&self, old_key: &str, to: impl AsRef<Path>) -> Result<usize> {
        let to = to.as_ref();
        let new_key = canonical_path(to);
        let moved = self.store.relocate(&self.ctx, old_key, &new_key, to.is_dir())?;
        if moved > 0 {
            self.sync_folders()?;
        }
        Ok(moved)
    }

    pub fn sync_folders(&self) -> Result<Vec<SyncReport>> {
        virtual_dir::sync_all(self.store, &self.ctx, &self.folders)
    }

    fn sync_matching(&self, keep: impl Fn(FolderKind) -> bool) -> Result<()> {
        let dirs: Vec<PathBuf> = self.folders.iter().map(|f| f.dir.clone()).collect();
        for folder in self.folders.iter().filter(|f| keep(f.kind)) {
            virtual_dir::sync_folder_skipping(self.store, &self.ctx, folder, &dirs)?;
        }
        Ok(())
    }

    fn require_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<String>> {
        let keys = self.canonical_file_paths(paths);
        if keys.is_empty() {
            return Err(ShelfError::InvalidInput("no files selected".into()));
        }
        Ok(keys)
    }
}
