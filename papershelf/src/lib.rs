pub mod canonical;
pub mod config;
pub mod context;
pub mod error;
pub mod library;
pub mod metadata_db;
pub mod migration;
pub mod record;
pub mod store;
pub mod virtual_dir;
pub mod watcher;

pub use canonical::canonical_path;
pub use config::Config;
pub use context::OpContext;
pub use error::{Result, ShelfError};
pub use library::{Flag, Library, MetadataPatch};
pub use record::{MetadataRecord, ReadingState};
pub use store::Store;
pub use virtual_dir::{FolderKind, SyncReport, VirtualFolder};
