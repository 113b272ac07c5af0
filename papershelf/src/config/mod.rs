use crate::error::{Result, ShelfError};
use crate::virtual_dir::{FolderKind, VirtualFolder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_RECENTLY_OPENED_LIMIT: usize = 20;
pub const DEFAULT_RECENTLY_OPENED_NAME: &str = "Recently Read";
pub const DEFAULT_RECENTLY_ADDED_DAYS: u64 = 30;
pub const DEFAULT_RECENTLY_ADDED_NAME: &str = "Recently Added";
pub const DATABASE_FILE: &str = "metadata.db";

pub const LIBRARY_DIR_ENV: &str = "PAPERSHELF_LIBRARY_DIR";
pub const META_DIR_ENV: &str = "PAPERSHELF_META_DIR";

const APP_DIR: &str = "papershelf";
const CONFIG_FILE: &str = "config.yaml";

/// User configuration, stored as YAML.
///
/// Empty paths mean "unset" and are filled in by [`Config::ensure_defaults`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library_dir: PathBuf,
    pub meta_dir: PathBuf,
    pub recently_opened_dir: PathBuf,
    pub recently_opened_limit: usize,
    pub recently_added_dir: PathBuf,
    /// Files modified within this many days appear in `recently_added_dir`.
    pub recently_added_days: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorites_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_read_dir: Option<PathBuf>,
}

impl Config {
    /// `$XDG_CONFIG_HOME/papershelf/config.yaml` or the platform equivalent.
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| ShelfError::Config("cannot determine the config directory".into()))?;
        Ok(base.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ShelfError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Load the config at `path` (or the default location), filling in and
    /// persisting defaults. A missing file is created. Environment overrides
    /// are applied last and never written back.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let exists = path.exists();
        let mut config = if exists {
            Self::load(&path)?
        } else {
            log::info!("No config at {}, writing defaults", path.display());
            Config::default()
        };

        if config.ensure_defaults()? || !exists {
            config.save(&path)?;
        }
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Fill every unset field. Returns whether anything changed.
    pub fn ensure_defaults(&mut self) -> Result<bool> {
        let mut changed = false;

        if self.library_dir.as_os_str().is_empty() {
            let home = dirs::home_dir()
                .ok_or_else(|| ShelfError::Config("cannot determine the home directory".into()))?;
            self.library_dir = home.join("Documents").join("Papers");
            changed = true;
        }
        if self.meta_dir.as_os_str().is_empty() {
            let data = dirs::data_dir()
                .ok_or_else(|| ShelfError::Config("cannot determine the data directory".into()))?;
            self.meta_dir = data.join(APP_DIR);
            changed = true;
        }
        if self.recently_opened_dir.as_os_str().is_empty() {
            self.recently_opened_dir = expand_home(&self.library_dir).join(DEFAULT_RECENTLY_OPENED_NAME);
            changed = true;
        }
        if self.recently_opened_limit == 0 {
            self.recently_opened_limit = DEFAULT_RECENTLY_OPENED_LIMIT;
            changed = true;
        }
        if self.recently_added_dir.as_os_str().is_empty() {
            self.recently_added_dir = expand_home(&self.library_dir).join(DEFAULT_RECENTLY_ADDED_NAME);
            changed = true;
        }
        if self.recently_added_days == 0 {
            self.recently_added_days = DEFAULT_RECENTLY_ADDED_DAYS;
            changed = true;
        }

        Ok(changed)
    }

    /// Replace directories with non-blank values returned by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(dir) = value(LIBRARY_DIR_ENV) {
            log::debug!("{LIBRARY_DIR_ENV} overrides library directory: {dir}");
            self.library_dir = PathBuf::from(dir);
        }
        if let Some(dir) = value(META_DIR_ENV) {
            log::debug!("{META_DIR_ENV} overrides metadata directory: {dir}");
            self.meta_dir = PathBuf::from(dir);
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn library_dir(&self) -> PathBuf {
        expand_home(&self.library_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.meta_dir).join(DATABASE_FILE)
    }

    /// Configured virtual folders; the recently-opened folder always comes
    /// first, then the recently-added one.
    pub fn virtual_folders(&self) -> Vec<VirtualFolder> {
        let mut folders = Vec::new();
        if !self.recently_opened_dir.as_os_str().is_empty() {
            folders.push(VirtualFolder::new(
                FolderKind::RecentlyOpened {
                    limit: self.recently_opened_limit,
                },
                expand_home(&self.recently_opened_dir),
            ));
        }
        if !self.recently_added_dir.as_os_str().is_empty() {
            folders.push(VirtualFolder::recently_added(
                expand_home(&self.recently_added_dir),
                self.library_dir(),
                self.recently_added_days,
            ));
        }
        if let Some(dir) = &self.favorites_dir {
            folders.push(VirtualFolder::new(FolderKind::Favorites, expand_home(dir)));
        }
        if let Some(dir) = &self.to_read_dir {
            folders.push(VirtualFolder::new(FolderKind::ToRead, expand_home(dir)));
        }
        folders
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_partial_yaml_gets_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "library_dir: /srv/papers\nmeta_dir: /srv/meta\n").unwrap();

        let config = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.library_dir, PathBuf::from("/srv/papers"));
        assert_eq!(config.recently_opened_dir, PathBuf::from("/srv/papers/Recently Read"));
        assert_eq!(config.recently_opened_limit, DEFAULT_RECENTLY_OPENED_LIMIT);
        assert_eq!(config.recently_added_dir, PathBuf::from("/srv/papers/Recently Added"));
        assert_eq!(config.recently_added_days, DEFAULT_RECENTLY_ADDED_DAYS);
        assert_eq!(config.database_path(), PathBuf::from("/srv/meta/metadata.db"));

        // Filled defaults were persisted.
        let saved = Config::load(&path).unwrap();
        assert_eq!(saved.recently_opened_limit, DEFAULT_RECENTLY_OPENED_LIMIT);
    }

    #[test]
    fn test_ensure_defaults_reports_change_once() {
        let mut config = Config {
            library_dir: "/p".into(),
            meta_dir: "/m".into(),
            ..Default::default()
        };
        assert!(config.ensure_defaults().unwrap());
        assert!(!config.ensure_defaults().unwrap());
    }

    #[test]
    fn test_missing_file_is_created() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/config.yaml");
        Config::load_or_default(Some(&path)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let mut config = Config {
            library_dir: "/file/lib".into(),
            meta_dir: "/file/meta".into(),
            ..Default::default()
        };
        config.apply_overrides(|key| match key {
            LIBRARY_DIR_ENV => Some(" /env/lib ".into()),
            META_DIR_ENV => Some("   ".into()),
            _ => None,
        });
        assert_eq!(config.library_dir, PathBuf::from("/env/lib"));
        assert_eq!(config.meta_dir, PathBuf::from("/file/meta"));
    }

    #[test]
    fn test_virtual_folders() {
        let config = Config {
            library_dir: "/p".into(),
            meta_dir: "/m".into(),
            recently_opened_dir: "/p/recent".into(),
            recently_opened_limit: 7,
            recently_added_dir: "/p/added".into(),
            recently_added_days: 3,
            favorites_dir: Some("/p/fav".into()),
            to_read_dir: None,
        };
        assert_eq!(
            config.virtual_folders(),
            vec![
                VirtualFolder::new(FolderKind::RecentlyOpened { limit: 7 }, "/p/recent"),
                VirtualFolder::recently_added("/p/added", "/p", 3),
                VirtualFolder::new(FolderKind::Favorites, "/p/fav"),
            ]
        );
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "recently_opened_limit: [not a number]\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ShelfError::Config(_))));
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home(Path::new("/abs/x")), PathBuf::from("/abs/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/Papers")), home.join("Papers"));
        }
    }
}
