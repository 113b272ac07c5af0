// Canonical path keys for the metadata table.
//
// Every read or write of a record must go through `canonical_path` first; two
// call sites that disagree on the key format silently create two records for
// the same file.

use std::path::{Component, Path, PathBuf};

/// Map a path to the canonical absolute form used as the record key.
///
/// Symlinks are resolved when the path exists. When it does not (a file that
/// was just moved away, or is about to be created), the longest existing
/// ancestor is resolved and the remaining components are appended as-is.
/// The result never has a trailing separator or `.`/`..` segments.
/// An empty input yields an empty string, the "no valid key" sentinel.
pub fn canonical_path(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return String::new();
    }

    if let Ok(resolved) = std::fs::canonicalize(path) {
        return to_key(&resolved);
    }

    let normalized = normalize_lexically(&absolutize(path));
    to_key(&resolve_existing_ancestor(&normalized))
}

/// Join a relative path onto the current directory. If the current directory
/// is unavailable the path is returned unchanged.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            log::warn!("Cannot read current directory, keeping {} relative: {e}", path.display());
            path.to_path_buf()
        }
    }
}

/// Remove `.` segments, fold `..` into its parent and drop trailing
/// separators without touching the filesystem. `..` above the root is
/// discarded; an empty result becomes `.`.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(name) => out.push(name),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn resolve_existing_ancestor(path: &Path) -> PathBuf {
    for ancestor in path.ancestors().skip(1) {
        if let Ok(resolved) = std::fs::canonicalize(ancestor) {
            if let Ok(rest) = path.strip_prefix(ancestor) {
                return resolved.join(rest);
            }
        }
    }
    path.to_path_buf()
}

fn to_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn real_dir(tmp: &TempDir) -> PathBuf {
        std::fs::canonicalize(tmp.path()).unwrap()
    }

    #[test]
    fn test_empty_input_is_sentinel() {
        assert_eq!(canonical_path(""), "");
    }

    #[test]
    fn test_existing_file_resolves() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.pdf");
        std::fs::write(&file, b"%PDF").unwrap();

        let key = canonical_path(&file);
        assert_eq!(key, real_dir(&tmp).join("a.pdf").to_string_lossy());
    }

    #[test]
    fn test_dot_segments_and_trailing_slash_removed() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        let messy = format!("{}/sub/./../sub/missing.pdf/", tmp.path().display());

        let key = canonical_path(&messy);
        assert_eq!(key, real_dir(&tmp).join("sub/missing.pdf").to_string_lossy());
    }

    #[test]
    fn test_relative_path_becomes_absolute() {
        let key = canonical_path("definitely-not-here/paper.pdf");
        assert!(Path::new(&key).is_absolute());
        assert!(key.ends_with("definitely-not-here/paper.pdf"));
    }

    #[test]
    fn test_canonicalization_is_stable() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("gone.pdf");
        let once = canonical_path(&file);
        assert_eq!(canonical_path(&once), once);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_resolves_for_existing_and_missing_files() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        std::fs::write(real.join("a.pdf"), b"%PDF").unwrap();
        let alias = tmp.path().join("alias");
        std::os::unix::fs::symlink(&real, &alias).unwrap();

        let expected_dir = real_dir(&tmp).join("real");
        assert_eq!(
            canonical_path(alias.join("a.pdf")),
            expected_dir.join("a.pdf").to_string_lossy()
        );
        // A file that no longer exists still maps to the same key space.
        assert_eq!(
            canonical_path(alias.join("moved-away.pdf")),
            expected_dir.join("moved-away.pdf").to_string_lossy()
        );
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/b/../c/./d/")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_lexically(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize_lexically(Path::new("")), PathBuf::from("."));
        assert_eq!(normalize_lexically(Path::new("./.")), PathBuf::from("."));
        assert_eq!(normalize_lexically(Path::new("../x")), PathBuf::from("../x"));
    }
}
