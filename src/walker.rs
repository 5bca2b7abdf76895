use std::path::{Path, PathBuf};

use crate::error::Result;

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the source root it was found under.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Supported file extensions for document discovery.
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Expand a source location into document files.
///
/// A file is returned as-is (relative path = its file name) regardless of
/// extension, since the caller named it explicitly. A directory is walked
/// recursively via [`discover_files`].
pub fn discover_source(location: &Path) -> Result<Vec<DiscoveredFile>> {
    if location.is_dir() {
        return discover_files(location);
    }

    let absolute_path = location.canonicalize()?;
    let relative_path = absolute_path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| absolute_path.clone());
    Ok(vec![DiscoveredFile {
        relative_path,
        absolute_path,
    }])
}

/// Recursively walk a directory and discover eligible document files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns files with supported extensions. Results are sorted by relative
/// path so every walk of an unchanged tree yields the same order.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // broken symlink
            };
            // Directory links are not followed (cycle prevention).
            if resolved.is_file() && is_supported(&resolved) {
                results.push(make_discovered(root, &entry.path(), resolved));
            }
        } else if file_type.is_file() && is_supported(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), abs));
        }
    }

    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: PathBuf,
) -> DiscoveredFile {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    DiscoveredFile {
        relative_path,
        absolute_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn discovers_md_and_txt() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["note.md", "readme.txt"]);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "hello").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["visible.md"]);
    }

    #[test]
    fn recurses_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("z.md"), "z").unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["a.md", "subdir/deep.md", "z.md"]);
    }

    #[test]
    fn single_file_source() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("CHANGELOG");
        std::fs::write(&path, "entries").unwrap();

        let files = discover_source(&path).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, PathBuf::from("CHANGELOG"));
    }

    #[test]
    fn missing_source_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_source(&tmp.path().join("nope")).is_err());
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_files(tmp.path()).unwrap().is_empty());
    }
}
