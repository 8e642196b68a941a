//! Source discovery: extensions, package directories, entry files.

use std::path::{Path, PathBuf};

use crate::LoadError;

/// Recognized Funxy source extensions.
pub const SOURCE_EXTENSIONS: [&str; 3] = ["lang", "funxy", "fx"];

/// Extension of compiled bundles.
pub const BYTECODE_EXTENSION: &str = "fbc";

/// Whether a path looks like a Funxy source file.
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Whether a path is a compiled bundle.
pub fn is_bytecode_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext == BYTECODE_EXTENSION)
}

/// What the entry path turned out to be.
#[derive(Debug)]
pub enum EntryKind {
    /// A single source file.
    File(PathBuf),
    /// A package directory: its source files plus the entry file whose
    /// stem matches the directory name.
    Package {
        dir: PathBuf,
        entry: PathBuf,
        files: Vec<PathBuf>,
    },
    /// A compiled `.fbc` bundle.
    Bytecode(PathBuf),
}

/// Classify an entry path.
pub fn discover_entry(path: &Path) -> Result<EntryKind, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    if path.is_file() {
        if is_bytecode_file(path) {
            return Ok(EntryKind::Bytecode(path.to_path_buf()));
        }
        return Ok(EntryKind::File(path.to_path_buf()));
    }

    let (files, entry) = package_files(path)?;
    Ok(EntryKind::Package {
        dir: path.to_path_buf(),
        entry,
        files,
    })
}

/// Collect the source files of a package directory in deterministic order
/// and identify its entry file (stem equal to the directory base name).
pub fn package_files(dir: &Path) -> Result<(Vec<PathBuf>, PathBuf), LoadError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|source| LoadError::Io { path: dir.to_path_buf(), source })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_source_file(p))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(LoadError::NoSources(dir.to_path_buf()));
    }

    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let entry = files
        .iter()
        .find(|f| {
            f.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem == dir_name)
        })
        .cloned()
        .ok_or_else(|| LoadError::NoEntryFile(dir.to_path_buf()))?;

    Ok((files, entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_extension_recognition() {
        assert!(is_source_file(Path::new("a/main.fx")));
        assert!(is_source_file(Path::new("main.funxy")));
        assert!(is_source_file(Path::new("main.lang")));
        assert!(!is_source_file(Path::new("main.rs")));
        assert!(!is_source_file(Path::new("main")));
        assert!(is_bytecode_file(Path::new("out.fbc")));
    }

    #[test]
    fn package_discovery_uses_directory_name() {
        let dir = std::env::temp_dir().join(format!("funxy-disc-{}", std::process::id()));
        let pkg = dir.join("mypkg");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("mypkg.fx"), "x = 1\n").unwrap();
        std::fs::write(pkg.join("helper.fx"), "y = 2\n").unwrap();

        let (files, entry) = package_files(&pkg).unwrap();
        assert_eq!(files.len(), 2);
        assert!(entry.ends_with("mypkg.fx"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_entry_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!("funxy-noentry-{}", std::process::id()));
        let pkg = dir.join("pkg");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("other.fx"), "x = 1\n").unwrap();

        assert!(matches!(package_files(&pkg), Err(LoadError::NoEntryFile(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
