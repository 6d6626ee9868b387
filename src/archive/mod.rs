//! Zip extraction
//!
//! Every entry name is validated before anything touches the disk. A single
//! entry that would land outside the destination rejects the whole archive.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use zip::ZipArchive;

/// Archive extraction errors
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Corrupt archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the destination: {0}")]
    PathTraversal(String),

    #[error("Extraction I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One file written by [`extract`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEntry {
    /// Path relative to the destination, `/`-separated
    pub relative_path: String,
    pub size: u64,
}

/// Extract `zip_bytes` into `destination`, returning files in archive order
///
/// Directory entries are created but not reported.
pub fn extract(zip_bytes: &[u8], destination: &Path) -> Result<Vec<ExtractedEntry>, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;

    // Validate all names up front
    let mut plan = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        let relative = validate_entry_name(file.name())?;
        if file.enclosed_name().is_none() {
            return Err(ExtractError::PathTraversal(file.name().to_string()));
        }
        plan.push((relative, file.is_dir()));
    }

    fs::create_dir_all(destination)?;

    let mut entries = Vec::new();
    for (i, (relative, is_dir)) in plan.into_iter().enumerate() {
        let target = destination.join(&relative);
        if is_dir {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = archive.by_index(i)?;
        let mut out = fs::File::create(&target)?;
        let size = io::copy(&mut file, &mut out)?;

        let relative_path = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");
        tracing::debug!(entry = %relative_path, size, "Extracted entry");

        entries.push(ExtractedEntry {
            relative_path,
            size,
        });
    }

    tracing::info!(
        entries = entries.len(),
        destination = %destination.display(),
        "Archive extracted"
    );
    Ok(entries)
}

/// Normalize an entry name into a relative path that stays under the destination
fn validate_entry_name(name: &str) -> Result<PathBuf, ExtractError> {
    let reject = || ExtractError::PathTraversal(name.to_string());

    // Archives built on Windows may use backslashes
    let normalized = name.replace('\\', "/");
    if normalized.is_empty() || normalized.contains('\0') {
        return Err(reject());
    }
    if normalized.starts_with('/') {
        return Err(reject());
    }
    if normalized.len() >= 2 && normalized.as_bytes()[1] == b':' {
        return Err(reject());
    }

    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(reject())
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(reject());
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::{write::SimpleFileOptions, ZipWriter};

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_three_entries() {
        let temp_dir = TempDir::new().unwrap();
        let zip = build_zip(&[
            ("readme.txt", &b"hello"[..]),
            ("docs/guide.md", &b"# guide\n"[..]),
            ("docs/img/logo.bin", &[0u8; 300][..]),
        ]);

        let entries = extract(&zip, temp_dir.path()).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].relative_path, "readme.txt");
        assert_eq!(entries[1].relative_path, "docs/guide.md");
        assert_eq!(entries[2].relative_path, "docs/img/logo.bin");
        assert_eq!(entries.iter().map(|e| e.size).sum::<u64>(), 5 + 8 + 300);
        assert_eq!(
            fs::read(temp_dir.path().join("docs/guide.md")).unwrap(),
            b"# guide\n"
        );
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out");
        let zip = build_zip(&[
            ("ok.txt", &b"fine"[..]),
            ("../../etc/passwel", &b"root::0:0"[..]),
        ]);

        let result = extract(&zip, &dest);

        assert!(matches!(result, Err(ExtractError::PathTraversal(name)) if name == "../../etc/passwel"));
        // Nothing written, not even the valid entry
        assert!(!dest.exists());
        assert!(!temp_dir.path().join("etc").exists());
    }

    #[test]
    fn test_corrupt_archive() {
        let temp_dir = TempDir::new().unwrap();
        let result = extract(b"definitely not a zip", temp_dir.path());
        assert!(matches!(result, Err(ExtractError::Archive(_))));
    }

    #[test]
    fn test_entry_name_validation() {
        assert_eq!(validate_entry_name("a/./b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(validate_entry_name("dir\\file.txt").unwrap(), PathBuf::from("dir/file.txt"));
        assert!(validate_entry_name("/etc/passwd").is_err());
        assert!(validate_entry_name("C:/Windows/evil.dll").is_err());
        assert!(validate_entry_name("a/../../b").is_err());
        assert!(validate_entry_name("..\\..\\b").is_err());
        assert!(validate_entry_name("./").is_err());
        assert!(validate_entry_name("").is_err());
    }

    #[test]
    fn test_directory_entries_not_reported() {
        let temp_dir = TempDir::new().unwrap();
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.add_directory("empty/", options).unwrap();
        zip.start_file("empty/../top.txt", options).unwrap();
        zip.write_all(b"x").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        // The dotted name still fails even though it resolves inside
        assert!(matches!(
            extract(&bytes, temp_dir.path()),
            Err(ExtractError::PathTraversal(_))
        ));

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.add_directory("empty/", options).unwrap();
        zip.start_file("top.txt", options).unwrap();
        zip.write_all(b"x").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let entries = extract(&bytes, temp_dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(temp_dir.path().join("empty").is_dir());
    }
}
