//! In-memory zip extraction with entry caps and zip-slip protection.

use anyhow::{bail, Context as _, Result};
use std::io::{Cursor, Read};

/// Upper bound on entries per archive; anything past this is hostile or
/// broken, not a model download.
const MAX_ENTRIES: usize = 10_000;

/// One extracted archive entry: relative path plus contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Extract every file entry of a zip archive held in memory. Directory
/// entries are skipped; entry names that escape the extraction root are
/// rejected outright.
pub fn extract_zip(bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("open zip archive")?;
    if archive.len() > MAX_ENTRIES {
        bail!("archive has {} entries (cap {})", archive.len(), MAX_ENTRIES);
    }

    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).context("read zip entry")?;
        if file.is_dir() {
            continue;
        }
        let Some(path) = file.enclosed_name() else {
            bail!("zip entry '{}' escapes the extraction root", file.name());
        };
        let path = path.to_string_lossy().into_owned();
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)
            .with_context(|| format!("decompress zip entry '{}'", path))?;
        entries.push(ArchiveEntry { path, bytes: buf });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(names_and_bodies: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut cursor);
        for (name, body) in names_and_bodies {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn extracts_file_entries() {
        let data = build_zip(&[
            ("model.stl", b"solid model".as_slice()),
            ("sub/readme.txt", b"hi".as_slice()),
        ]);
        let entries = extract_zip(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "model.stl");
        assert_eq!(entries[0].bytes, b"solid model");
        assert_eq!(entries[1].path, "sub/readme.txt");
    }

    #[test]
    fn rejects_zip_slip_entries() {
        let data = build_zip(&[("../evil.sh", b"rm -rf".as_slice())]);
        let err = extract_zip(&data).unwrap_err();
        assert!(err.to_string().contains("escapes"), "got: {err:#}");
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(extract_zip(b"<!doctype html>not a zip").is_err());
    }
}
