//! On-disk output layout and path-segment sanitization.
//!
//! One object downloads into `<base>/<designer>/<object>/` holding the
//! human-readable notes file, an `images/` folder, a `files/` folder, and a
//! machine-readable snapshot used for idempotent re-validation and resume.

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

use crate::api::ObjectDetails;

pub const NOTES_FILE: &str = "notes.md";
pub const SNAPSHOT_FILE: &str = "object.json";
pub const IMAGES_DIR: &str = "images";
pub const FILES_DIR: &str = "files";
/// Written into `images/` when no image could be fetched, so a resumed run
/// can tell "none were available" apart from "never attempted".
pub const NO_IMAGES_NOTE: &str = "no-images.txt";

/// Marker line the validation engine looks for in the notes header block.
pub const NOTES_ID_LABEL: &str = "Object ID:";

/// Sanitizes one path segment: the characters `\ / : * ? " < > |` become
/// `_`, then trailing dots and spaces are stripped (illegal at the end of a
/// segment on common filesystems).
pub fn sanitize_segment(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    let trimmed = replaced.trim_end_matches(['.', ' ']);
    trimmed.to_string()
}

/// Folder for one object under the configured base directory.
pub fn object_dir(base: &Path, object: &ObjectDetails) -> PathBuf {
    base.join(sanitize_segment(&object.designer))
        .join(sanitize_segment(&object.name))
}

/// Deterministic on-disk name for the image at `index` (1-based in the
/// filename so listings sort naturally).
pub fn image_filename(index: usize, url: &str) -> String {
    let ext = url
        .rsplit('/')
        .next()
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext.split(['?', '#']).next().unwrap_or("jpg"))
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .unwrap_or("jpg");
    format!("{:03}.{}", index + 1, ext)
}

/// Append the access token as a query parameter, when one is available.
pub fn with_access_token(raw_url: &str, token: Option<&str>) -> String {
    let Some(token) = token else {
        return raw_url.to_string();
    };
    match url::Url::parse(raw_url) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("token", token);
            url.into()
        }
        // Not parseable; hand it to the fetch layer untouched and let the
        // request fail with a real error.
        Err(_) => raw_url.to_string(),
    }
}

/// Write the human-readable notes file with its structured header block.
pub async fn write_notes(dir: &Path, object: &ObjectDetails) -> Result<()> {
    let mut notes = format!("# {}\n\n## Details\n\n", object.name);
    notes.push_str(&format!("- {} {}\n", NOTES_ID_LABEL, object.id));
    notes.push_str(&format!("- Designer: {}\n", object.designer));
    if let Some(source) = &object.source_url {
        notes.push_str(&format!("- Source: {}\n", source));
    }
    notes.push_str(&format!("- Images: {}\n", object.images.len()));
    notes.push_str(&format!("- Files: {}\n", object.downloadable_files().count()));
    if !object.description.is_empty() {
        notes.push_str("\n## Description\n\n");
        notes.push_str(&object.description);
        notes.push('\n');
    }
    let path = dir.join(NOTES_FILE);
    tokio::fs::write(&path, notes)
        .await
        .with_context(|| format!("write notes file {}", path.display()))
}

/// Write the machine-readable metadata snapshot next to the notes file.
pub async fn write_snapshot(dir: &Path, object: &ObjectDetails) -> Result<()> {
    let path = dir.join(SNAPSHOT_FILE);
    let data = serde_json::to_vec_pretty(object).context("serialize object snapshot")?;
    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("write snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FileRef, ImageRef};
    use tempfile::TempDir;

    #[test]
    fn sanitize_replaces_illegal_characters() {
        assert_eq!(sanitize_segment(r#"a\b/c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn sanitize_strips_trailing_dots_and_spaces() {
        assert_eq!(sanitize_segment("Dragon v2. "), "Dragon v2");
        assert_eq!(sanitize_segment("name..."), "name");
        // Leading characters are untouched.
        assert_eq!(sanitize_segment(" .name"), " .name");
    }

    #[test]
    fn object_dir_uses_sanitized_segments() {
        let object = ObjectDetails {
            id: "1".into(),
            name: "What? A: Dragon".into(),
            designer: "mx/print.".into(),
            ..Default::default()
        };
        let dir = object_dir(Path::new("/vault"), &object);
        assert_eq!(dir, Path::new("/vault/mx_print/What_ A_ Dragon"));
    }

    #[test]
    fn image_filename_keeps_extension() {
        assert_eq!(image_filename(0, "https://cdn/x/photo.png?w=1200"), "001.png");
        assert_eq!(image_filename(11, "https://cdn/x/photo.jpeg"), "012.jpeg");
        assert_eq!(image_filename(2, "https://cdn/noext"), "003.jpg");
    }

    #[test]
    fn token_is_appended_as_query_pair() {
        assert_eq!(
            with_access_token("https://cdn/file.zip", Some("abc")),
            "https://cdn/file.zip?token=abc"
        );
        assert_eq!(
            with_access_token("https://cdn/file.zip?v=2", Some("abc")),
            "https://cdn/file.zip?v=2&token=abc"
        );
        assert_eq!(with_access_token("https://cdn/file.zip", None), "https://cdn/file.zip");
    }

    #[tokio::test]
    async fn notes_header_contains_id_label() {
        let tmp = TempDir::new().unwrap();
        let object = ObjectDetails {
            id: "42".into(),
            name: "Dragon".into(),
            designer: "mx_print".into(),
            description: "A dragon.".into(),
            images: vec![ImageRef::default()],
            files: vec![FileRef {
                name: "dragon.zip".into(),
                download_url: Some("https://cdn/dragon.zip".into()),
                size_bytes: None,
            }],
            ..Default::default()
        };
        write_notes(tmp.path(), &object).await.unwrap();
        let text = std::fs::read_to_string(tmp.path().join(NOTES_FILE)).unwrap();
        assert!(text.starts_with("# Dragon\n"));
        assert!(text.contains("Object ID: 42"));
        assert!(text.contains("- Images: 1"));
        assert!(text.contains("A dragon."));
    }

    #[tokio::test]
    async fn snapshot_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let object = ObjectDetails {
            id: "42".into(),
            name: "Dragon".into(),
            designer: "mx_print".into(),
            ..Default::default()
        };
        write_snapshot(tmp.path(), &object).await.unwrap();
        let data = std::fs::read(tmp.path().join(SNAPSHOT_FILE)).unwrap();
        let parsed: ObjectDetails = serde_json::from_slice(&data).unwrap();
        assert_eq!(parsed, object);
    }
}
