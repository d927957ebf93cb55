//! Validation engine: compare a downloaded folder against its metadata
//! snapshot and report pass/fail with itemized reasons.
//!
//! Consumed by the validate stage (to short-circuit re-downloads) and by
//! the operator audit path. The check can run on the blocking pool; when
//! that offload fails it falls back to running the identical function on
//! the calling context, so the two paths cannot disagree.

use std::path::Path;

use crate::api::ObjectDetails;
use crate::fetch::sniff::file_looks_like_html;
use crate::layout::{sanitize_segment, FILES_DIR, IMAGES_DIR, NOTES_FILE, NOTES_ID_LABEL, NO_IMAGES_NOTE};

/// Extensions worth sniffing for login-redirect HTML: archives and binary
/// model formats a vendor serves behind auth.
const SNIFF_EXTENSIONS: [&str; 8] = ["zip", "rar", "7z", "stl", "obj", "3mf", "gcode", "pdf"];

/// Outcome of validating one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> ValidationReport {
        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validate `dir` against the metadata snapshot. Pure and synchronous; the
/// async wrapper decides where it runs.
pub fn validate_folder(object: &ObjectDetails, dir: &Path) -> ValidationReport {
    let mut errors = Vec::new();

    match std::fs::read_to_string(dir.join(NOTES_FILE)) {
        Ok(text) => {
            if !(text.starts_with("# ") && text.contains(NOTES_ID_LABEL)) {
                errors.push("Notes file is missing its header block.".to_string());
            }
        }
        Err(_) => errors.push("Missing notes file.".to_string()),
    }

    let expected_images = object.images.len();
    if expected_images > 0 {
        let images_dir = dir.join(IMAGES_DIR);
        if images_dir.is_dir() {
            let found = count_files(&images_dir, &[NO_IMAGES_NOTE]);
            if found < expected_images {
                errors.push(format!(
                    "Missing images. Expected {}, found {}.",
                    expected_images, found
                ));
            }
        } else {
            errors.push("Missing images folder.".to_string());
        }
    }

    let expected_files: Vec<_> = object.downloadable_files().collect();
    if !expected_files.is_empty() {
        let files_dir = dir.join(FILES_DIR);
        if files_dir.is_dir() {
            for file in expected_files {
                let path = files_dir.join(sanitize_segment(&file.name));
                if !path.is_file() {
                    errors.push(format!("Missing file: {}.", file.name));
                    continue;
                }
                if should_sniff(&file.name) {
                    match file_looks_like_html(&path) {
                        Ok(true) => errors.push(format!(
                            "Corrupted download (HTML response): {}.",
                            file.name
                        )),
                        Ok(false) => {}
                        Err(e) => errors.push(format!("Unreadable file {}: {}.", file.name, e)),
                    }
                }
            }
        } else {
            errors.push("Missing files folder.".to_string());
        }
    }

    ValidationReport::from_errors(errors)
}

/// Run the check on the blocking pool; fall back inline if the offload
/// itself dies. Same function either way.
pub async fn validate_folder_offloaded(object: &ObjectDetails, dir: &Path) -> ValidationReport {
    let task_object = object.clone();
    let task_dir = dir.to_path_buf();
    match tokio::task::spawn_blocking(move || validate_folder(&task_object, &task_dir)).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("validation offload failed ({}); running inline", e);
            validate_folder(object, dir)
        }
    }
}

fn should_sniff(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_lowercase();
            SNIFF_EXTENSIONS.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}

fn count_files(dir: &Path, excluded: &[&str]) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().is_file())
                .filter(|e| {
                    let name = e.file_name();
                    !excluded.iter().any(|x| name.to_string_lossy() == *x)
                })
                .count()
        })
        .unwrap_or(0)
}
