//! HTML-disguised-as-binary detection.
//!
//! A login redirect served with a 200 leaves an HTML document where a binary
//! was expected. Only a small leading window is inspected so sniffing a
//! multi-gigabyte file stays cheap.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Leading byte window inspected for document signatures.
pub const SNIFF_WINDOW: usize = 512;

const SIGNATURES: [&str; 4] = ["<!doctype html", "<html", "<head", "<body"];

/// True if `head` looks like an HTML document (or is empty, which is just as
/// wrong for a binary download).
pub fn looks_like_html(head: &[u8]) -> bool {
    if head.is_empty() {
        return true;
    }
    let window = &head[..head.len().min(SNIFF_WINDOW)];
    let text = String::from_utf8_lossy(window).to_lowercase();
    SIGNATURES.iter().any(|sig| text.contains(sig))
}

/// Sniff a file on disk, reading only the leading window.
pub fn file_looks_like_html(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut head = [0u8; SNIFF_WINDOW];
    let mut read = 0;
    // Loop because a single read may return short of the window.
    loop {
        match file.read(&mut head[read..]) {
            Ok(0) => break,
            Ok(n) => {
                read += n;
                if read == head.len() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(looks_like_html(&head[..read]))
}
