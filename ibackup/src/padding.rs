//! Repair of legacy PKCS#7 padding.
//!
//! Earlier tool versions decrypted the manifest database without removing its
//! PKCS#7 padding and re-encrypted it with the padding still inside the
//! plaintext. After decryption such a file ends in `n` bytes of value `n`,
//! possibly followed by zero bytes. This module detects that pattern and truncates
//! it away. A file that does not match exactly is left alone.

use crate::cipher::BLOCK_SIZE;
use crate::error::{IoResultExt, Result};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

const WINDOW_SIZE: u64 = 1024;

/// New file length once the PKCS#7 pad ending `tail` is removed, or `None` if
/// there is no valid pad. `tail` ends at `content_end`, the offset just past the
/// last non-zero byte.
fn unpadded_length(tail: &[u8], content_end: u64) -> Option<u64> {
    let pad = *tail.last()? as u64;
    if pad == 0 || pad > BLOCK_SIZE as u64 {
        debug!(pad, "last non-zero byte is not a padding length");
        return None;
    }
    if content_end < pad {
        debug!(pad, "file is too small for its padding");
        return None;
    }
    if content_end % BLOCK_SIZE as u64 != 0 {
        debug!(content_end, "padded length is not a multiple of the block size");
        return None;
    }
    let pad_bytes = &tail[tail.len().checked_sub(pad as usize)?..];
    if pad_bytes.iter().any(|&b| b as u64 != pad) {
        debug!(pad, "padding bytes do not match");
        return None;
    }
    Some(content_end - pad)
}

/// Detect and strip legacy padding from the file at `path`.
///
/// Returns `true` if the file was truncated.
pub fn try_fix_padding(path: &Path) -> Result<bool> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .at_path(path)?;
    let length = file.metadata().at_path(path)?.len();

    let mut content_end = 0u64;
    let mut window_end = length;
    let mut buffer = vec![0u8; WINDOW_SIZE as usize];
    while window_end > 0 {
        let window_start = window_end.saturating_sub(WINDOW_SIZE);
        let window = &mut buffer[..(window_end - window_start) as usize];
        file.seek(SeekFrom::Start(window_start)).at_path(path)?;
        file.read_exact(window).at_path(path)?;
        if let Some(i) = window.iter().rposition(|&b| b != 0) {
            content_end = window_start + i as u64 + 1;
            break;
        }
        window_end = window_start;
    }
    if content_end == 0 {
        return Ok(false);
    }

    let tail_start = content_end.saturating_sub(BLOCK_SIZE as u64);
    let mut tail = vec![0u8; (content_end - tail_start) as usize];
    file.seek(SeekFrom::Start(tail_start)).at_path(path)?;
    file.read_exact(&mut tail).at_path(path)?;

    match unpadded_length(&tail, content_end) {
        Some(new_length) => {
            debug!(
                path = %path.display(),
                removed = length - new_length,
                "stripping legacy padding"
            );
            file.set_len(new_length).at_path(path)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
