//! Attachment blobs under `resources/attachments/<id>/<name>`.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ClarityError, Result};
use crate::event::payload::AttachmentAdd;
use crate::id::{ATTACHMENT_PREFIX, IdAllocator};
use crate::workspace::{Layout, RESOURCES_DIR};

/// Default size cap for one attachment.
pub const DEFAULT_ATTACHMENT_MAX_BYTES: u64 = 50 * 1024 * 1024;

const FALLBACK_NAME: &str = "attachment";

/// Reduce a user-supplied file name to a safe single path component.
#[must_use]
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// MIME type guessed from the file extension.
#[must_use]
pub fn mime_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Copy `reader` into the workspace as a new attachment.
///
/// The SHA-256 and size are computed while copying; exceeding `max_bytes`
/// removes the partial blob.
///
/// # Errors
///
/// [`ClarityError::AttachmentTooLarge`] over the cap, I/O errors otherwise.
pub fn store<R: Rng>(
    layout: &Layout,
    ids: &mut IdAllocator<R>,
    original_name: &str,
    mut reader: impl Read,
    max_bytes: u64,
) -> Result<AttachmentAdd> {
    let dir_root = layout.attachments_dir();
    let id = ids.allocate(ATTACHMENT_PREFIX, |candidate| dir_root.join(candidate).exists())?;
    let name = sanitize_file_name(original_name);
    let dir = dir_root.join(&id);
    fs::create_dir_all(&dir)?;
    let dest = dir.join(&name);

    let copied = copy_hashed(&mut reader, &dest, max_bytes);
    let (size, sha256) = match copied {
        Ok(done) => done,
        Err(err) => {
            let _ = fs::remove_dir_all(&dir);
            return Err(match err {
                CopyError::TooLarge(size) => ClarityError::AttachmentTooLarge {
                    name,
                    size,
                    limit: max_bytes,
                },
                CopyError::Io(io) => io.into(),
            });
        }
    };
    debug!(%id, %name, size, "stored attachment");

    Ok(AttachmentAdd {
        attachment_id: id.clone(),
        mime_type: mime_for(&name).to_string(),
        path: format!("{RESOURCES_DIR}/attachments/{id}/{name}"),
        original_name: name,
        size_bytes: size,
        sha256,
    })
}

/// [`store`] reading from a file on disk.
///
/// # Errors
///
/// As for [`store`], plus failing to open `source`.
pub fn store_file<R: Rng>(
    layout: &Layout,
    ids: &mut IdAllocator<R>,
    source: &Path,
    max_bytes: u64,
) -> Result<AttachmentAdd> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    store(layout, ids, &name, File::open(source)?, max_bytes)
}

enum CopyError {
    TooLarge(u64),
    Io(io::Error),
}

impl From<io::Error> for CopyError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

fn copy_hashed(reader: &mut impl Read, dest: &Path, max_bytes: u64) -> std::result::Result<(u64, String), CopyError> {
    let mut out = File::create(dest)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        total += n as u64;
        if total > max_bytes {
            return Err(CopyError::TooLarge(total));
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
    }
    out.sync_all()?;
    Ok((total, format!("{:x}", hasher.finalize())))
}
