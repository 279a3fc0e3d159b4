//! Local web-session signing key at `.clarity/web/secret.key`.

use std::fs;
use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tracing::info;

use crate::error::Result;
use crate::workspace::{Layout, write_atomic};

/// Raw key length in bytes.
pub const SECRET_LEN: usize = 32;

fn decode(raw: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(raw.trim())
        .ok()
        .filter(|key| key.len() == SECRET_LEN)
}

/// Load the key, creating it (mode 0600) when missing or malformed.
///
/// # Errors
///
/// I/O errors reading or writing the key file.
pub fn load_or_create(layout: &Layout) -> Result<Vec<u8>> {
    let path = layout.web_secret_path();
    match fs::read_to_string(&path) {
        Ok(raw) => {
            if let Some(key) = decode(&raw) {
                return Ok(key);
            }
            info!(path = %path.display(), "web secret malformed; regenerating");
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let mut key = vec![0_u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    let mut encoded = URL_SAFE_NO_PAD.encode(&key);
    encoded.push('\n');
    write_atomic(&path, encoded.as_bytes(), true)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn created_once_then_reused() {
        let dir = TempDir::new().expect("tempdir");
        let layout = Layout::new(dir.path());
        let first = load_or_create(&layout).expect("create");
        assert_eq!(first.len(), SECRET_LEN);
        let second = load_or_create(&layout).expect("load");
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(layout.web_secret_path())
                .expect("meta")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn malformed_key_is_replaced() {
        let dir = TempDir::new().expect("tempdir");
        let layout = Layout::new(dir.path());
        fs::create_dir_all(layout.web_secret_path().parent().expect("parent")).expect("dir");
        fs::write(layout.web_secret_path(), "short").expect("write");
        let key = load_or_create(&layout).expect("regenerate");
        assert_eq!(key.len(), SECRET_LEN);
        let on_disk = fs::read_to_string(layout.web_secret_path()).expect("read");
        assert_eq!(decode(&on_disk), Some(key));
    }
}
