//! Writing the received payload without ever overwriting an existing file

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{Result, ShareError};
use crate::util::sanitize_file_name;

/// Give up after this many `_<n>` suffixes
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// `report.pdf` with `n = 2` becomes `report_2.pdf`; `n = 0` is the name itself
pub fn numbered_name(file_name: &str, n: u32) -> String {
    if n == 0 {
        return file_name.to_string();
    }

    match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &file_name[..dot], n, &file_name[dot..]),
        _ => format!("{}_{}", file_name, n),
    }
}

/// Open a new file with owner-only permissions (0o600 on Unix). Fails if it exists.
async fn create_secure_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Create the first free `name`, `name_1`, `name_2`, ... inside `dir`
async fn create_unique(dir: &Path, file_name: &str) -> Result<(PathBuf, File)> {
    for n in 0..MAX_NAME_ATTEMPTS {
        let candidate = dir.join(numbered_name(file_name, n));
        match create_secure_file(&candidate).await {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(ShareError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", file_name, dir.display()),
    )))
}

/// BLAKE3 hex digest, computed off the async runtime
pub async fn hash_payload(payload: &Bytes) -> Result<String> {
    let data = payload.clone();
    tokio::task::spawn_blocking(move || crate::util::hash_bytes(&data))
        .await
        .map_err(|e| ShareError::Io(io::Error::other(e.to_string())))
}

/// Verify `payload` against `expected_hash` (when given) and write it under a
/// collision-free, sanitized name in `dir`. Returns the final path.
pub async fn save_payload(
    dir: &Path,
    announced_name: &str,
    payload: &Bytes,
    expected_hash: Option<&str>,
) -> Result<PathBuf> {
    let file_name = sanitize_file_name(announced_name);

    if let Some(expected) = expected_hash {
        let actual = hash_payload(payload).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(ShareError::IntegrityMismatch {
                file_name,
                expected: expected.to_string(),
                actual,
            });
        }
        tracing::debug!("Integrity check passed for {}", file_name);
    }

    tokio::fs::create_dir_all(dir).await?;
    let (path, mut file) = create_unique(dir, &file_name).await?;

    let written = async {
        file.write_all(payload).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e.into());
    }

    tracing::info!("Saved {} bytes to {}", payload.len(), path.display());
    Ok(path)
}
