//! SHA-256 verification of input files against `.sha` sidecars.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{MqError, Result};
use crate::fscall::TaskLog;

/// Hex digest of a file, streamed in 64 KiB blocks.
pub fn sha256_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

/// Compare a file against its `<stem>.sha` sidecar.
///
/// The expected digest is the first whitespace-delimited token of the first
/// non-blank line. A missing sidecar is allowed (with a warning); a
/// malformed sidecar or a differing digest fails the task.
pub fn verify_sidecar(log: &TaskLog, file: &Path) -> Result<()> {
    log.info(format!("Compute checksum of {}", file.display()));
    let actual = sha256_hex(file)?;
    log.info(format!("Checksum of file {} is {}", file.display(), actual));

    let sidecar = file.with_extension("sha");
    let contents = match fs::read_to_string(&sidecar) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log.warn(format!("No checksum file for {}", file.display()));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let expected = contents
        .lines()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split_whitespace().next())
        .ok_or_else(|| {
            log.error(format!("Invalid checksum file: {}", sidecar.display()));
            MqError::ChecksumMismatch(format!("invalid checksum file {}", sidecar.display()))
        })?;

    if !expected.eq_ignore_ascii_case(&actual) {
        log.error(format!(
            "Checksums for file {} do not match. Should be {} but is {}",
            file.display(),
            expected,
            actual
        ));
        return Err(MqError::ChecksumMismatch(file.display().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_log(dir: &Path) -> TaskLog {
        TaskLog::open(&dir.join("logfile.txt"), "test").unwrap()
    }

    #[test]
    fn test_sha256_of_known_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.raw");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_hex(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_matching_sidecar_passes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.raw");
        fs::write(&path, b"abc").unwrap();
        fs::write(
            dir.path().join("data.sha"),
            "\nba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  data.raw\n",
        )
        .unwrap();

        verify_sidecar(&test_log(dir.path()), &path).unwrap();
    }

    #[test]
    fn test_mismatching_sidecar_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.raw");
        fs::write(&path, b"abc").unwrap();
        fs::write(dir.path().join("data.sha"), "deadbeef data.raw\n").unwrap();

        match verify_sidecar(&test_log(dir.path()), &path) {
            Err(MqError::ChecksumMismatch(_)) => {}
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_sidecar_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.raw");
        fs::write(&path, b"abc").unwrap();
        fs::write(dir.path().join("data.sha"), "\n   \n").unwrap();

        assert!(verify_sidecar(&test_log(dir.path()), &path).is_err());
    }

    #[test]
    fn test_absent_sidecar_is_permitted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.raw");
        fs::write(&path, b"abc").unwrap();

        verify_sidecar(&test_log(dir.path()), &path).unwrap();
    }
}
