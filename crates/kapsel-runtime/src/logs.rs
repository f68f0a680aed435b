//! Container log access.

use std::io::ErrorKind;
use std::path::Path;

use kapsel_common::error::{KapselError, Result};

/// Reads a detached container's log file.
///
/// Returns an empty string if the log file does not exist yet, which is the
/// case for interactive containers.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(path: &Path) -> Result<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(KapselError::io(path, e)),
    }
}

/// Opens (creating or truncating) the log file a detached container writes
/// to.
///
/// # Errors
///
/// Returns an error if the parent directory or file cannot be created.
pub fn create_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| KapselError::io(parent, e))?;
    }
    std::fs::File::create(path).map_err(|e| KapselError::io(path, e))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn read_logs_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let content = read_logs(&dir.path().join("nope.log")).unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn create_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c1/c1-json.log");
        let mut file = create_log_file(&path).unwrap();
        writeln!(file, "hello from c1").unwrap();
        drop(file);
        assert_eq!(read_logs(&path).unwrap(), "hello from c1\n");

        let _ = create_log_file(&path).unwrap();
        assert!(read_logs(&path).unwrap().is_empty());
    }

    #[test]
    fn read_logs_tolerates_binary_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin.log");
        std::fs::write(&path, [b'o', b'k', 0xff]).unwrap();
        assert!(read_logs(&path).unwrap().starts_with("ok"));
    }
}
