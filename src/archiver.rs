// 🗃️ File Archiver - a fully landed file is renamed so it is never listed again

use crate::error::{PipelineError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Path a source file is moved to once landed
pub fn archived_path(dir: &Path, file_name: &str, archive_suffix: &str) -> PathBuf {
    dir.join(format!("{}{}", file_name, archive_suffix))
}

/// Rename `dir/file_name` to `dir/file_name{archive_suffix}`.
///
/// Only call this after landing returned for the file. The rename is
/// irreversible from the pipeline's point of view.
pub fn archive_file(dir: &Path, file_name: &str, archive_suffix: &str) -> Result<PathBuf> {
    let from = dir.join(file_name);
    let to = archived_path(dir, file_name, archive_suffix);

    // rename() would silently replace an earlier archive of the same name
    if to.exists() {
        return Err(PipelineError::Archive {
            path: from,
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ),
        });
    }

    fs::rename(&from, &to).map_err(|e| PipelineError::Archive {
        path: from.clone(),
        source: e,
    })?;

    info!(source = %file_name, archived = %to.display(), "source file archived");
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lister::list_source_files;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_archived_file_is_no_longer_listed() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("jan.csv")).unwrap();

        let archived = archive_file(dir.path(), "jan.csv", ".bak").unwrap();

        assert!(archived.ends_with("jan.csv.bak"));
        assert!(archived.exists());
        assert!(list_source_files(dir.path(), "csv", ".bak").unwrap().is_empty());
    }

    #[test]
    fn test_archiving_missing_file_is_recoverable() {
        let dir = TempDir::new().unwrap();

        let err = archive_file(dir.path(), "gone.csv", ".bak").unwrap_err();

        assert!(matches!(err, PipelineError::Archive { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_existing_archive_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("jan.csv.bak"), "first delivery").unwrap();
        fs::write(dir.path().join("jan.csv"), "second delivery").unwrap();

        let err = archive_file(dir.path(), "jan.csv", ".bak").unwrap_err();

        assert!(matches!(err, PipelineError::Archive { .. }));
        assert!(!err.is_fatal());
        assert_eq!(
            fs::read_to_string(dir.path().join("jan.csv.bak")).unwrap(),
            "first delivery"
        );
        assert!(dir.path().join("jan.csv").exists());
    }
}
