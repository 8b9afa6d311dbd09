// 📂 Source Directory Lister - which statement files are waiting to be landed

use crate::error::{PipelineError, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// List eligible input files in `dir`.
///
/// A file is eligible when it is a regular file whose name ends with
/// `.{extension}` and does not carry the `archive_suffix`. Names are
/// returned sorted so every run lands files in the same order.
pub fn list_source_files(dir: &Path, extension: &str, archive_suffix: &str) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let wanted = format!(".{}", extension.trim_start_matches('.'));
    let mut names = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::DirectoryUnavailable {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                debug!(name = ?raw, "skipping non UTF-8 file name");
                continue;
            }
        };

        if is_eligible(&name, &wanted, archive_suffix) {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

fn is_eligible(name: &str, wanted_ext: &str, archive_suffix: &str) -> bool {
    name.ends_with(wanted_ext) && !name.ends_with(archive_suffix) && name.len() > wanted_ext.len()
}
