//! ZIP packaging of a generated project directory.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::StorageError;

/// Pack every file under `root` into an in-memory ZIP archive.
///
/// Entry names are paths relative to `root` with `/` separators, in sorted
/// order so identical trees produce identical listings. Directories are
/// implied by their files.
pub fn zip_directory(root: &Path) -> Result<Vec<u8>, StorageError> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for path in files {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer.start_file(name, options)?;
        let mut file = File::open(&path)?;
        io::copy(&mut file, &mut writer)?;
    }

    Ok(writer.finish()?.into_inner())
}

/// [`zip_directory`] on the blocking thread pool.
pub async fn zip_directory_blocking(root: PathBuf) -> Result<Vec<u8>, StorageError> {
    tokio::task::spawn_blocking(move || zip_directory(&root))
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))?
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}
