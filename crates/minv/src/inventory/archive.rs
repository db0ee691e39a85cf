//! ZIP archive writing shared by export and backup.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// ZIP file being written. Unless [`finish`](Self::finish) succeeds, the
/// partial file is removed when the writer is dropped.
pub struct ArchiveWriter {
    zip: Option<ZipWriter<File>>,
    path: PathBuf,
}

impl ArchiveWriter {
    pub fn create(path: &Path) -> Result<Self, ZipError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            zip: Some(ZipWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    fn zip(&mut self) -> Result<&mut ZipWriter<File>, ZipError> {
        self.zip
            .as_mut()
            .ok_or_else(|| ZipError::Io(std::io::Error::other("archive already finished")))
    }

    pub fn add_bytes(&mut self, name: &str, content: &[u8]) -> Result<(), ZipError> {
        let zip = self.zip()?;
        zip.start_file(name.to_string(), SimpleFileOptions::default())?;
        zip.write_all(content)?;
        Ok(())
    }

    pub fn add_json<T: serde::Serialize>(&mut self, name: &str, value: &T) -> Result<(), ZipError> {
        let content = serde_json::to_vec_pretty(value).map_err(std::io::Error::from)?;
        self.add_bytes(name, &content)
    }

    pub fn add_file(&mut self, name: &str, source: &Path) -> Result<(), ZipError> {
        let mut input = File::open(source)?;
        let zip = self.zip()?;
        zip.start_file(name.to_string(), SimpleFileOptions::default())?;
        std::io::copy(&mut input, zip)?;
        Ok(())
    }

    /// Completes the archive and makes it readable by owner and group.
    pub fn finish(mut self) -> Result<PathBuf, ZipError> {
        use std::os::unix::fs::PermissionsExt;

        let result = match self.zip.take() {
            Some(zip) => zip.finish().map(drop),
            None => Ok(()),
        }
        .and_then(|()| {
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o660))
                .map_err(ZipError::from)
        });
        if result.is_err() {
            let _ = std::fs::remove_file(&self.path);
        }
        result.map(|()| std::mem::take(&mut self.path))
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if self.zip.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
