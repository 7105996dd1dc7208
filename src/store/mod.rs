//! The upload directory: the only state shared between the upload and
//! listing endpoints. There is no locking; concurrent writers to one name
//! race and the filesystem decides who wins.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct UploadDir {
    root: PathBuf,
}

/// One regular file as seen by the listing side.
#[derive(Clone, Debug)]
pub struct StoredEntry {
    pub name: String,
    pub modified: SystemTime,
    pub len: u64,
}

impl StoredEntry {
    pub fn has_extension(&self, extensions: &[&str]) -> bool {
        extensions.iter().any(|ext| self.name.ends_with(ext))
    }
}

impl UploadDir {
    /// Uses `root` as the upload directory, creating it if needed.
    pub fn open<P: Into<PathBuf>>(root: P) -> io::Result<UploadDir> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(UploadDir { root })
    }

    pub fn path(&self) -> &Path { &self.root }

    /// Creates `name`, or truncates it if it already exists.
    ///
    /// `name` is joined onto the upload directory as given, so separators and
    /// `..` are honoured; callers decide whether to allow that.
    pub fn create_or_truncate(&self, name: &str) -> io::Result<UploadFile> {
        let path = self.root.join(name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!(path = %path.display(), "opened upload file");
        Ok(UploadFile {
            file,
            path,
            written: 0,
        })
    }

    /// Regular files directly inside the directory, sorted by name.
    pub fn list_entries(&self) -> io::Result<Vec<StoredEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(m) => m,
                _ => {
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                _ => {
                    continue;
                }
            };
            entries.push(StoredEntry {
                name,
                modified: meta.modified()?,
                len: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Opens a stored file for reading. Only plain names directly inside the
    /// directory resolve; anything else is reported as absent.
    pub fn open_entry(&self, name: &str) -> io::Result<Option<(File, u64)>> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." || name == "." {
            return Ok(None);
        }
        let path = self.root.join(name);
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if !meta.is_file() {
            return Ok(None);
        }
        Ok(Some((File::open(&path)?, meta.len())))
    }
}

/// Write handle for one upload. Dropping it closes the file; `close` also
/// flushes it to disk and reports the final size.
pub struct UploadFile {
    file: File,
    path: PathBuf,
    written: u64,
}

impl UploadFile {
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 { self.written }

    pub fn path(&self) -> &Path { &self.path }

    pub fn close(mut self) -> io::Result<u64> {
        self.file.flush()?;
        self.file.sync_all()?;
        info!(
            path = %self.path.display(),
            size_bytes = self.written,
            "upload file committed"
        );
        Ok(self.written)
    }
}
