//! Directory-backed medium for replicas on a local file system.
//!
//! ```text
//! <address>/
//! ├─ LOCK              # Advisory lock, one owner at a time
//! ├─ META              # Opaque metadata record (replaced atomically)
//! ├─ volume.img        # Live data
//! └─ snapshots/
//!    └─ <name>.img     # Point-in-time captures
//! ```

use crate::error::{check_range, StorageError, StorageResult};
use crate::medium::Medium;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const META_FILE: &str = "META";
/// Temporary file for atomic metadata writes.
const META_TEMP: &str = "META.tmp";
const DATA_FILE: &str = "volume.img";
const SNAPSHOTS_DIR: &str = "snapshots";

/// Zero buffer size used by `discard`.
const DISCARD_CHUNK: usize = 64 * 1024;

/// A medium stored in a directory on the local file system.
///
/// The directory holds an exclusive advisory lock for as long as the medium
/// is open, so no two owners (threads or processes) can bind it at once.
///
/// # Durability
///
/// - `flush()` pushes data to the OS
/// - `sync()` calls `File::sync_all()`
/// - `store_metadata()` writes a temp file, syncs it, renames it over
///   `META` and syncs the directory
///
/// # Example
///
/// ```no_run
/// use blockrep_storage::{FileMedium, Medium};
/// use std::path::Path;
///
/// let medium = FileMedium::open(Path::new("/var/lib/blockrep/vol1")).unwrap();
/// medium.set_size(1 << 20).unwrap();
/// medium.write_at(0, b"persistent data").unwrap();
/// medium.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    data: RwLock<Option<File>>,
    size: RwLock<u64>,
    lock: Mutex<Option<File>>,
}

/// Maps a failed lock attempt: contention means another owner, anything
/// else is a real I/O failure.
fn lock_error(path: &Path, e: io::Error) -> StorageError {
    if e.kind() == fs2::lock_contended_error().kind() {
        StorageError::Locked(path.display().to_string())
    } else {
        StorageError::Io(e)
    }
}

impl FileMedium {
    /// Opens or creates a medium rooted at the directory `path`.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another owner holds the directory, or an I/O
    /// error if it cannot be created or opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|e| lock_error(path, e))?;

        fs::create_dir_all(path.join(SNAPSHOTS_DIR))?;

        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(DATA_FILE))?;
        let size = data.metadata()?.len();
        debug!(path = %path.display(), size, "opened file medium");

        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(Some(data)),
            size: RwLock::new(size),
            lock: Mutex::new(Some(lock_file)),
        })
    }

    /// Returns the root directory of the medium.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the live data file.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    /// Returns the path of the metadata record.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }

    /// Returns the path of the capture named `name`.
    #[must_use]
    pub fn capture_path(&self, name: &str) -> PathBuf {
        self.path.join(SNAPSHOTS_DIR).join(format!("{name}.img"))
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.lock.lock().is_none() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Syncs a directory so renames and creations inside it are durable.
    #[cfg(unix)]
    fn sync_directory(dir: &Path) -> StorageResult<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(_dir: &Path) -> StorageResult<()> {
        // NTFS journals metadata updates
        Ok(())
    }

    fn copy_live_data(&self, temp: &Path) -> StorageResult<()> {
        let mut data = self.data.write();
        let file = data.as_mut().ok_or(StorageError::Closed)?;
        file.flush()?;
        file.sync_data()?;
        // Holding the data lock keeps writers out for the duration of the copy.
        fs::copy(self.data_path(), temp)?;
        File::open(temp)?.sync_all()?;
        Ok(())
    }
}

impl Medium for FileMedium {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut data = self.data.write();
        let file = data.as_mut().ok_or(StorageError::Closed)?;
        check_range(offset, len as u64, *self.size.read())?;

        if len == 0 {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> StorageResult<usize> {
        let mut data = self.data.write();
        let file = data.as_mut().ok_or(StorageError::Closed)?;
        check_range(offset, bytes.len() as u64, *self.size.read())?;

        if bytes.is_empty() {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn size(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        Ok(*self.size.read())
    }

    fn max_size(&self) -> u64 {
        // File offsets are signed.
        i64::MAX as u64
    }

    fn set_size(&self, new_size: u64) -> StorageResult<()> {
        let data = self.data.write();
        let file = data.as_ref().ok_or(StorageError::Closed)?;
        file.set_len(new_size)?;
        file.sync_all()?;
        *self.size.write() = new_size;
        Ok(())
    }

    fn allocated(&self) -> StorageResult<u64> {
        let data = self.data.read();
        let file = data.as_ref().ok_or(StorageError::Closed)?;
        Ok(file.allocated_size()?)
    }

    fn flush(&self) -> StorageResult<()> {
        let mut data = self.data.write();
        data.as_mut().ok_or(StorageError::Closed)?.flush()?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        let data = self.data.write();
        data.as_ref().ok_or(StorageError::Closed)?.sync_all()?;
        Ok(())
    }

    fn discard(&self, offset: u64, len: u64) -> StorageResult<u64> {
        let mut data = self.data.write();
        let file = data.as_mut().ok_or(StorageError::Closed)?;
        check_range(offset, len, *self.size.read())?;

        let zeros = [0u8; DISCARD_CHUNK];
        file.seek(SeekFrom::Start(offset))?;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(DISCARD_CHUNK as u64) as usize;
            file.write_all(&zeros[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(len)
    }

    fn probe(&self) -> StorageResult<()> {
        let data = self.data.read();
        let file = data.as_ref().ok_or(StorageError::Closed)?;
        file.metadata()?;
        fs::metadata(&self.path)?;
        Ok(())
    }

    fn capture(&self, name: &str) -> StorageResult<()> {
        self.ensure_open()?;
        let target = self.capture_path(name);
        if target.exists() {
            return Err(StorageError::CaptureExists(name.to_string()));
        }

        let temp = target.with_extension("img.tmp");
        if let Err(e) = self.copy_live_data(&temp) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
        fs::rename(&temp, &target)?;
        Self::sync_directory(&self.path.join(SNAPSHOTS_DIR))?;

        debug!(path = %target.display(), "captured live data");
        Ok(())
    }

    fn remove_capture(&self, name: &str) -> StorageResult<()> {
        self.ensure_open()?;
        match fs::remove_file(self.capture_path(name)) {
            Ok(()) => Self::sync_directory(&self.path.join(SNAPSHOTS_DIR)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::CaptureMissing(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn has_capture(&self, name: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.capture_path(name).is_file())
    }

    fn load_metadata(&self) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(None);
        }

        let mut record = Vec::new();
        File::open(&path)?.read_to_end(&mut record)?;
        if record.is_empty() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn store_metadata(&self, record: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        let temp_path = self.path.join(META_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(record)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.metadata_path())?;
        Self::sync_directory(&self.path)
    }

    fn release(&self) -> StorageResult<()> {
        // Drop the data handle first so queued I/O observes `Closed`.
        let data = self.data.write().take();
        let lock = self.lock.lock().take();
        match (data, lock) {
            (_, None) => Err(StorageError::Closed),
            (data, Some(lock)) => {
                if let Some(file) = data {
                    file.sync_all()?;
                }
                FileExt::unlock(&lock)?;
                debug!(path = %self.path.display(), "released file medium");
                Ok(())
            }
        }
    }
}
