//! File-backed byte store for cartridge saves.
//!
//! Every write goes to the file immediately and is flushed, so a save is on
//! disk as soon as the game has written it. If the file cannot be opened the
//! store keeps working in a degraded mode: reads return erased bytes and
//! writes are dropped.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Value of an erased byte.
pub const ERASED: u8 = 0xFF;

#[derive(Debug)]
pub enum BackupError {
    Open { path: PathBuf, source: io::Error },
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "cannot open save file {}: {source}", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "cannot write save file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Io { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Default)]
enum Persistence {
    File { path: PathBuf, file: File },
    /// Kept in memory only.
    Volatile,
    /// Opening failed, the contents are lost.
    #[default]
    Unavailable,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BackupStorage {
    data: Vec<u8>,
    #[serde(skip)]
    persistence: Persistence,
}

impl BackupStorage {
    /// Opens or creates `path`, growing it to at least `capacity` erased bytes.
    ///
    /// On failure the error is returned together with a store that reads
    /// erased bytes and ignores writes.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, (Self, BackupError)> {
        let path = path.as_ref().to_path_buf();
        match Self::open_file(&path, capacity) {
            Ok(storage) => Ok(storage),
            Err(source) => {
                let unavailable = Self {
                    data: vec![ERASED; capacity],
                    persistence: Persistence::Unavailable,
                };
                Err((unavailable, BackupError::Open { path, source }))
            }
        }
    }

    fn open_file(path: &Path, capacity: usize) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::with_capacity(capacity);
        file.read_to_end(&mut data)?;

        let existing = data.len();
        if existing < capacity {
            data.resize(capacity, ERASED);
            file.seek(SeekFrom::Start(existing as u64))?;
            file.write_all(&data[existing..])?;
            file.flush()?;
        }

        tracing::info!(
            "save file {} opened ({existing} bytes on disk, {} in use)",
            path.display(),
            data.len()
        );

        Ok(Self {
            data,
            persistence: Persistence::File {
                path: path.to_path_buf(),
                file,
            },
        })
    }

    /// A store that is never written to disk.
    #[must_use]
    pub fn volatile(capacity: usize) -> Self {
        Self {
            data: vec![ERASED; capacity],
            persistence: Persistence::Volatile,
        }
    }

    /// Size of an existing save, used to guess the chip size.
    #[must_use]
    pub fn existing_size(path: impl AsRef<Path>) -> Option<u64> {
        std::fs::metadata(path).ok().map(|m| m.len())
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        !matches!(self.persistence, Persistence::Unavailable)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Reads past the end return erased bytes.
    #[must_use]
    pub fn read_byte(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(ERASED)
    }

    pub fn read(&self, offset: usize, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.read_byte(offset + i);
        }
    }

    pub fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), BackupError> {
        self.write(offset, &[value])
    }

    /// Writes `bytes` at `offset`; bytes past the end are dropped.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), BackupError> {
        if !self.is_available() || offset >= self.data.len() {
            return Ok(());
        }

        let end = (offset + bytes.len()).min(self.data.len());
        self.data[offset..end].copy_from_slice(&bytes[..end - offset]);
        self.persist(offset, end)
    }

    /// Sets `len` bytes from `offset` to the erased value.
    pub fn erase(&mut self, offset: usize, len: usize) -> Result<(), BackupError> {
        if !self.is_available() || offset >= self.data.len() {
            return Ok(());
        }

        let end = (offset + len).min(self.data.len());
        self.data[offset..end].fill(ERASED);
        self.persist(offset, end)
    }

    pub fn erase_all(&mut self) -> Result<(), BackupError> {
        self.erase(0, self.data.len())
    }

    /// Grows the store with erased bytes. Never shrinks it.
    pub fn resize(&mut self, capacity: usize) -> Result<(), BackupError> {
        let old = self.data.len();
        if capacity <= old {
            return Ok(());
        }

        self.data.resize(capacity, ERASED);
        if self.is_available() {
            self.persist(old, capacity)
        } else {
            Ok(())
        }
    }

    fn persist(&mut self, start: usize, end: usize) -> Result<(), BackupError> {
        let Persistence::File { path, file } = &mut self.persistence else {
            return Ok(());
        };

        write_at(file, start as u64, &self.data[start..end]).map_err(|source| BackupError::Io {
            path: path.clone(),
            source,
        })
    }
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    file.flush()
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Fresh path in the temp directory, removed on drop.
    pub struct TempSave(pub PathBuf);

    impl TempSave {
        pub fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "clementine-hw-{}-{name}-{:016x}.sav",
                std::process::id(),
                rand::random::<u64>()
            ));
            Self(path)
        }
    }

    impl Drop for TempSave {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn new_file_is_erased() {
        let save = TempSave::new("erased");
        let storage = BackupStorage::open(&save.0, 0x100).unwrap();

        assert!(storage.is_available());
        assert_eq!(storage.len(), 0x100);
        assert!(storage.as_slice().iter().all(|&b| b == ERASED));
        assert_eq!(std::fs::read(&save.0).unwrap(), vec![ERASED; 0x100]);
    }

    #[test]
    fn writes_reach_the_file_immediately() {
        let save = TempSave::new("write-through");
        let mut storage = BackupStorage::open(&save.0, 0x10).unwrap();
        storage.write(4, &[1, 2, 3]).unwrap();

        let on_disk = std::fs::read(&save.0).unwrap();
        assert_eq!(&on_disk[3..8], &[ERASED, 1, 2, 3, ERASED]);

        drop(storage);
        let reopened = BackupStorage::open(&save.0, 0x10).unwrap();
        assert_eq!(reopened.read_byte(5), 2);
    }

    #[test]
    fn erase_range_and_all() {
        let save = TempSave::new("erase");
        let mut storage = BackupStorage::open(&save.0, 0x20).unwrap();
        storage.write(0, &[0; 0x20]).unwrap();
        storage.erase(0x10, 0x100).unwrap();

        assert_eq!(storage.read_byte(0xF), 0);
        assert_eq!(storage.read_byte(0x10), ERASED);

        storage.erase_all().unwrap();
        assert_eq!(std::fs::read(&save.0).unwrap(), vec![ERASED; 0x20]);
    }

    #[test]
    fn existing_contents_are_kept_and_extended() {
        let save = TempSave::new("extend");
        std::fs::write(&save.0, [7; 8]).unwrap();

        let storage = BackupStorage::open(&save.0, 16).unwrap();
        assert_eq!(storage.read_byte(7), 7);
        assert_eq!(storage.read_byte(8), ERASED);
        assert_eq!(BackupStorage::existing_size(&save.0), Some(16));
    }

    #[test]
    fn unavailable_store_reads_erased_and_drops_writes() {
        let dir = TempSave::new("dir");
        std::fs::create_dir_all(&dir.0).unwrap();

        let (mut storage, err) = BackupStorage::open(&dir.0, 4).unwrap_err();
        assert!(matches!(err, BackupError::Open { .. }));
        assert!(!storage.is_available());

        storage.write(0, &[0]).unwrap();
        assert_eq!(storage.read_byte(0), ERASED);

        std::fs::remove_dir(&dir.0).unwrap();
    }

    #[test]
    fn resize_only_grows() {
        let mut storage = BackupStorage::volatile(8);
        storage.write_byte(0, 1).unwrap();
        storage.resize(4).unwrap();
        assert_eq!(storage.len(), 8);

        storage.resize(16).unwrap();
        assert_eq!(storage.len(), 16);
        assert_eq!(storage.read_byte(0), 1);
        assert_eq!(storage.read_byte(15), ERASED);
    }
}
