//! The small pointer file that survives a crash mid-rotation and tells
//! restore which letter of the log and the snapshot are currently active
//! (§4.8, §6: "a small header file carrying the current active letter").
//!
//! Written with the same write-fsync-rename discipline as the snapshot
//! files themselves, so the header update and the file it points at can
//! never be observed out of order relative to each other's durability.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Which of the two alternating files is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Letter {
    /// `<stem>.a`
    A,
    /// `<stem>.b`
    B,
}

impl Letter {
    /// The other letter, i.e. where the next rotation writes.
    pub fn other(self) -> Self {
        match self {
            Letter::A => Letter::B,
            Letter::B => Letter::A,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Letter::A => b'a',
            Letter::B => b'b',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'a' => Some(Letter::A),
            b'b' => Some(Letter::B),
            _ => None,
        }
    }

    /// The file suffix this letter names.
    pub fn suffix(self) -> &'static str {
        match self {
            Letter::A => "a",
            Letter::B => "b",
        }
    }
}

/// Points at the currently active log file and the currently active
/// snapshot file, as one atomically-swapped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHeader {
    /// Active log letter.
    pub log: Letter,
    /// Active snapshot letter.
    pub snapshot: Letter,
}

impl ActiveHeader {
    /// The header an empty, freshly created database starts from.
    pub fn fresh() -> Self {
        Self { log: Letter::A, snapshot: Letter::A }
    }

    fn path(dir: &Path) -> PathBuf {
        dir.join("active.hdr")
    }

    /// Load the header, or [`ActiveHeader::fresh`] if none exists yet.
    pub fn load_or_default(dir: &Path) -> io::Result<Self> {
        let path = Self::path(dir);
        match fs::read(&path) {
            Ok(bytes) if bytes.len() >= 2 => {
                let log = Letter::from_byte(bytes[0])
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad log letter in header"))?;
                let snapshot = Letter::from_byte(bytes[1])
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad snapshot letter in header"))?;
                Ok(Self { log, snapshot })
            }
            Ok(_) => Ok(Self::fresh()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::fresh()),
            Err(e) => Err(e),
        }
    }

    /// Durably persist the header: write to a temp file, fsync, rename into
    /// place, then fsync the containing directory.
    pub fn store(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        let final_path = Self::path(dir);
        let temp_path = dir.join(".active.hdr.tmp");

        fs::write(&temp_path, [self.log.as_byte(), self.snapshot.as_byte()])?;
        {
            let f = File::open(&temp_path)?;
            f.sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;
        let d = File::open(dir)?;
        d.sync_all()?;
        Ok(())
    }
}
