//! The write-ahead log itself: append-only frame storage in the currently
//! active of two alternating files (§4.8, §6).
//!
//! `WalWriter` is the low-level, single-threaded file handle. Concurrent
//! commit batching lives one layer up, in [`crate::group_commit`].

use crate::frame::WalFrame;
use crate::header::{ActiveHeader, Letter};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use velox_core::changeset::ChangeSet;
use velox_core::ids::Version;
use velox_core::{VeloxError, VeloxResult};

fn log_path(dir: &Path, stem: &str, letter: Letter) -> PathBuf {
    dir.join(format!("{stem}.{}", letter.suffix()))
}

/// Every frame recovered from a log file, stopping at the first frame that
/// fails to decode rather than erroring out — a torn trailing frame from a
/// crash mid-append is expected, not exceptional (§4.8, §7).
pub fn read_all_frames(path: &Path) -> VeloxResult<(Vec<WalFrame>, bool)> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(e.into()),
    };

    let mut frames = Vec::new();
    let mut offset = 0;
    let mut tail_corrupted = false;
    while offset < bytes.len() {
        match WalFrame::decode(&bytes[offset..]) {
            Ok((frame, consumed)) => {
                frames.push(frame);
                offset += consumed;
            }
            Err(_) => {
                tail_corrupted = offset < bytes.len();
                break;
            }
        }
    }
    Ok((frames, tail_corrupted))
}

/// Append-only handle to the currently active log file.
pub struct WalWriter {
    dir: PathBuf,
    stem: String,
    letter: Letter,
    file: File,
    next_sequence: u64,
}

impl WalWriter {
    /// Open (or create) the log in `dir`, resuming from whatever the header
    /// says is active. Returns the writer plus every frame already in that
    /// file, for the caller to replay during restore.
    pub fn open(dir: &Path, stem: &str) -> VeloxResult<(Self, Vec<WalFrame>, bool)> {
        std::fs::create_dir_all(dir)?;
        let header = ActiveHeader::load_or_default(dir)?;
        let path = log_path(dir, stem, header.log);

        let (frames, tail_corrupted) = read_all_frames(&path)?;
        let next_sequence = frames.last().map(|f| f.sequence + 1).unwrap_or(0);

        // If the tail was torn, truncate it away so subsequent appends land
        // right after the last good frame instead of behind corrupt bytes.
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        if tail_corrupted {
            let good_len: u64 = {
                let mut cursor = 0u64;
                let mut f = File::open(&path)?;
                let mut buf = Vec::new();
                f.read_to_end(&mut buf)?;
                let mut offset = 0usize;
                while offset < buf.len() {
                    match WalFrame::decode(&buf[offset..]) {
                        Ok((_, consumed)) => {
                            offset += consumed;
                            cursor = offset as u64;
                        }
                        Err(_) => break,
                    }
                }
                cursor
            };
            file.set_len(good_len)?;
        }

        if tail_corrupted {
            tracing::warn!(path = %path.display(), "truncated torn trailing WAL frame on open");
        }
        tracing::debug!(path = %path.display(), frames = frames.len(), next_sequence, "opened write-ahead log");

        Ok((
            Self { dir: dir.to_path_buf(), stem: stem.to_string(), letter: header.log, file, next_sequence },
            frames,
            tail_corrupted,
        ))
    }

    /// Append one frame, returning its assigned sequence number. Does not
    /// fsync — group commit decides the flush boundary.
    pub fn append(&mut self, commit_version: Version, changeset: ChangeSet) -> VeloxResult<u64> {
        let sequence = self.next_sequence;
        let frame = WalFrame::new(sequence, commit_version, changeset);
        let bytes = frame.encode()?;
        self.file.write_all(&bytes)?;
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// fsync the active log file.
    pub fn flush(&mut self) -> VeloxResult<()> {
        self.file.sync_all().map_err(VeloxError::from)
    }

    /// Rotate to the log's other letter, starting it empty, and record the
    /// new active letter in the header alongside `snapshot_letter` (written
    /// together so the log and the snapshot it follows are always pointed
    /// to consistently). Called once the companion snapshot is durable.
    pub fn rotate(&mut self, snapshot_letter: Letter) -> VeloxResult<()> {
        let new_letter = self.letter.other();
        let new_path = log_path(&self.dir, &self.stem, new_letter);
        let new_file = OpenOptions::new().create(true).write(true).truncate(true).read(true).open(&new_path)?;
        new_file.sync_all()?;

        ActiveHeader { log: new_letter, snapshot: snapshot_letter }.store(&self.dir)?;

        self.file = new_file;
        self.letter = new_letter;
        tracing::info!(new_letter = new_letter.suffix(), "rotated write-ahead log");
        Ok(())
    }

    /// The sequence number the next appended frame will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// The letter currently being appended to.
    pub fn active_letter(&self) -> Letter {
        self.letter
    }
}
