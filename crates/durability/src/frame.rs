//! WAL frame format (§4.8, §6): `[u32 length][u64 sequence][u64 commit
//! version][bytes changeset][u32 crc32c]`, little-endian throughout.
//!
//! `length` covers everything after it up to and including the checksum, so
//! a reader can always tell how many bytes to consume without decoding the
//! changeset first — the same self-delimiting trick the original engine's
//! WAL record format used, just reshaped around a commit version instead of
//! a branch id.

use velox_core::changeset::ChangeSet;
use velox_core::ids::Version;
use velox_core::{VeloxError, VeloxResult};

const HEADER_LEN: usize = 4; // length prefix itself, not counted in `length`
const SEQUENCE_LEN: usize = 8;
const COMMIT_VERSION_LEN: usize = 8;
const CRC_LEN: usize = 4;

/// One durable unit of the log: a single transaction's changeset, tagged
/// with the monotonic log sequence number and the commit version the
/// version manager assigned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFrame {
    /// Monotonically increasing position in the log, independent of commit
    /// version (every frame, including schema-only ones, consumes a
    /// sequence number).
    pub sequence: u64,
    /// The commit version this frame's changeset was assigned.
    pub commit_version: Version,
    /// The transaction's changeset.
    pub changeset: ChangeSet,
}

impl WalFrame {
    /// A new frame.
    pub fn new(sequence: u64, commit_version: Version, changeset: ChangeSet) -> Self {
        Self { sequence, commit_version, changeset }
    }

    /// Encode to the on-disk frame representation, checksum included.
    pub fn encode(&self) -> VeloxResult<Vec<u8>> {
        let changeset_bytes = self.changeset.encode()?;

        let mut body = Vec::with_capacity(SEQUENCE_LEN + COMMIT_VERSION_LEN + changeset_bytes.len());
        body.extend_from_slice(&self.sequence.to_le_bytes());
        body.extend_from_slice(&self.commit_version.get().to_le_bytes());
        body.extend_from_slice(&changeset_bytes);

        let crc = crc32fast::hash(&body);

        let length = (body.len() + CRC_LEN) as u32;
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + CRC_LEN);
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decode one frame from the front of `bytes`, returning the frame and
    /// the number of bytes consumed. A torn trailing frame (truncated
    /// write, or a checksum that does not match) is reported as
    /// [`VeloxError::LogCorrupted`] so the caller (restore) can stop
    /// replaying at the last good frame rather than panic (§4.8, §7).
    pub fn decode(bytes: &[u8]) -> VeloxResult<(Self, usize)> {
        if bytes.len() < HEADER_LEN {
            return Err(VeloxError::log_corrupted("frame shorter than its length prefix"));
        }
        let length = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if length < SEQUENCE_LEN + COMMIT_VERSION_LEN + CRC_LEN {
            return Err(VeloxError::log_corrupted("frame length smaller than its fixed fields"));
        }
        if bytes.len() < HEADER_LEN + length {
            return Err(VeloxError::log_corrupted("frame truncated before its declared length"));
        }

        let body_and_crc = &bytes[HEADER_LEN..HEADER_LEN + length];
        let body = &body_and_crc[..length - CRC_LEN];
        let stored_crc = u32::from_le_bytes(body_and_crc[length - CRC_LEN..].try_into().unwrap());

        let computed_crc = crc32fast::hash(body);
        if computed_crc != stored_crc {
            return Err(VeloxError::log_corrupted(format!(
                "checksum mismatch: stored {stored_crc:08x}, computed {computed_crc:08x}"
            )));
        }

        let sequence = u64::from_le_bytes(body[0..8].try_into().unwrap());
        let commit_version = Version::new(u64::from_le_bytes(body[8..16].try_into().unwrap()));
        let changeset = ChangeSet::decode(&body[16..])?;

        Ok((Self { sequence, commit_version, changeset }, HEADER_LEN + length))
    }
}
