//! WAL Segment Management
//!
//! Append-only segment files named `wal_<id>.log`, where `id` is the
//! creation time in unix milliseconds. Ids are forced to be strictly
//! increasing, so ordering segments by id is ordering them by creation.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_EXTENSION: &str = ".log";

/// Storage backend the log manager writes batches to
pub trait SegmentStorage: Send {
    /// Append `data` to the active segment and make it durable
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Raw contents of every segment, oldest first
    fn read_all(&self) -> Result<Vec<Vec<u8>>>;
}

/// The segment currently receiving writes
struct ActiveSegment {
    id: u64,
    path: PathBuf,
    file: File,
    /// Bytes durably written since the segment was opened
    size: u64,
}

/// Filesystem segment store
pub struct SegmentStore {
    dir: PathBuf,
    max_segment_size: u64,
    current: Option<ActiveSegment>,
    /// Highest id used or found on disk
    last_id: u64,
}

impl SegmentStore {
    /// Create a store over `dir`, creating the directory if needed
    pub fn new(dir: PathBuf, max_segment_size: u64) -> Result<Self> {
        if max_segment_size == 0 {
            return Err(Error::Config("max segment size must be positive".into()));
        }
        std::fs::create_dir_all(&dir)?;

        let last_id = last_segment(&dir)?
            .and_then(|name| parse_segment_id(&name))
            .unwrap_or(0);

        Ok(Self {
            dir,
            max_segment_size,
            current: None,
            last_id,
        })
    }

    /// Directory holding the segments
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the segment currently receiving writes
    pub fn current_segment(&self) -> Option<String> {
        self.current.as_ref().map(|s| segment_file_name(s.id))
    }

    /// Bytes written to the current segment
    pub fn current_size(&self) -> u64 {
        self.current.as_ref().map_or(0, |s| s.size)
    }

    /// Seal the current segment (if any) and open a fresh one
    fn rotate(&mut self) -> Result<()> {
        if let Some(segment) = self.current.take() {
            segment.file.sync_all()?;
            tracing::debug!(
                "Sealed WAL segment {:?} ({} bytes)",
                segment.path,
                segment.size
            );
        }

        let id = self.next_id();
        let path = self.dir.join(segment_file_name(id));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        sync_dir(&self.dir)?;

        tracing::debug!("Opened WAL segment {:?}", path);
        self.current = Some(ActiveSegment {
            id,
            path,
            file,
            size: 0,
        });
        Ok(())
    }

    /// Append through `op`, rotating first when the active segment is full
    ///
    /// A failed append leaves the segment at its previous length, so the
    /// batch after a failure lands on a clean record boundary.
    fn append_with<F>(&mut self, data: &[u8], op: F) -> Result<()>
    where
        F: FnOnce(&mut File, &[u8]) -> io::Result<()>,
    {
        let needs_rotation = self
            .current
            .as_ref()
            .map_or(true, |s| s.size >= self.max_segment_size);
        if needs_rotation {
            self.rotate()?;
        }

        let segment = self
            .current
            .as_mut()
            .ok_or_else(|| Error::Wal("no active segment".into()))?;
        if let Err(e) = op(&mut segment.file, data) {
            self.discard_partial_write();
            return Err(e.into());
        }
        segment.size += data.len() as u64;

        Ok(())
    }

    /// Cut the active segment back to its last durable length
    fn discard_partial_write(&mut self) {
        let Some(segment) = self.current.as_mut() else {
            return;
        };

        let restored = segment
            .file
            .set_len(segment.size)
            .and_then(|()| segment.file.seek(SeekFrom::Start(segment.size)))
            .and_then(|_| segment.file.sync_data());

        if let Err(e) = restored {
            // Never append after bytes we could not remove
            tracing::error!(
                "Unable to truncate WAL segment {:?} to {} bytes, sealing it: {}",
                segment.path,
                segment.size,
                e
            );
            self.current = None;
        }
    }

    /// Millisecond timestamp, bumped past the last id when the clock has not advanced
    fn next_id(&mut self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.last_id = now.max(self.last_id + 1);
        self.last_id
    }
}

impl SegmentStorage for SegmentStore {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.append_with(data, |file, data| {
            file.write_all(data)?;
            file.sync_data()
        })
    }

    fn read_all(&self) -> Result<Vec<Vec<u8>>> {
        read_all(&self.dir)
    }
}

/// File name of the segment with the given id
pub fn segment_file_name(id: u64) -> String {
    format!("{}{}{}", SEGMENT_PREFIX, id, SEGMENT_EXTENSION)
}

/// Extract the id from a segment file name
pub fn parse_segment_id(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_EXTENSION)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List segment file names in creation order
pub fn list_segments(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut segments: Vec<(u64, String)> = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if let Some(id) = parse_segment_id(&name) {
            segments.push((id, name));
        }
    }

    segments.sort();
    Ok(segments.into_iter().map(|(_, name)| name).collect())
}

/// Newest segment in `dir`
pub fn last_segment(dir: &Path) -> Result<Option<String>> {
    Ok(list_segments(dir)?.pop())
}

/// First segment created after `name`; an empty name selects the oldest segment
pub fn next_segment_after(dir: &Path, name: &str) -> Result<Option<String>> {
    let segments = list_segments(dir)?;

    if name.is_empty() {
        return Ok(segments.into_iter().next());
    }

    let after = parse_segment_id(name)
        .ok_or_else(|| Error::Wal(format!("invalid segment name '{}'", name)))?;

    Ok(segments
        .into_iter()
        .find(|candidate| parse_segment_id(candidate).map_or(false, |id| id > after)))
}

/// Path of a named segment, rejecting anything that is not a plain segment name
fn segment_path(dir: &Path, name: &str) -> Result<PathBuf> {
    if parse_segment_id(name).is_none() {
        return Err(Error::Wal(format!("invalid segment name '{}'", name)));
    }
    Ok(dir.join(name))
}

/// Full contents of a named segment
pub fn read_segment(dir: &Path, name: &str) -> Result<Vec<u8>> {
    Ok(std::fs::read(segment_path(dir, name)?)?)
}

/// Current size of a named segment in bytes
pub fn segment_len(dir: &Path, name: &str) -> Result<u64> {
    Ok(std::fs::metadata(segment_path(dir, name)?)?.len())
}

/// Write a complete segment under `name`, replacing any previous copy
pub fn save_segment(dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    let path = segment_path(dir, name)?;
    std::fs::create_dir_all(dir)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    file.write_all(data)?;
    file.sync_all()?;
    sync_dir(dir)?;

    Ok(())
}

/// Contents of every segment in `dir`, oldest first
pub fn read_all(dir: &Path) -> Result<Vec<Vec<u8>>> {
    list_segments(dir)?
        .iter()
        .map(|name| read_segment(dir, name))
        .collect()
}

/// Persist directory entries for newly created files
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
