use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::Record;

/// Append-only log of `Record`s.
///
/// Each entry is `[u32 len][bincode Record][u32 crc32]`, little-endian, with
/// `len` covering the payload only. Replay stops at the first torn or corrupt
/// entry, so a crash mid-append loses at most the unacknowledged tail.
///
/// The file never holds bytes past `durable_len` that a later append could
/// land behind: recovery cuts a torn tail off, and a failed flush is rolled
/// back to the last synced length.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful `flush_sync`.
    durable_len: u64,
    pending_len: u64,
    pending_entries: u64,
    appends_since_compact: u64,
    /// Set when a rollback could not restore `durable_len`.
    poisoned: bool,
    #[cfg(test)]
    sync_fault: Option<Arc<AtomicBool>>,
}

/// Result of reading a log file front to back.
pub struct Recovered {
    pub records: Vec<Record>,
    /// Bytes past the last valid entry, cut off by `Wal::recover`.
    pub discarded_bytes: u64,
}

fn write_entry(out: &mut impl Write, record: &Record) -> io::Result<u64> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// `Ok(false)` on a clean or torn end of file.
fn read_exact_or_eof(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next valid entry and its encoded size, or `None` where the readable log ends.
fn read_entry(input: &mut impl Read) -> io::Result<Option<(Record, u64)>> {
    let mut word = [0u8; 4];
    if !read_exact_or_eof(input, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_exact_or_eof(input, &mut payload)? || !read_exact_or_eof(input, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|record| (record, payload.len() as u64 + 8)))
}

/// Records plus the byte length they occupy and the full file length.
fn scan(path: &Path) -> io::Result<(Vec<Record>, u64, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0, 0)),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut input = BufReader::new(file);
    let mut records = Vec::new();
    let mut valid_len = 0;
    while let Some((record, size)) = read_entry(&mut input)? {
        records.push(record);
        valid_len += size;
    }
    Ok((records, valid_len, file_len))
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl Wal {
    /// Open for appends after the existing contents. Call `recover` first if
    /// the file may end in a torn entry.
    pub fn open(path: &Path) -> io::Result<Self> {
        let writer = open_for_append(path)?;
        let durable_len = writer.get_ref().metadata()?.len();
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            durable_len,
            pending_len: 0,
            pending_entries: 0,
            appends_since_compact: 0,
            poisoned: false,
            #[cfg(test)]
            sync_fault: None,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer one record. Nothing is durable until `flush_sync()`.
    pub fn append_buffered(&mut self, record: &Record) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL tail could not be restored after a failed write"));
        }
        self.pending_len += write_entry(&mut self.writer, record)?;
        self.pending_entries += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered entries and fsync. On error the pending entries are
    /// neither durable nor discarded; follow up with `rollback()`.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        #[cfg(test)]
        if self.sync_fault.as_ref().is_some_and(|f| f.load(Ordering::SeqCst)) {
            return Err(io::Error::other("injected fsync failure"));
        }
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        self.pending_entries = 0;
        Ok(())
    }

    /// Drop every entry appended since the last successful `flush_sync`,
    /// from the buffer and from the file. If this fails the log refuses
    /// appends until a later rollback or compaction succeeds.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.poisoned = true;
        let fresh = open_for_append(&self.path)?;
        // Take the old writer apart so its buffer is discarded, not flushed.
        let (_, _discarded) = std::mem::replace(&mut self.writer, fresh).into_parts();
        self.writer.get_ref().set_len(self.durable_len)?;
        self.writer.get_ref().sync_all()?;
        self.appends_since_compact -= self.pending_entries;
        self.pending_len = 0;
        self.pending_entries = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Replace the log with `records`: write a synced sibling file, rename it
    /// over the log, reopen for appends.
    pub fn compact(&mut self, records: &[Record]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut out = BufWriter::new(File::create(&tmp_path)?);
        let mut written = 0;
        for record in records {
            written += write_entry(&mut out, record)?;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
        drop(out);

        fs::rename(&tmp_path, &self.path)?;
        let fresh = open_for_append(&self.path)?;
        let _ = std::mem::replace(&mut self.writer, fresh).into_parts();
        self.durable_len = written;
        self.pending_len = 0;
        self.pending_entries = 0;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every readable record at `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Record>> {
        Ok(scan(path)?.0)
    }

    /// Replay, then cut the file back to its last valid entry so new appends
    /// follow readable data.
    pub fn recover(path: &Path) -> io::Result<Recovered> {
        let (records, valid_len, file_len) = scan(path)?;
        if file_len > valid_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Recovered {
            records,
            discarded_bytes: file_len - valid_len,
        })
    }

    /// Make `flush_sync` fail after writing while `switch` is set.
    #[cfg(test)]
    pub(crate) fn fail_syncs_when(&mut self, switch: Arc<AtomicBool>) {
        self.sync_fault = Some(switch);
    }
}
