//! Append-only log of store writes.
//!
//! Each frame is `[u32 len][bincode StoreEvent][u32 crc32]`, little endian,
//! with `len` covering the payload only. Replay stops at the first frame that
//! is short or fails its checksum, so a write torn by a crash costs at most
//! the batch that was being flushed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Record;

/// Records are never physically deleted, so a put is the only mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    Put(Record),
}

fn invalid(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn write_frame(writer: &mut impl Write, event: &StoreEvent) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(invalid)?;
    let len = u32::try_from(payload.len()).map_err(|_| invalid("record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf`, or return `false` if the file ends first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

enum Frame {
    Event(StoreEvent),
    End,
    Damaged,
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(Frame::End);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(Frame::Damaged);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(Frame::Damaged);
    }
    Ok(match bincode::deserialize(&payload) {
        Ok(event) => Frame::Event(event),
        Err(_) => Frame::Damaged,
    })
}

pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(Self::append_handle(path)?),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    fn append_handle(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn compact_path(&self) -> PathBuf {
        self.path.with_extension("wal.tmp")
    }

    /// Buffer one frame. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &StoreEvent) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Replace the log with `events`. They are written and synced to a
    /// sibling file first, which is then renamed over the log.
    pub fn compact(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        let tmp = self.compact_path();
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&tmp, &self.path)?;
        self.writer = BufWriter::new(Self::append_handle(&self.path)?);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact event in the file at `path`. A missing file is an
    /// empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<StoreEvent>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event) => events.push(event),
                Frame::End => break,
                Frame::Damaged => {
                    warn!(
                        "discarding damaged tail of {} after {} records",
                        path.display(),
                        events.len()
                    );
                    break;
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Key;

    fn fresh(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fleetcheck_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn put(table: &str, id: &str, body: &str) -> StoreEvent {
        StoreEvent::Put(Record {
            table: table.into(),
            key: Key::new(id),
            indexes: Vec::new(),
            body: body.into(),
        })
    }

    fn write_all(path: &Path, events: &[StoreEvent]) {
        let mut wal = Wal::open(path).unwrap();
        for e in events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();
    }

    #[test]
    fn replays_in_write_order() {
        let path = fresh("order.wal");
        let events = vec![put("schedules", "a", "{}"), put("tickets", "b", "{\"x\":1}")];
        write_all(&path, &events);
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = fresh("torn.wal");
        let event = put("schedules", "a", "{}");
        write_all(&path, std::slice::from_ref(&event));
        // A length word promising more bytes than follow.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&64u32.to_le_bytes()).unwrap();
        f.write_all(&[1, 2]).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = fresh("crc.wal");
        let good = put("schedules", "a", "{}");
        write_all(&path, std::slice::from_ref(&good));
        let payload = bincode::serialize(&put("schedules", "b", "{}")).unwrap();
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
        f.write_all(&payload).unwrap();
        f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn missing_file_is_empty() {
        assert!(Wal::replay(&fresh("missing.wal")).unwrap().is_empty());
    }

    #[test]
    fn compaction_keeps_appending() {
        let path = fresh("compact.wal");
        let latest = put("tickets", "a", "{\"v\":2}");
        let after = put("tickets", "b", "{}");

        let mut wal = Wal::open(&path).unwrap();
        for v in 0..3 {
            wal.append_buffered(&put("tickets", "a", &format!("{{\"v\":{v}}}"))).unwrap();
        }
        wal.flush_sync().unwrap();
        assert_eq!(wal.appends_since_compact(), 3);

        wal.compact(std::slice::from_ref(&latest)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        wal.append_buffered(&after).unwrap();
        wal.flush_sync().unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![latest, after]);
    }
}
