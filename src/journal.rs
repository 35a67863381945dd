use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only journal, one per venue.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated last entry (crash) is safely discarded on replay via the
///   length prefix + CRC check.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    /// Open (or create) the journal file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one event to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit everything
    /// buffered — this is what makes group commit cheap.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Append a batch of events and fsync once. Used by tests — the writer
    /// task calls `append_buffered` + `flush_sync` across queued batches.
    #[cfg(test)]
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        for event in events {
            self.append_buffered(event)?;
        }
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with a minimal event set recreating current state.
    /// Writes a temp file, fsyncs it, renames it over the journal, reopens.
    /// The writer task owns the journal exclusively, so no lock phases.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay the journal from disk, returning all valid events.
    /// Truncated or corrupt trailing entries are silently discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            let stored_crc = u32::from_le_bytes(crc_buf);

            if stored_crc != crc32fast::hash(&payload) {
                break; // corrupt entry, stop replaying
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break, // corrupt payload
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Table, TableShape};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("maitred_test_journal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn table_event(capacity: u32) -> Event {
        Event::TableCreated {
            table: Table {
                id: Ulid::new(),
                capacity,
                shape: TableShape::Round,
                status: "available".into(),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.journal");
        let _ = fs::remove_file(&path);

        let events = vec![table_event(2), table_event(4)];
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&events).unwrap();
        }

        let replayed = Journal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_discards_truncated_tail() {
        let path = tmp_path("truncated.journal");
        let _ = fs::remove_file(&path);

        let event = table_event(6);
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(std::slice::from_ref(&event)).unwrap();
        }

        // Partial second entry, as after a crash mid-write
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Journal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.journal");
        let _ = fs::remove_file(&path);
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_discards_bad_crc() {
        let path = tmp_path("bad_crc.journal");
        let _ = fs::remove_file(&path);

        let payload = bincode::serialize(&table_event(4)).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Journal::replay(&path).unwrap().is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rewrite_shrinks_and_resets_counter() {
        let path = tmp_path("rewrite.journal");
        let _ = fs::remove_file(&path);

        let keep = table_event(4);
        {
            let mut journal = Journal::open(&path).unwrap();
            let churn: Vec<Event> = (0..20).map(|_| table_event(2)).collect();
            journal.append(&churn).unwrap();
            journal.append(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(journal.appends_since_compact(), 21);

            let before = fs::metadata(&path).unwrap().len();
            journal.rewrite(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(journal.appends_since_compact(), 0);
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "rewritten journal should shrink: {after} < {before}");
        }

        assert_eq!(Journal::replay(&path).unwrap(), vec![keep]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rewrite_then_append() {
        let path = tmp_path("rewrite_append.journal");
        let _ = fs::remove_file(&path);

        let base = table_event(2);
        let fresh = table_event(8);
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(std::slice::from_ref(&base)).unwrap();
            journal.rewrite(std::slice::from_ref(&base)).unwrap();
            journal.append(std::slice::from_ref(&fresh)).unwrap();
        }

        let replayed = Journal::replay(&path).unwrap();
        assert_eq!(replayed, vec![base, fresh]);

        let _ = fs::remove_file(&path);
    }
}
