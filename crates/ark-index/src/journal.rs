use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Upper bound on a single record, to keep recovery from allocating
/// garbage lengths read out of a corrupt file.
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// Append-only record journal backing an index's committed state.
///
/// Records are serialized with bincode and framed as
/// `[length: u32 LE][crc32: u32 LE][payload]`. A whole commit is appended
/// as one batch followed by a single fsync, so either all of a
/// transaction's records become durable or none do. Recovery reads
/// front-to-back and stops at the first torn or corrupt frame, truncating
/// the file there; records are strictly ordered, so nothing after a bad
/// frame can be trusted.
pub struct Journal<R> {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    _record: PhantomData<R>,
}

impl<R> Journal<R>
where
    R: Serialize + DeserializeOwned,
{
    /// Open (or create) the journal and replay every intact record.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<(Self, Vec<R>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let (records, valid_len) = match File::open(&path) {
            Ok(file) => Self::replay(file)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => (Vec::new(), 0),
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        if file.metadata()?.len() > valid_len {
            warn!(path = %path.display(), valid_len, "truncating torn journal tail");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        drop(file);

        let append = OpenOptions::new().append(true).open(&path)?;
        debug!(path = %path.display(), records = records.len(), "journal recovered");

        Ok((
            Self {
                path,
                writer: Mutex::new(BufWriter::new(append)),
                _record: PhantomData,
            },
            records,
        ))
    }

    fn replay(file: File) -> IndexResult<(Vec<R>, u64)> {
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            let mut header = [0u8; HEADER_SIZE];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0
                || length > MAX_RECORD_LEN
                || offset + HEADER_SIZE as u64 + length as u64 > file_len
            {
                warn!(offset, length, "invalid journal frame; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated journal frame; stopping recovery");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if crc32fast::hash(&payload) != expected_crc {
                warn!(offset, "journal crc mismatch; stopping recovery");
                break;
            }

            match bincode::deserialize::<R>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(offset, error = %e, "undecodable journal record; stopping recovery");
                    break;
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        Ok((records, offset))
    }

    /// Append a batch of records and fsync once.
    pub fn append_batch(&self, records: &[R]) -> IndexResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().expect("journal mutex poisoned");
        for record in records {
            let payload = bincode::serialize(record)
                .map_err(|e| IndexError::Serialization(e.to_string()))?;
            let length = payload.len() as u32;
            let crc = crc32fast::hash(&payload);

            writer.write_all(&length.to_le_bytes())?;
            writer.write_all(&crc.to_le_bytes())?;
            writer.write_all(&payload)?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;

        debug!(records = records.len(), "journal batch appended");
        Ok(())
    }

    /// Discard every record. Used when an index is rebuilt from scratch.
    pub fn reset(&self) -> IndexResult<()> {
        let mut writer = self.writer.lock().expect("journal mutex poisoned");
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;
        *writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Rec {
        key: String,
        value: u64,
    }

    fn rec(key: &str, value: u64) -> Rec {
        Rec {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn empty_journal_recovers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (_, recovered) = Journal::<Rec>::open(dir.path().join("idx.log")).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn appended_batches_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.log");

        let (journal, _) = Journal::<Rec>::open(&path).unwrap();
        journal.append_batch(&[rec("a", 1), rec("b", 2)]).unwrap();
        journal.append_batch(&[rec("c", 3)]).unwrap();
        drop(journal);

        let (_, recovered) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(recovered, vec![rec("a", 1), rec("b", 2), rec("c", 3)]);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.log");

        let (journal, _) = Journal::<Rec>::open(&path).unwrap();
        journal.append_batch(&[rec("a", 1), rec("b", 2)]).unwrap();
        drop(journal);

        // Chop the file mid-frame to simulate a crash during append.
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let (journal, recovered) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(recovered, vec![rec("a", 1)]);

        // Appends after recovery land cleanly on the truncated file.
        journal.append_batch(&[rec("c", 3)]).unwrap();
        drop(journal);
        let (_, recovered) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(recovered, vec![rec("a", 1), rec("c", 3)]);
    }

    #[test]
    fn corrupt_frame_stops_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.log");

        let (journal, _) = Journal::<Rec>::open(&path).unwrap();
        journal.append_batch(&[rec("a", 1), rec("b", 2)]).unwrap();
        drop(journal);

        // Flip one payload byte in the second frame.
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let (_, recovered) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(recovered, vec![rec("a", 1)]);
    }

    #[test]
    fn reset_discards_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.log");

        let (journal, _) = Journal::<Rec>::open(&path).unwrap();
        journal.append_batch(&[rec("a", 1)]).unwrap();
        journal.reset().unwrap();
        journal.append_batch(&[rec("z", 9)]).unwrap();
        drop(journal);

        let (_, recovered) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(recovered, vec![rec("z", 9)]);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.log");
        let (journal, _) = Journal::<Rec>::open(&path).unwrap();
        journal.append_batch(&[]).unwrap();
        drop(journal);
        let (_, recovered) = Journal::<Rec>::open(&path).unwrap();
        assert!(recovered.is_empty());
    }
}
