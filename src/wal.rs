use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Txn;

/// Encode a single transaction to [len][bincode][crc32] format.
fn encode_txn(writer: &mut impl Write, txn: &Txn) -> io::Result<()> {
    let payload =
        bincode::serialize(txn).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: Txn][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - One entry holds one whole transaction, so a cascade or an edit-replace
///   is either fully on disk or not at all.
/// - Truncated last entry (crash) is discarded via length-prefix + CRC check.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one transaction. Production code batches via
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, txn: &Txn) -> io::Result<()> {
        self.append_buffered(txn)?;
        self.flush_sync()
    }

    /// Append to the BufWriter without flushing or syncing.
    pub fn append_buffered(&mut self, txn: &Txn) -> io::Result<()> {
        encode_txn(&mut self.writer, txn)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted log to a temp file and fsync it.
    pub fn write_compact_file(path: &Path, txns: &[Txn]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for txn in txns {
            encode_txn(&mut writer, txn)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the WAL and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, txns: &[Txn]) -> io::Result<()> {
        Self::write_compact_file(&self.path, txns)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid transactions.
    ///
    /// A torn or corrupt final record is cut from the file so later appends
    /// stay reachable. A corrupt record with more data behind it is an
    /// `InvalidData` error and the file is left untouched: what follows may be
    /// committed transactions.
    pub fn replay(path: &Path) -> io::Result<Vec<Txn>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut txns = Vec::new();
        let mut valid_len: u64 = 0;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let record_end = valid_len + 8 + len as u64;
            if record_end > file_len {
                break; // truncated
            }

            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            let mut crc_buf = [0u8; 4];
            reader.read_exact(&mut crc_buf)?;

            let txn = (u32::from_le_bytes(crc_buf) == crc32fast::hash(&payload))
                .then(|| bincode::deserialize::<Txn>(&payload).ok())
                .flatten();
            match txn {
                Some(txn) => txns.push(txn),
                None if record_end < file_len => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "corrupt WAL record at byte {valid_len} of {}, {} bytes follow",
                            path.display(),
                            file_len - record_end
                        ),
                    ));
                }
                None => break,
            }
            valid_len = record_end;
        }

        if valid_len < file_len {
            warn!(
                "discarding {} bytes of torn WAL tail in {}",
                file_len - valid_len,
                path.display()
            );
            OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
        }

        Ok(txns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("bookd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn room(id: Id) -> Change {
        Change::ResourceCreated(Resource {
            id,
            name: format!("Room {id}"),
            kind: "room".into(),
        })
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let txns = vec![
            Txn::new(vec![room(1)]),
            Txn::new(vec![
                Change::EventCreated(Event {
                    id: 1,
                    title: "Standup".into(),
                    start: 0,
                    end: 1000,
                    description: None,
                }),
                Change::AllocationAdded(Allocation {
                    id: 1,
                    event_id: 1,
                    resource_id: 1,
                }),
            ]),
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for t in &txns {
                wal.append(t).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, txns);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let txn = Txn::new(vec![room(1)]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&txn).unwrap();
        }

        // Partial second entry, as left by a crash mid-write
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![txn]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_after_torn_tail_survives_replay() {
        let path = tmp_path("torn_then_append.wal");
        let _ = fs::remove_file(&path);

        let first = Txn::new(vec![room(1)]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8; 5]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first.clone()]);

        let second = Txn::new(vec![room(2)]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_record_mid_file_is_an_error() {
        let path = tmp_path("corrupt_mid.wal");
        let _ = fs::remove_file(&path);

        {
            let mut wal = Wal::open(&path).unwrap();
            for id in 1..=3 {
                wal.append(&Txn::new(vec![room(id)])).unwrap();
            }
        }
        // Flip a payload byte of the second record
        let mut bytes = fs::read(&path).unwrap();
        let first_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        bytes[first_len + 8 + 4] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(fs::read(&path).unwrap(), bytes);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let txn = Txn::new(vec![Change::ResourceDeleted { id: 7 }]);
        {
            let payload = bincode::serialize(&txn).unwrap();
            let len = payload.len() as u32;
            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_wal() {
        let path = tmp_path("compact_reduce.wal");
        let _ = fs::remove_file(&path);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Txn::new(vec![room(1)])).unwrap();
            for id in 2..12 {
                wal.append(&Txn::new(vec![room(id)])).unwrap();
                wal.append(&Txn::new(vec![Change::ResourceDeleted { id }])).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let compacted = vec![Txn::new(vec![room(1)])];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), compacted);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let compacted = vec![Txn::new(vec![room(1)])];
        let next = Txn::new(vec![room(2)]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&compacted[0]).unwrap();
            wal.compact(&compacted).unwrap();
            wal.append(&next).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![compacted[0].clone(), next]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let txns: Vec<Txn> = (1..=5).map(|id| Txn::new(vec![room(id)])).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for t in &txns {
                wal.append_buffered(t).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), txns);

        let _ = fs::remove_file(&path);
    }
}
