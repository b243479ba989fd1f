//! Append-only transaction journal.
//!
//! Each committed store transaction is one framed record:
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬──────────────┬─────────┐
//! │ "FSJR"   │ version │ length   │ CBOR payload │ CRC32   │
//! │ 4 bytes  │ u16 LE  │ u32 LE   │ length bytes │ u32 LE  │
//! └──────────┴─────────┴──────────┴──────────────┴─────────┘
//! ```
//!
//! The payload is a `Vec<StoreOp>`. The CRC covers everything before it.
//! A record is either fully present and valid or, if it is the last one in
//! the journal, discarded on replay as a torn write.

use crate::error::{CoreError, CoreResult};
use crate::store::StoreOp;
use fieldsync_storage::StorageBackend;

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"FSJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;

const CRC_SIZE: usize = 4;

/// Encodes one transaction as a framed journal record.
pub fn encode_record(ops: &[StoreOp]) -> CoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(ops, &mut payload).map_err(|e| CoreError::Codec(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("journal record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&JOURNAL_MAGIC);
    data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of decoding a journal image.
#[derive(Debug, Default)]
pub struct Replay {
    /// Committed transactions in commit order.
    pub transactions: Vec<Vec<StoreOp>>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Bytes after the valid prefix belonging to a torn final record.
    pub torn_bytes: u64,
}

/// Decodes every record in `data`.
///
/// A short or CRC-failing final record is reported through
/// [`Replay::torn_bytes`]. Damage anywhere else is an error.
pub fn decode_all(data: &[u8]) -> CoreResult<Replay> {
    let mut replay = Replay::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let offset = pos as u64;
        let remaining = &data[pos..];

        if remaining.len() < HEADER_SIZE {
            replay.torn_bytes = remaining.len() as u64;
            break;
        }
        if remaining[0..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption(offset, "bad magic"));
        }
        let version = u16::from_le_bytes([remaining[4], remaining[5]]);
        if version != JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let len = u32::from_le_bytes([remaining[6], remaining[7], remaining[8], remaining[9]])
            as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if remaining.len() < total {
            replay.torn_bytes = remaining.len() as u64;
            break;
        }

        let body = &remaining[..HEADER_SIZE + len];
        let stored = u32::from_le_bytes([
            remaining[HEADER_SIZE + len],
            remaining[HEADER_SIZE + len + 1],
            remaining[HEADER_SIZE + len + 2],
            remaining[HEADER_SIZE + len + 3],
        ]);
        if compute_crc32(body) != stored {
            if pos + total == data.len() {
                replay.torn_bytes = total as u64;
                break;
            }
            return Err(CoreError::journal_corruption(offset, "checksum mismatch"));
        }

        let ops: Vec<StoreOp> = ciborium::from_reader(&body[HEADER_SIZE..])
            .map_err(|e| CoreError::journal_corruption(offset, e.to_string()))?;
        replay.transactions.push(ops);

        pos += total;
        replay.valid_len = pos as u64;
    }

    Ok(replay)
}

/// Journal writer over a storage backend.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl Journal {
    /// Opens a journal and replays it.
    ///
    /// A torn final record is truncated away before the journal is returned,
    /// so new records never follow garbage.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<(Self, Vec<Vec<StoreOp>>)> {
        let data = backend.read_all()?;
        let replay = decode_all(&data)?;

        if replay.torn_bytes > 0 {
            tracing::warn!(
                offset = replay.valid_len,
                bytes = replay.torn_bytes,
                "discarding torn journal tail"
            );
            backend.truncate(replay.valid_len)?;
            backend.sync()?;
        }

        tracing::debug!(
            transactions = replay.transactions.len(),
            bytes = replay.valid_len,
            "journal replayed"
        );

        Ok((
            Self {
                backend,
                sync_on_commit,
            },
            replay.transactions,
        ))
    }

    /// Appends one transaction. Returns the record offset.
    ///
    /// If the write fails part-way the journal is cut back to its previous
    /// length.
    pub fn append(&mut self, ops: &[StoreOp]) -> CoreResult<u64> {
        let data = encode_record(ops)?;
        let start = self.backend.size()?;

        let result = self.backend.append(&data).and_then(|offset| {
            if self.sync_on_commit {
                self.backend.flush()?;
            }
            Ok(offset)
        });

        match result {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(cleanup) = self.backend.truncate(start) {
                    tracing::error!(error = %cleanup, "failed to roll back partial journal write");
                }
                Err(err.into())
            }
        }
    }

    /// Replaces the journal contents with a single snapshot record in place.
    pub fn rewrite(&mut self, snapshot: &[StoreOp]) -> CoreResult<()> {
        let data = encode_record(snapshot)?;
        self.backend.truncate(0)?;
        self.backend.append(&data)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Swaps in a new backend, e.g. after the journal file was replaced.
    pub fn replace_backend(&mut self, backend: Box<dyn StorageBackend>) {
        self.backend = backend;
    }

    /// Current journal size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Flushes pending writes to durable storage.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = !0u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ActionId, EntityId};
    use fieldsync_storage::InMemoryBackend;

    fn ops(n: u64) -> Vec<StoreOp> {
        vec![
            StoreOp::DeleteAction(ActionId::new(n)),
            StoreOp::MapId {
                local: EntityId::from(format!("local_{n}")),
                server: EntityId::server(format!("srv_{n}")),
            },
        ]
    }

    fn journal_over(backend: &InMemoryBackend) -> (Journal, Vec<Vec<StoreOp>>) {
        Journal::open(Box::new(backend.clone()), true).unwrap()
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn record_header_layout() {
        let data = encode_record(&ops(1)).unwrap();
        assert_eq!(&data[0..4], b"FSJR");
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), JOURNAL_VERSION);
        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        assert_eq!(data.len(), HEADER_SIZE + len + CRC_SIZE);
    }

    #[test]
    fn replays_in_commit_order() {
        let backend = InMemoryBackend::new();
        {
            let (mut journal, replayed) = journal_over(&backend);
            assert!(replayed.is_empty());
            journal.append(&ops(1)).unwrap();
            journal.append(&ops(2)).unwrap();
        }

        let (_, replayed) = journal_over(&backend);
        assert_eq!(replayed, vec![ops(1), ops(2)]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        {
            let (mut journal, _) = journal_over(&backend);
            journal.append(&ops(1)).unwrap();
        }
        let good_len = backend.data().len();

        // Simulate a crash half way through the second append.
        let second = encode_record(&ops(2)).unwrap();
        let mut torn = backend.data();
        torn.extend_from_slice(&second[..second.len() / 2]);
        backend.replace_data(torn);

        let (_, replayed) = journal_over(&backend);
        assert_eq!(replayed, vec![ops(1)]);
        assert_eq!(backend.data().len(), good_len);
    }

    #[test]
    fn bad_checksum_on_last_record_is_torn() {
        let backend = InMemoryBackend::new();
        {
            let (mut journal, _) = journal_over(&backend);
            journal.append(&ops(1)).unwrap();
            journal.append(&ops(2)).unwrap();
        }
        let mut flipped = backend.data();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xFF;
        backend.replace_data(flipped);

        let (_, replayed) = journal_over(&backend);
        assert_eq!(replayed, vec![ops(1)]);
    }

    #[test]
    fn corruption_before_tail_is_an_error() {
        let backend = InMemoryBackend::new();
        {
            let (mut journal, _) = journal_over(&backend);
            journal.append(&ops(1)).unwrap();
            journal.append(&ops(2)).unwrap();
        }
        let mut flipped = backend.data();
        flipped[HEADER_SIZE + 1] ^= 0xFF;
        backend.replace_data(flipped);

        let result = Journal::open(Box::new(backend.clone()), true);
        assert!(matches!(
            result,
            Err(CoreError::JournalCorruption { offset: 0, .. })
        ));
    }

    #[test]
    fn rewrite_leaves_single_snapshot() {
        let backend = InMemoryBackend::new();
        {
            let (mut journal, _) = journal_over(&backend);
            journal.append(&ops(1)).unwrap();
            journal.append(&ops(2)).unwrap();
            journal.rewrite(&ops(3)).unwrap();
        }

        let (_, replayed) = journal_over(&backend);
        assert_eq!(replayed, vec![ops(3)]);
    }

    proptest::proptest! {
        #[test]
        fn any_cut_recovers_whole_records(count in 1u64..6, cut_seed in proptest::prelude::any::<usize>()) {
            let mut data = Vec::new();
            let mut boundaries = vec![0usize];
            for n in 1..=count {
                data.extend_from_slice(&encode_record(&ops(n)).unwrap());
                boundaries.push(data.len());
            }
            let cut = cut_seed % (data.len() + 1);

            let replay = decode_all(&data[..cut]).unwrap();
            let whole = boundaries.iter().filter(|&&b| b <= cut).count() - 1;
            proptest::prop_assert_eq!(replay.transactions.len(), whole);
            proptest::prop_assert_eq!(replay.valid_len as usize, boundaries[whole]);
            proptest::prop_assert_eq!((replay.valid_len + replay.torn_bytes) as usize, cut);
        }
    }
}
