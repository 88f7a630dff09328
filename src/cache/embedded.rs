//! Embedded on-disk key-value store.
//!
//! # Responsibilities
//! - Append every write to a single value log under the store directory
//! - Keep an in-memory index from key to the latest record
//! - Reclaim space when enough of the log is garbage
//!
//! # Design Decisions
//! - Frames are `u32` little-endian length followed by a bincode record
//! - A torn or corrupt tail found on open is truncated, earlier records survive
//! - A failed append is cut back to its starting offset so no torn frame
//!   sits between valid records
//! - Expired entries count as garbage; compaction drops them from the index
//!   and rewrites live records into a fresh file renamed over the log
//! - All operations are blocking; async callers go through `spawn_blocking`

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::{ttl_secs, CacheError};

const LOG_FILE: &str = "values.log";
const COMPACT_FILE: &str = "values.log.compact";
const HEADER_LEN: u64 = 4;

#[derive(Debug, Serialize, Deserialize)]
enum Record {
    Put {
        key: String,
        value: Vec<u8>,
        expires_at: Option<u64>,
    },
    Delete {
        key: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    /// Offset of the payload, after the length header.
    offset: u64,
    len: u64,
    expires_at: Option<u64>,
}

impl IndexEntry {
    fn frame_len(&self) -> u64 {
        HEADER_LEN + self.len
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct StoreState {
    file: File,
    index: HashMap<String, IndexEntry>,
    total_bytes: u64,
    live_bytes: u64,
}

/// Result of a compaction pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GcOutcome {
    /// Too little garbage; `ratio` is the measured garbage share.
    Skipped { ratio: f64 },
    /// The log was rewritten.
    Rewritten { reclaimed_bytes: u64 },
}

/// Single-file log-structured store.
pub struct EmbeddedStore {
    dir: PathBuf,
    state: Mutex<Option<StoreState>>,
}

impl std::fmt::Debug for EmbeddedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedStore").field("dir", &self.dir).finish()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn open_log(path: &Path) -> Result<File, CacheError> {
    Ok(OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?)
}

/// Log sink that can be cut back after a failed write.
trait Truncate {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

fn append<W: Write + Seek + Truncate>(file: &mut W, payload: &[u8]) -> Result<u64, CacheError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CacheError::Corrupt(format!("record of {} bytes is too large", payload.len())))?;
    let offset = file.seek(SeekFrom::End(0))?;
    let mut frame = Vec::with_capacity(payload.len() + HEADER_LEN as usize);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    if let Err(err) = file.write_all(&frame) {
        if let Err(rollback) = file.truncate(offset) {
            tracing::error!(offset, error = %rollback, "Failed to roll back partial value log write");
        }
        return Err(err.into());
    }
    Ok(offset + HEADER_LEN)
}

fn read_payload(file: &mut File, entry: &IndexEntry) -> Result<Vec<u8>, CacheError> {
    let mut buf = vec![0u8; entry.len as usize];
    file.seek(SeekFrom::Start(entry.offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

impl EmbeddedStore {
    /// Open or create the store in `dir`, replaying the existing log.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOG_FILE);
        let mut file = open_log(&path)?;

        let mut raw = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut raw)?;

        let now = now_secs();
        let mut index: HashMap<String, IndexEntry> = HashMap::new();
        let mut live_bytes = 0u64;
        let mut pos = 0usize;
        while pos < raw.len() {
            let Some(header) = raw.get(pos..pos + HEADER_LEN as usize) else {
                break;
            };
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(header);
            let len = u32::from_le_bytes(len_bytes) as usize;
            let start = pos + HEADER_LEN as usize;
            let Some(payload) = raw.get(start..start + len) else {
                break;
            };
            let Ok(record) = bincode::deserialize::<Record>(payload) else {
                break;
            };
            match record {
                Record::Put { key, expires_at, .. } => {
                    let entry = IndexEntry {
                        offset: start as u64,
                        len: len as u64,
                        expires_at,
                    };
                    let old = if entry.is_expired(now) {
                        index.remove(&key)
                    } else {
                        live_bytes += entry.frame_len();
                        index.insert(key, entry)
                    };
                    if let Some(old) = old {
                        live_bytes -= old.frame_len();
                    }
                }
                Record::Delete { key } => {
                    if let Some(old) = index.remove(&key) {
                        live_bytes -= old.frame_len();
                    }
                }
            }
            pos = start + len;
        }

        if pos < raw.len() {
            tracing::warn!(
                path = %path.display(),
                valid_bytes = pos,
                dropped_bytes = raw.len() - pos,
                "Truncating corrupt tail of value log"
            );
            file.set_len(pos as u64)?;
        }

        tracing::info!(path = %path.display(), keys = index.len(), "Embedded store opened");
        Ok(Self {
            dir,
            state: Mutex::new(Some(StoreState {
                file,
                index,
                total_bytes: pos as u64,
                live_bytes,
            })),
        })
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = guard.as_mut().ok_or(CacheError::StoreClosed)?;
        f(state)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.with_state(|state| {
            let Some(entry) = state.index.get(key).copied() else {
                return Ok(None);
            };
            if entry.is_expired(now_secs()) {
                return Ok(None);
            }
            let payload = read_payload(&mut state.file, &entry)?;
            match bincode::deserialize::<Record>(&payload)? {
                Record::Put { value, .. } => Ok(Some(value)),
                Record::Delete { .. } => Err(CacheError::Corrupt(format!(
                    "index for `{key}` points at a delete record"
                ))),
            }
        })
    }

    pub fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| now_secs().saturating_add(ttl_secs(ttl)));
        self.put(key, value, expires_at)
    }

    fn put(&self, key: &str, value: &[u8], expires_at: Option<u64>) -> Result<(), CacheError> {
        let record = Record::Put {
            key: key.to_string(),
            value: value.to_vec(),
            expires_at,
        };
        let payload = bincode::serialize(&record)?;
        self.with_state(|state| {
            let offset = append(&mut state.file, &payload)?;
            let entry = IndexEntry {
                offset,
                len: payload.len() as u64,
                expires_at,
            };
            state.total_bytes += entry.frame_len();
            state.live_bytes += entry.frame_len();
            if let Some(old) = state.index.insert(key.to_string(), entry) {
                state.live_bytes -= old.frame_len();
            }
            Ok(())
        })
    }

    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        let payload = bincode::serialize(&Record::Delete {
            key: key.to_string(),
        })?;
        self.with_state(|state| {
            let Some(old) = state.index.remove(key) else {
                return Ok(());
            };
            append(&mut state.file, &payload)?;
            state.total_bytes += HEADER_LEN + payload.len() as u64;
            state.live_bytes -= old.frame_len();
            Ok(())
        })
    }

    pub fn has(&self, key: &str) -> Result<bool, CacheError> {
        self.with_state(|state| {
            let now = now_secs();
            Ok(state.index.get(key).is_some_and(|entry| !entry.is_expired(now)))
        })
    }

    /// Share of the log that is garbage, between 0 and 1.
    pub fn garbage_ratio(&self) -> Result<f64, CacheError> {
        self.with_state(|state| Ok(garbage_ratio(state, now_secs())))
    }

    /// Drop expired keys from the index, then rewrite the log when at least
    /// `discard_ratio` of it is garbage.
    pub fn run_value_log_gc(&self, discard_ratio: f64) -> Result<GcOutcome, CacheError> {
        let log_path = self.dir.join(LOG_FILE);
        let compact_path = self.dir.join(COMPACT_FILE);
        self.with_state(|state| {
            let now = now_secs();
            let before = state.index.len();
            let mut expired_bytes = 0u64;
            state.index.retain(|_, entry| {
                let expired = entry.is_expired(now);
                if expired {
                    expired_bytes += entry.frame_len();
                }
                !expired
            });
            state.live_bytes -= expired_bytes;
            let pruned = before - state.index.len();
            if pruned > 0 {
                tracing::debug!(pruned, "Dropped expired keys from the index");
            }

            let ratio = garbage_ratio(state, now);
            if state.total_bytes == 0 || ratio < discard_ratio {
                return Ok(GcOutcome::Skipped { ratio });
            }

            let mut compact = File::create(&compact_path)?;
            let mut index = HashMap::with_capacity(state.index.len());
            let mut written = 0u64;
            for (key, entry) in &state.index {
                let payload = read_payload(&mut state.file, entry)?;
                compact.write_all(&(entry.len as u32).to_le_bytes())?;
                compact.write_all(&payload)?;
                index.insert(
                    key.clone(),
                    IndexEntry {
                        offset: written + HEADER_LEN,
                        ..*entry
                    },
                );
                written += entry.frame_len();
            }
            compact.sync_all()?;
            drop(compact);
            fs::rename(&compact_path, &log_path)?;

            let reclaimed_bytes = state.total_bytes - written;
            state.file = open_log(&log_path)?;
            state.index = index;
            state.total_bytes = written;
            state.live_bytes = written;
            Ok(GcOutcome::Rewritten { reclaimed_bytes })
        })
    }

    /// Flush and close the store. Further calls fail with `StoreClosed`.
    pub fn close(&self) -> Result<(), CacheError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = guard.take().ok_or(CacheError::StoreClosed)?;
        state.file.sync_all()?;
        tracing::info!(dir = %self.dir.display(), "Embedded store closed");
        Ok(())
    }
}

fn garbage_ratio(state: &StoreState, now: u64) -> f64 {
    if state.total_bytes == 0 {
        return 0.0;
    }
    let expired: u64 = state
        .index
        .values()
        .filter(|entry| entry.is_expired(now))
        .map(IndexEntry::frame_len)
        .sum();
    (state.total_bytes - state.live_bytes + expired) as f64 / state.total_bytes as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();
        store.set("a", b"1", None).unwrap();
        store.set("b", b"2", None).unwrap();
        store.set("a", b"3", None).unwrap();
        store.delete("b").unwrap();
        store.close().unwrap();

        let store = EmbeddedStore::open(dir.path()).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.get("b").unwrap(), None);
        assert!(store.has("a").unwrap());
    }

    #[test]
    fn truncates_corrupt_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();
        store.set("a", b"1", None).unwrap();
        store.close().unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE))
            .unwrap();
        file.write_all(&[200, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let store = EmbeddedStore::open(dir.path()).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        store.set("b", b"2", None).unwrap();
        store.close().unwrap();

        let store = EmbeddedStore::open(dir.path()).unwrap();
        assert_eq!(store.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn gc_skips_until_ratio_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();
        store.set("k", b"value", None).unwrap();
        assert!(matches!(
            store.run_value_log_gc(0.7).unwrap(),
            GcOutcome::Skipped { .. }
        ));

        for _ in 0..9 {
            store.set("k", b"value", None).unwrap();
        }
        assert!(store.garbage_ratio().unwrap() >= 0.7);
        let outcome = store.run_value_log_gc(0.7).unwrap();
        assert!(matches!(outcome, GcOutcome::Rewritten { reclaimed_bytes } if reclaimed_bytes > 0));
        assert_eq!(store.get("k").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.garbage_ratio().unwrap(), 0.0);
    }

    fn index_len(store: &EmbeddedStore) -> usize {
        store.with_state(|state| Ok(state.index.len())).unwrap()
    }

    #[test]
    fn expired_keys_are_garbage_and_leave_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();
        store.set("live", b"kept", None).unwrap();
        let past = Some(now_secs() - 1);
        for i in 0..100 {
            store.put(&format!("ratelimit:10.0.0.{i}:1"), b"1", past).unwrap();
        }
        assert!(!store.has("ratelimit:10.0.0.7:1").unwrap());
        assert!(store.garbage_ratio().unwrap() > 0.9);

        let outcome = store.run_value_log_gc(0.7).unwrap();
        assert!(matches!(outcome, GcOutcome::Rewritten { reclaimed_bytes } if reclaimed_bytes > 0));
        assert_eq!(index_len(&store), 1);
        assert_eq!(store.garbage_ratio().unwrap(), 0.0);
        store.close().unwrap();

        let store = EmbeddedStore::open(dir.path()).unwrap();
        assert_eq!(index_len(&store), 1);
        assert_eq!(store.get("live").unwrap(), Some(b"kept".to_vec()));
    }

    #[test]
    fn skipped_gc_still_prunes_expired_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();
        for i in 0..10 {
            store.set(&format!("k{i}"), &[7u8; 256], None).unwrap();
        }
        store.put("stale", b"1", Some(now_secs() - 1)).unwrap();

        assert!(matches!(
            store.run_value_log_gc(0.7).unwrap(),
            GcOutcome::Skipped { ratio } if ratio > 0.0
        ));
        assert_eq!(index_len(&store), 10);
    }

    #[test]
    fn replay_skips_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();
        store.set("k", b"old", None).unwrap();
        store.put("k", b"new", Some(now_secs() - 1)).unwrap();
        store.put("gone", b"1", Some(now_secs() - 1)).unwrap();
        store.close().unwrap();

        let store = EmbeddedStore::open(dir.path()).unwrap();
        assert_eq!(index_len(&store), 0);
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn ttl_rounds_up_to_the_next_second() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();
        let before = now_secs();
        store.set("k", b"v", Some(Duration::from_millis(1500))).unwrap();
        let expires_at = store
            .with_state(|state| Ok(state.index["k"].expires_at))
            .unwrap()
            .unwrap();
        assert!(expires_at >= before + 2);
    }

    /// In-memory log that accepts `budget` more bytes, then fails.
    struct FlakyLog {
        inner: io::Cursor<Vec<u8>>,
        budget: usize,
    }

    impl Write for FlakyLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.inner.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakyLog {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl Truncate for FlakyLog {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.inner.get_mut().truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_append_leaves_no_torn_frame() {
        let mut log = FlakyLog {
            inner: io::Cursor::new(Vec::new()),
            budget: 64,
        };
        assert_eq!(append(&mut log, b"first").unwrap(), HEADER_LEN);
        let end = log.inner.get_ref().len();

        log.budget = 3;
        assert!(matches!(append(&mut log, b"second record"), Err(CacheError::Io(_))));
        assert_eq!(log.inner.get_ref().len(), end);

        log.budget = 64;
        assert_eq!(append(&mut log, b"third").unwrap(), end as u64 + HEADER_LEN);
    }

    #[test]
    fn closed_store_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();
        store.close().unwrap();
        assert!(matches!(store.close(), Err(CacheError::StoreClosed)));
        assert!(matches!(store.get("a"), Err(CacheError::StoreClosed)));
    }
}
