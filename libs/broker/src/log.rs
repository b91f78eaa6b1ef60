//! # Topic logs
//!
//! Each topic is a single append-only partition. Records are kept in memory
//! for fetching and appended to `<log dir>/<topic>-0/00000000000000000000.log`
//! as `[u64 offset][u32 len][payload]`, big-endian.
use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::proto::RECORD_OVERHEAD;

/// longest accepted topic name
pub const MAX_TOPIC_LEN: usize = 249;

const SEGMENT_FILE: &str = "00000000000000000000.log";

/// Failures resolving or writing a topic
#[derive(Debug, Error)]
pub enum LogError {
    /// the name is not a legal topic name
    #[error("invalid topic name '{0}'")]
    InvalidTopic(String),

    /// the topic does not exist and auto creation is off
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    /// the segment could not be written
    #[error("segment io error: {0}")]
    Io(#[from] io::Error),
}

/// One record read back from a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// position in the partition
    pub offset: u64,
    /// record body
    pub payload: Bytes,
}

/// A single partition topic
#[derive(Debug)]
pub struct TopicLog {
    name: String,
    inner: Mutex<Segment>,
    // offset the next append gets
    next: watch::Sender<u64>,
}

#[derive(Debug)]
struct Segment {
    records: Vec<Bytes>,
    file: File,
}

impl TopicLog {
    fn open(log_dir: &Path, name: &str) -> io::Result<Self> {
        let dir = partition_dir(log_dir, name);
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(SEGMENT_FILE))?;
        let (next, _) = watch::channel(0);
        Ok(Self {
            name: name.to_owned(),
            inner: Mutex::new(Segment {
                records: Vec::new(),
                file,
            }),
            next,
        })
    }

    /// topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// offset the next record will get
    pub fn next_offset(&self) -> u64 {
        *self.next.borrow()
    }

    /// Append `payload`, returning its offset once it is on the segment
    pub fn append(&self, payload: Bytes) -> io::Result<u64> {
        let mut seg = self.inner.lock();
        let offset = seg.records.len() as u64;
        let mut entry = Vec::with_capacity(12 + payload.len());
        entry.extend_from_slice(&offset.to_be_bytes());
        entry.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        entry.extend_from_slice(&payload);
        seg.file.write_all(&entry)?;
        seg.records.push(payload);
        self.next.send_replace(offset + 1);
        Ok(offset)
    }

    /// Up to `max` records starting at `offset` whose encoded size stays
    /// within `max_bytes`. The first record is returned even if it alone
    /// exceeds `max_bytes`.
    pub fn read(&self, offset: u64, max: usize, max_bytes: usize) -> Vec<Record> {
        let seg = self.inner.lock();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let mut budget = max_bytes;
        let mut records = Vec::new();
        for (idx, payload) in seg.records.iter().enumerate().skip(start).take(max) {
            let cost = payload.len() + RECORD_OVERHEAD;
            if cost > budget && !records.is_empty() {
                break;
            }
            budget = budget.saturating_sub(cost);
            records.push(Record {
                offset: idx as u64,
                payload: payload.clone(),
            });
        }
        records
    }

    /// Resolves once a record at `offset` exists
    pub async fn wait_for(&self, offset: u64) {
        let mut rx = self.next.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|next| *next > offset).await;
    }
}

/// All topics of one broker
#[derive(Debug)]
pub struct Topics {
    log_dir: PathBuf,
    auto_create: bool,
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
}

impl Topics {
    /// Topics stored under `log_dir`, which is created if needed
    pub fn new(log_dir: impl Into<PathBuf>, auto_create: bool) -> io::Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        Ok(Self {
            log_dir,
            auto_create,
            topics: RwLock::new(HashMap::new()),
        })
    }

    /// Look up `name`, creating it if auto creation is enabled
    pub fn get(&self, name: &str) -> Result<Arc<TopicLog>, LogError> {
        validate(name)?;
        if let Some(log) = self.topics.read().get(name) {
            return Ok(Arc::clone(log));
        }
        if !self.auto_create {
            return Err(LogError::UnknownTopic(name.to_owned()));
        }
        self.create(name).map(|(log, _)| log)
    }

    /// Create `name` explicitly, returning the log and whether it is new
    pub fn create(&self, name: &str) -> Result<(Arc<TopicLog>, bool), LogError> {
        validate(name)?;
        let mut topics = self.topics.write();
        if let Some(log) = topics.get(name) {
            return Ok((Arc::clone(log), false));
        }
        let log = Arc::new(TopicLog::open(&self.log_dir, name)?);
        topics.insert(name.to_owned(), Arc::clone(&log));
        info!(topic = name, dir = %self.log_dir.display(), "created topic");
        Ok((log, true))
    }

    /// names of every topic, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn validate(name: &str) -> Result<(), LogError> {
    let legal = !name.is_empty()
        && name.len() <= MAX_TOPIC_LEN
        && name != "."
        && name != ".."
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if legal {
        Ok(())
    } else {
        debug!(topic = name, "rejected topic name");
        Err(LogError::InvalidTopic(name.to_owned()))
    }
}

fn partition_dir(log_dir: &Path, name: &str) -> PathBuf {
    log_dir.join(format!("{name}-0"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_topic_names() {
        for ok in ["topic", "a.b_c-D9", "x".repeat(MAX_TOPIC_LEN).as_str()] {
            assert!(validate(ok).is_ok(), "{ok}");
        }
        for bad in [
            "",
            ".",
            "..",
            "has space",
            "sl/ash",
            "x".repeat(MAX_TOPIC_LEN + 1).as_str(),
        ] {
            assert!(matches!(validate(bad), Err(LogError::InvalidTopic(_))), "{bad}");
        }
    }

    #[test]
    fn test_append_and_read() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let topics = Topics::new(dir.path(), true)?;
        let log = topics.get("events")?;
        assert_eq!(log.append(Bytes::from_static(b"one"))?, 0);
        assert_eq!(log.append(Bytes::from_static(b"two"))?, 1);
        assert_eq!(log.next_offset(), 2);

        let read = log.read(1, 10, usize::MAX);
        assert_eq!(
            read,
            vec![Record {
                offset: 1,
                payload: Bytes::from_static(b"two")
            }]
        );
        assert!(log.read(5, 10, usize::MAX).is_empty());
        assert_eq!(log.read(0, 1, usize::MAX).len(), 1);

        let segment = fs::read(dir.path().join("events-0").join(SEGMENT_FILE))?;
        let mut expected = Vec::new();
        for (offset, body) in [(0u64, &b"one"[..]), (1, &b"two"[..])] {
            expected.extend_from_slice(&offset.to_be_bytes());
            expected.extend_from_slice(&(body.len() as u32).to_be_bytes());
            expected.extend_from_slice(body);
        }
        assert_eq!(segment, expected);
        Ok(())
    }

    #[test]
    fn test_read_respects_byte_budget() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let topics = Topics::new(dir.path(), true)?;
        let log = topics.get("sized")?;
        for _ in 0..4 {
            log.append(Bytes::from(vec![7u8; 100]))?;
        }
        let per_record = 100 + RECORD_OVERHEAD;

        assert_eq!(log.read(0, 10, 2 * per_record).len(), 2);
        assert_eq!(log.read(0, 10, 2 * per_record + 1).len(), 2);
        assert_eq!(log.read(0, 10, 4 * per_record).len(), 4);
        // one record is always handed out
        let first = log.read(2, 10, 1);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].offset, 2);
        Ok(())
    }

    #[test]
    fn test_auto_create_disabled() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let topics = Topics::new(dir.path(), false)?;
        assert!(matches!(topics.get("t"), Err(LogError::UnknownTopic(_))));
        let (_, created) = topics.create("t")?;
        assert!(created);
        let (_, created) = topics.create("t")?;
        assert!(!created);
        assert!(topics.get("t").is_ok());
        assert_eq!(topics.names(), vec!["t"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_append() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let topics = Topics::new(dir.path(), true)?;
        let log = topics.get("t")?;

        let waiter = tokio::spawn({
            let log = Arc::clone(&log);
            async move { log.wait_for(0).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        log.append(Bytes::from_static(b"x"))?;
        tokio::time::timeout(Duration::from_secs(2), waiter).await??;
        Ok(())
    }
}
