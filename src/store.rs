//! Persistent visited-state store. Page and image records live in an
//! embedded ordered key-value store under `p:`/`i:` key prefixes, keyed by
//! the 128-bit hash of the normalized URL. The `mark_page_visited` claim is
//! the dedup primitive granting a worker exclusive responsibility for a URL.

use crate::models::{ImageRecord, ImageStatus, PageRecord, PageStatus, WorkItem};
use crate::utils::url_hash;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store is closed")]
    Closed,
}

/// Page-record operations.
pub trait PageStore {
    /// Atomically claim a URL: write a fresh `Pending` record and return
    /// true, or return false if any record already exists.
    fn mark_page_visited(&self, normalized_url: &str) -> Result<bool, StoreError>;

    fn check_page_status(
        &self,
        normalized_url: &str,
    ) -> Result<(PageStatus, Option<PageRecord>), StoreError>;

    fn update_page_status(
        &self,
        normalized_url: &str,
        record: &PageRecord,
    ) -> Result<(), StoreError>;

    fn get_page_content_hash(&self, normalized_url: &str) -> Result<Option<String>, StoreError>;
}

/// Image-record operations. Claim semantics are weaker than for pages
/// because image processing may be deferred.
pub trait ImageStore {
    fn check_image_status(
        &self,
        normalized_url: &str,
    ) -> Result<(ImageStatus, Option<ImageRecord>), StoreError>;

    fn update_image_status(
        &self,
        normalized_url: &str,
        record: &ImageRecord,
    ) -> Result<(), StoreError>;
}

/// Administrative surface used for resume and audit.
pub trait StoreAdmin {
    fn get_visited_count(&self) -> Result<usize, StoreError>;

    /// Requeue every page still `Pending` or `Failure` after an
    /// interrupted run. Returns the number of items enqueued.
    fn requeue_incomplete(
        &self,
        enqueue: &mut dyn FnMut(WorkItem),
    ) -> Result<usize, StoreError>;

    /// Dump every record as `key\tvalue` lines in key order.
    fn write_visited_log(&self, path: &Path) -> Result<(), StoreError>;

    /// Idempotent; further operations fail with [`StoreError::Closed`].
    fn close(&self) -> Result<(), StoreError>;
}

/// Union of the three capability groups; the crawler accepts any value
/// providing it.
pub trait VisitedStore: PageStore + ImageStore + StoreAdmin + Send + Sync {}
impl<T: PageStore + ImageStore + StoreAdmin + Send + Sync> VisitedStore for T {}

fn page_key(normalized_url: &str) -> String {
    format!("p:{}", url_hash(normalized_url))
}

fn image_key(normalized_url: &str) -> String {
    format!("i:{}", url_hash(normalized_url))
}

/// Sled-backed store, one physical database per site rooted at
/// `<state_dir>/<site_domain>`. Read-modify-write sequences are serialized
/// by an internal mutex.
pub struct SledStore {
    db: Mutex<Option<sled::Db>>,
    path: PathBuf,
}

impl SledStore {
    /// Open the site's store. With `resume` false any existing state under
    /// the site path is destroyed first.
    pub fn open(
        state_dir: impl AsRef<Path>,
        site_domain: &str,
        resume: bool,
    ) -> Result<Self, StoreError> {
        let path = state_dir
            .as_ref()
            .join(crate::utils::sanitize_filename(site_domain));
        if !resume && path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(&path)?;
        Ok(Self {
            db: Mutex::new(Some(db)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&sled::Db) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.db.lock();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        f(db)
    }
}

impl PageStore for SledStore {
    fn mark_page_visited(&self, normalized_url: &str) -> Result<bool, StoreError> {
        self.with_db(|db| {
            let key = page_key(normalized_url);
            if db.get(key.as_bytes())?.is_some() {
                return Ok(false);
            }
            let record = PageRecord::new(normalized_url, 0);
            let value = serde_json::to_vec(&record)?;
            db.insert(key.as_bytes(), value)?;
            Ok(true)
        })
    }

    fn check_page_status(
        &self,
        normalized_url: &str,
    ) -> Result<(PageStatus, Option<PageRecord>), StoreError> {
        self.with_db(|db| {
            match db.get(page_key(normalized_url).as_bytes())? {
                Some(value) => {
                    let record: PageRecord = serde_json::from_slice(&value)?;
                    Ok((record.status, Some(record)))
                }
                None => Ok((PageStatus::Unknown, None)),
            }
        })
    }

    fn update_page_status(
        &self,
        normalized_url: &str,
        record: &PageRecord,
    ) -> Result<(), StoreError> {
        self.with_db(|db| {
            let value = serde_json::to_vec(record)?;
            db.insert(page_key(normalized_url).as_bytes(), value)?;
            Ok(())
        })
    }

    fn get_page_content_hash(&self, normalized_url: &str) -> Result<Option<String>, StoreError> {
        self.with_db(|db| {
            match db.get(page_key(normalized_url).as_bytes())? {
                Some(value) => {
                    let record: PageRecord = serde_json::from_slice(&value)?;
                    Ok(Some(record.content_hash).filter(|h| !h.is_empty()))
                }
                None => Ok(None),
            }
        })
    }
}

impl ImageStore for SledStore {
    fn check_image_status(
        &self,
        normalized_url: &str,
    ) -> Result<(ImageStatus, Option<ImageRecord>), StoreError> {
        self.with_db(|db| {
            match db.get(image_key(normalized_url).as_bytes())? {
                Some(value) => {
                    let record: ImageRecord = serde_json::from_slice(&value)?;
                    Ok((record.status, Some(record)))
                }
                None => Ok((ImageStatus::Unknown, None)),
            }
        })
    }

    fn update_image_status(
        &self,
        normalized_url: &str,
        record: &ImageRecord,
    ) -> Result<(), StoreError> {
        self.with_db(|db| {
            let value = serde_json::to_vec(record)?;
            db.insert(image_key(normalized_url).as_bytes(), value)?;
            Ok(())
        })
    }
}

impl StoreAdmin for SledStore {
    fn get_visited_count(&self) -> Result<usize, StoreError> {
        self.with_db(|db| {
            let mut count = 0;
            for entry in db.scan_prefix(b"p:") {
                entry?;
                count += 1;
            }
            Ok(count)
        })
    }

    fn requeue_incomplete(
        &self,
        enqueue: &mut dyn FnMut(WorkItem),
    ) -> Result<usize, StoreError> {
        self.with_db(|db| {
            let mut requeued = 0;
            for entry in db.scan_prefix(b"p:") {
                let (_, value) = entry?;
                let record: PageRecord = serde_json::from_slice(&value)?;
                if matches!(record.status, PageStatus::Pending | PageStatus::Failure)
                    && !record.normalized_url.is_empty()
                {
                    enqueue(WorkItem::new(record.normalized_url.clone(), record.depth));
                    requeued += 1;
                }
            }
            Ok(requeued)
        })
    }

    fn write_visited_log(&self, path: &Path) -> Result<(), StoreError> {
        self.with_db(|db| {
            let mut file = std::fs::File::create(path)?;
            for entry in db.iter() {
                let (key, value) = entry?;
                file.write_all(&key)?;
                file.write_all(b"\t")?;
                file.write_all(&value)?;
                file.write_all(b"\n")?;
            }
            Ok(())
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.db.lock();
        if let Some(db) = guard.take() {
            db.flush()?;
        }
        Ok(())
    }
}

/// In-memory store used by unit tests; identical semantics over a BTreeMap.
pub struct MemoryStore {
    entries: Mutex<Option<BTreeMap<String, String>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Some(BTreeMap::new())),
        }
    }

    fn with_map<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.entries.lock();
        let map = guard.as_mut().ok_or(StoreError::Closed)?;
        f(map)
    }
}

impl PageStore for MemoryStore {
    fn mark_page_visited(&self, normalized_url: &str) -> Result<bool, StoreError> {
        self.with_map(|map| {
            let key = page_key(normalized_url);
            if map.contains_key(&key) {
                return Ok(false);
            }
            let record = PageRecord::new(normalized_url, 0);
            map.insert(key, serde_json::to_string(&record)?);
            Ok(true)
        })
    }

    fn check_page_status(
        &self,
        normalized_url: &str,
    ) -> Result<(PageStatus, Option<PageRecord>), StoreError> {
        self.with_map(|map| match map.get(&page_key(normalized_url)) {
            Some(value) => {
                let record: PageRecord = serde_json::from_str(value)?;
                Ok((record.status, Some(record)))
            }
            None => Ok((PageStatus::Unknown, None)),
        })
    }

    fn update_page_status(
        &self,
        normalized_url: &str,
        record: &PageRecord,
    ) -> Result<(), StoreError> {
        self.with_map(|map| {
            map.insert(page_key(normalized_url), serde_json::to_string(record)?);
            Ok(())
        })
    }

    fn get_page_content_hash(&self, normalized_url: &str) -> Result<Option<String>, StoreError> {
        self.with_map(|map| match map.get(&page_key(normalized_url)) {
            Some(value) => {
                let record: PageRecord = serde_json::from_str(value)?;
                Ok(Some(record.content_hash).filter(|h| !h.is_empty()))
            }
            None => Ok(None),
        })
    }
}

impl ImageStore for MemoryStore {
    fn check_image_status(
        &self,
        normalized_url: &str,
    ) -> Result<(ImageStatus, Option<ImageRecord>), StoreError> {
        self.with_map(|map| match map.get(&image_key(normalized_url)) {
            Some(value) => {
                let record: ImageRecord = serde_json::from_str(value)?;
                Ok((record.status, Some(record)))
            }
            None => Ok((ImageStatus::Unknown, None)),
        })
    }

    fn update_image_status(
        &self,
        normalized_url: &str,
        record: &ImageRecord,
    ) -> Result<(), StoreError> {
        self.with_map(|map| {
            map.insert(image_key(normalized_url), serde_json::to_string(record)?);
            Ok(())
        })
    }
}

impl StoreAdmin for MemoryStore {
    fn get_visited_count(&self) -> Result<usize, StoreError> {
        self.with_map(|map| Ok(map.keys().filter(|k| k.starts_with("p:")).count()))
    }

    fn requeue_incomplete(
        &self,
        enqueue: &mut dyn FnMut(WorkItem),
    ) -> Result<usize, StoreError> {
        self.with_map(|map| {
            let mut requeued = 0;
            for (key, value) in map.iter() {
                if !key.starts_with("p:") {
                    continue;
                }
                let record: PageRecord = serde_json::from_str(value)?;
                if matches!(record.status, PageStatus::Pending | PageStatus::Failure)
                    && !record.normalized_url.is_empty()
                {
                    enqueue(WorkItem::new(record.normalized_url.clone(), record.depth));
                    requeued += 1;
                }
            }
            Ok(requeued)
        })
    }

    fn write_visited_log(&self, path: &Path) -> Result<(), StoreError> {
        self.with_map(|map| {
            let mut file = std::fs::File::create(path)?;
            for (key, value) in map.iter() {
                writeln!(file, "{}\t{}", key, value)?;
            }
            Ok(())
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        self.entries.lock().take();
        Ok(())
    }
}
