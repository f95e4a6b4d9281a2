//! On-disk named stores
//!
//! A [`StorageRoot`] is a directory of named stores; a [`Store`] is one of
//! those directories, mapping request URLs to cached responses. Store
//! directories carry a [`STORE_MARKER`] file, and only marked directories are
//! ever listed or removed through the root.
//!
//! Each entry is a single file named after the SHA-256 of its key:
//!
//! ```text
//! [ body bytes ][ metadata JSON ][ metadata length: u64 LE ]
//! ```
//!
//! Entries are written to a unique temporary file and renamed into place, so
//! a concurrent reader sees either the previous entry or the new one, never a
//! partial write. Readers that already opened the old file keep reading it.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use super::entry::{now_millis, EntryMeta, Response};
use crate::config::{WriteMode, FRESHNESS_HEADER};
use crate::error::{CacheError, CacheResult};

/// File present in every directory created as a store
pub const STORE_MARKER: &str = ".mediacache-store";

/// File extension of committed entries
const ENTRY_EXT: &str = "entry";

/// File extension of in-progress writes
const TMP_EXT: &str = "tmp";

/// Size of the trailing metadata-length field
const TRAILER_LEN: u64 = 8;

/// Chunk size used when streaming an in-memory body
const CHUNK_SIZE: usize = 64 * 1024;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory containing every named store generation
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
    mode: WriteMode,
}

impl StorageRoot {
    /// Creates a handle on the storage root; nothing is touched on disk yet
    ///
    /// # Arguments
    /// * `root` - Directory that holds the store directories
    /// * `mode` - Write strategy handed to every store opened from here
    pub fn new(root: impl Into<PathBuf>, mode: WriteMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    /// Directory this root manages
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Opens (creating and marking if needed) the store called `name`
    pub async fn open(&self, name: &str) -> CacheResult<Store> {
        let store = Store {
            name: name.to_string(),
            dir: self.root.join(name),
            mode: self.mode,
        };
        store.ensure_dir().await?;
        Ok(store)
    }

    /// Names of all stores currently present
    ///
    /// Directories without a [`STORE_MARKER`] are not stores and are left out.
    pub async fn names(&self) -> CacheResult<Vec<String>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if fs::try_exists(item.path().join(STORE_MARKER)).await? {
                names.push(item.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes the store called `name` with all its entries
    ///
    /// Returns `false` if no such store existed. A directory that is not
    /// marked as a store is never deleted.
    pub async fn delete(&self, name: &str) -> CacheResult<bool> {
        let dir = self.root.join(name);
        if !fs::try_exists(dir.join(STORE_MARKER)).await? {
            return Ok(false);
        }
        remove_dir(&dir).await
    }

    /// Deletes every store whose name differs from `current`
    ///
    /// Returns the names that were removed.
    pub async fn rollover(&self, current: &str) -> CacheResult<Vec<String>> {
        let mut removed = Vec::new();
        for name in self.names().await? {
            if name == current {
                continue;
            }
            if self.delete(&name).await? {
                info!(store = %name, "deleted stale cache generation");
                removed.push(name);
            }
        }
        Ok(removed)
    }
}

/// Size and age information about one entry, read without loading its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Request URL the entry was stored under
    pub key: String,
    /// Freshness stamp in epoch milliseconds
    pub stamp: Option<i64>,
    /// Payload length measured from the file itself
    pub exact_len: Option<u64>,
    /// Payload length announced by the `Content-Length` header
    pub declared_len: Option<u64>,
}

/// Files in a store that are not readable entries, removed by
/// [`Store::sweep_debris`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Debris {
    /// Number of files deleted
    pub files: usize,
    /// Their combined on-disk size
    pub bytes: u64,
}

/// A single named store
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    dir: PathBuf,
    mode: WriteMode,
}

impl Store {
    /// Generation name, e.g. `media-cache-v1`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this store's entry files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_mode(&self) -> WriteMode {
        self.mode
    }

    pub(crate) fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.{}", hex::encode(digest), ENTRY_EXT))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!(
            "{}.{}-{}.{}",
            hex::encode(&digest[..8]),
            std::process::id(),
            n,
            TMP_EXT
        ))
    }

    /// Creates the store directory and its marker if either is missing
    async fn ensure_dir(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.dir).await?;
        let marker = self.dir.join(STORE_MARKER);
        if !fs::try_exists(&marker).await? {
            fs::write(&marker, self.name.as_bytes()).await?;
        }
        Ok(())
    }

    /// Looks up the entry stored under `key`
    pub async fn get(&self, key: &str) -> CacheResult<Option<Response>> {
        let path = self.entry_path(key);
        let Some((mut file, meta, body_len)) = open_entry(&path).await? else {
            return Ok(None);
        };
        if meta.url != key {
            debug!(key, stored = %meta.url, "entry file belongs to another key");
            return Ok(None);
        }

        file.seek(SeekFrom::Start(0)).await?;
        let mut body = vec![0u8; body_len as usize];
        file.read_exact(&mut body).await?;

        Ok(Some(Response {
            status: meta.status,
            status_text: meta.status_text,
            headers: meta.headers,
            body: Bytes::from(body),
        }))
    }

    /// Stores `response` under `key`, stamped with the current time
    pub async fn put(&self, key: &str, response: &Response) -> CacheResult<()> {
        self.put_at(key, response, now_millis()).await
    }

    /// Stores `response` under `key` with an explicit freshness stamp
    pub async fn put_at(&self, key: &str, response: &Response, stamp: i64) -> CacheResult<()> {
        match self.mode {
            WriteMode::Streamed => {
                let mut writer = self.begin(key, response, stamp).await?;
                for chunk in response.body.chunks(CHUNK_SIZE) {
                    if let Err(e) = writer.write_chunk(chunk).await {
                        writer.abort().await;
                        return Err(e);
                    }
                }
                writer.commit().await?;
            }
            WriteMode::Buffered => {
                let meta = entry_meta(key, response, stamp, response.body.len() as u64);
                self.ensure_dir().await?;
                let tmp = self.tmp_path(key);
                if let Err(e) = write_buffered(&tmp, &meta, &response.body).await {
                    let _ = fs::remove_file(&tmp).await;
                    return Err(e);
                }
                if let Err(e) = fs::rename(&tmp, self.entry_path(key)).await {
                    let _ = fs::remove_file(&tmp).await;
                    return Err(e.into());
                }
            }
        }
        trace!(key, stamp, store = %self.name, "entry committed");
        Ok(())
    }

    /// Starts a streamed write of an entry for `key`
    ///
    /// `head` supplies status and headers; its body is ignored. Chunks go to
    /// a temporary file and the entry only becomes visible on
    /// [`EntryWriter::commit`].
    ///
    /// # Arguments
    /// * `key` - Request URL the entry is stored under
    /// * `head` - Response whose status and headers are recorded
    /// * `stamp` - Freshness stamp in epoch milliseconds
    pub async fn begin(&self, key: &str, head: &Response, stamp: i64) -> CacheResult<EntryWriter> {
        self.ensure_dir().await?;
        let tmp = self.tmp_path(key);
        let file = File::create(&tmp).await?;
        Ok(EntryWriter {
            file,
            tmp,
            dest: self.entry_path(key),
            meta: entry_meta(key, head, stamp, 0),
        })
    }

    /// A stamp for rewriting `key` that is strictly later than its current one
    ///
    /// Normally the current time; if the existing entry carries a stamp at or
    /// after now (same millisecond, or a clock that stepped back), one past
    /// that stamp instead.
    pub async fn next_stamp(&self, key: &str) -> i64 {
        let now = now_millis();
        match self.inspect(key).await {
            Ok(Some(EntryInfo {
                stamp: Some(previous),
                ..
            })) => now.max(previous.saturating_add(1)),
            _ => now,
        }
    }

    /// Removes the entry stored under `key`; `false` if there was none
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every key currently stored
    ///
    /// Unreadable entry files are logged and left out.
    pub async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.files_with_ext(ENTRY_EXT).await? {
            match open_entry(&path).await {
                Ok(Some((_, meta, _))) => keys.push(meta.url),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable entry"),
            }
        }
        Ok(keys)
    }

    /// Reads the stamp and size information of the entry under `key`
    pub async fn inspect(&self, key: &str) -> CacheResult<Option<EntryInfo>> {
        let path = self.entry_path(key);
        let Some((_, meta, body_len)) = open_entry(&path).await? else {
            return Ok(None);
        };
        if meta.url != key {
            return Ok(None);
        }
        Ok(Some(EntryInfo {
            key: meta.url.clone(),
            stamp: meta.freshness_stamp(),
            exact_len: Some(body_len),
            declared_len: meta.declared_length(),
        }))
    }

    /// Deletes entry files that cannot be decoded and abandoned temporary files
    ///
    /// A temporary file counts as abandoned once it has not been written to
    /// for `tmp_grace`; younger ones may belong to a write still in progress.
    ///
    /// # Returns
    /// * `Ok(Debris)` - how many files were removed and their on-disk size
    /// * `Err` - the store directory could not be listed
    pub async fn sweep_debris(&self, tmp_grace: Duration) -> CacheResult<Debris> {
        let mut debris = Debris::default();

        for path in self.files_with_ext(TMP_EXT).await? {
            let Ok(metadata) = fs::metadata(&path).await else {
                continue;
            };
            let idle = metadata
                .modified()
                .ok()
                .and_then(|t| t.elapsed().ok())
                .unwrap_or_default();
            if idle >= tmp_grace && remove_debris(&path).await {
                debris.files += 1;
                debris.bytes += metadata.len();
            }
        }

        for path in self.files_with_ext(ENTRY_EXT).await? {
            let Err(e) = open_entry(&path).await else {
                continue;
            };
            if !e.is_unreadable_entry() {
                warn!(path = %path.display(), error = %e, "could not check entry file");
                continue;
            }
            let len = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            if remove_debris(&path).await {
                debris.files += 1;
                debris.bytes += len;
            }
        }

        if debris.files > 0 {
            info!(
                files = debris.files,
                bytes = debris.bytes,
                store = %self.name,
                "removed unreadable cache files"
            );
        }
        Ok(debris)
    }

    /// Deletes the whole store directory
    pub async fn clear(&self) -> CacheResult<bool> {
        remove_dir(&self.dir).await
    }

    async fn files_with_ext(&self, ext: &str) -> CacheResult<Vec<PathBuf>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// An entry being written chunk by chunk
///
/// Dropping a writer without calling [`commit`](Self::commit) or
/// [`abort`](Self::abort) leaves its temporary file behind until the next
/// [`Store::sweep_debris`].
#[derive(Debug)]
pub struct EntryWriter {
    file: File,
    tmp: PathBuf,
    dest: PathBuf,
    meta: EntryMeta,
}

impl EntryWriter {
    /// Appends a slice of the body
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> CacheResult<()> {
        self.file.write_all(chunk).await?;
        self.meta.body_len += chunk.len() as u64;
        Ok(())
    }

    /// Writes the metadata trailer and moves the entry into place
    ///
    /// # Returns
    /// * `Ok(u64)` - payload bytes written
    /// * `Err` - the entry was not committed; its temporary file is gone
    pub async fn commit(self) -> CacheResult<u64> {
        let Self {
            mut file,
            tmp,
            dest,
            meta,
        } = self;

        let finished = append_metadata(&mut file, &meta).await;
        drop(file);
        if let Err(e) = finished {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &dest).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(meta.body_len)
    }

    /// Discards the partial entry
    pub async fn abort(self) {
        let Self { file, tmp, .. } = self;
        drop(file);
        if let Err(e) = fs::remove_file(&tmp).await {
            debug!(path = %tmp.display(), error = %e, "could not remove partial entry");
        }
    }
}

fn entry_meta(key: &str, response: &Response, stamp: i64, body_len: u64) -> EntryMeta {
    let mut headers = response.headers.clone();
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(FRESHNESS_HEADER));
    headers.push((FRESHNESS_HEADER.to_string(), stamp.to_string()));

    EntryMeta {
        url: key.to_string(),
        status: response.status,
        status_text: response.status_text.clone(),
        headers,
        body_len,
    }
}

async fn remove_dir(path: &Path) -> CacheResult<bool> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn remove_debris(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not remove cache file");
            }
            false
        }
    }
}

/// Appends the metadata JSON and its length trailer after the body
async fn append_metadata(file: &mut File, meta: &EntryMeta) -> CacheResult<()> {
    let encoded = serde_json::to_vec(meta)?;
    file.write_all(&encoded).await?;
    file.write_all(&(encoded.len() as u64).to_le_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Builds the full entry in memory and writes it in one call
async fn write_buffered(path: &Path, meta: &EntryMeta, body: &Bytes) -> CacheResult<()> {
    let encoded = serde_json::to_vec(meta)?;
    let mut buf = Vec::with_capacity(body.len() + encoded.len() + TRAILER_LEN as usize);
    buf.extend_from_slice(body);
    buf.extend_from_slice(&encoded);
    buf.extend_from_slice(&(encoded.len() as u64).to_le_bytes());
    fs::write(path, buf).await?;
    Ok(())
}

/// Opens an entry file and decodes its metadata
///
/// Returns the open file, the metadata and the payload length, or `None` if
/// the file does not exist.
async fn open_entry(path: &Path) -> CacheResult<Option<(File, EntryMeta, u64)>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let file_len = file.metadata().await?.len();
    let display = path.display().to_string();
    if file_len < TRAILER_LEN {
        return Err(CacheError::corrupt(display, "shorter than trailer"));
    }

    file.seek(SeekFrom::Start(file_len - TRAILER_LEN)).await?;
    let mut trailer = [0u8; TRAILER_LEN as usize];
    file.read_exact(&mut trailer).await?;
    let meta_len = u64::from_le_bytes(trailer);

    let Some(body_len) = file_len
        .checked_sub(TRAILER_LEN)
        .and_then(|n| n.checked_sub(meta_len))
    else {
        return Err(CacheError::corrupt(display, "metadata length exceeds file"));
    };

    file.seek(SeekFrom::Start(body_len)).await?;
    let mut encoded = vec![0u8; meta_len as usize];
    file.read_exact(&mut encoded).await?;
    let meta: EntryMeta = serde_json::from_slice(&encoded)?;

    if meta.body_len != body_len {
        return Err(CacheError::corrupt(display, "payload length mismatch"));
    }
    Ok(Some((file, meta, body_len)))
}

#[cfg(test)]
impl Store {
    /// Writes an entry whose metadata has no freshness stamp at all
    pub(crate) async fn put_unstamped(&self, key: &str, response: &Response) -> CacheResult<()> {
        let mut meta = entry_meta(key, response, 0, response.body.len() as u64);
        meta.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(FRESHNESS_HEADER));
        self.ensure_dir().await?;
        write_buffered(&self.entry_path(key), &meta, &response.body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store(mode: WriteMode) -> (Store, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = StorageRoot::new(temp_dir.path(), mode);
        let store = root.open("test-v1").await.expect("open store");
        (store, temp_dir)
    }

    fn segment(len: usize) -> Response {
        Response::ok(vec![7u8; len])
            .with_header("Content-Type", "video/mp2t")
            .with_header("Content-Length", len.to_string())
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing_key() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        assert!(store.get("https://cdn/a/seg1.ts").await.unwrap().is_none());
        assert!(store.inspect("https://cdn/a/seg1.ts").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_stamps_entry_with_current_time() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        let key = "https://cdn/a/seg1.ts?token=1";

        let before = now_millis();
        store.put(key, &segment(1000)).await.expect("put should succeed");
        let after = now_millis();

        let cached = store.get(key).await.unwrap().expect("entry should exist");
        let stamp = cached.freshness_stamp().expect("entry should be stamped");
        assert!(stamp >= before && stamp <= after);
        assert_eq!(cached.body.len(), 1000);
        assert_eq!(cached.header("content-type"), Some("video/mp2t"));
    }

    #[tokio::test]
    async fn test_write_modes_produce_identical_entries() {
        let (streamed, _a) = create_test_store(WriteMode::Streamed).await;
        let (buffered, _b) = create_test_store(WriteMode::Buffered).await;
        let key = "https://cdn/a/big.mp4";
        let response = segment(CHUNK_SIZE * 3 + 17);

        streamed.put_at(key, &response, 42).await.unwrap();
        buffered.put_at(key, &response, 42).await.unwrap();

        let a = streamed.get(key).await.unwrap().unwrap();
        let b = buffered.get(key).await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.freshness_stamp(), Some(42));
        assert_eq!(a.body, response.body);

        let bytes_a = std::fs::read(streamed.entry_path(key)).unwrap();
        let bytes_b = std::fs::read(buffered.entry_path(key)).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[tokio::test]
    async fn test_put_replaces_existing_stamp_header() {
        let (store, _temp_dir) = create_test_store(WriteMode::Buffered).await;
        let key = "https://cdn/a/video.m3u8";
        let response = Response::ok("#EXTM3U").with_header(FRESHNESS_HEADER, "1");

        store.put_at(key, &response, 99).await.unwrap();

        let cached = store.get(key).await.unwrap().unwrap();
        assert_eq!(cached.freshness_stamp(), Some(99));
        let count = cached
            .headers
            .iter()
            .filter(|(k, _)| k == FRESHNESS_HEADER)
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_latest_entry() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        let key = "https://cdn/a/video.m3u8";

        store.put_at(key, &Response::ok("first"), 1).await.unwrap();
        store.put_at(key, &Response::ok("second"), 2).await.unwrap();

        let cached = store.get(key).await.unwrap().unwrap();
        assert_eq!(&cached.body[..], b"second");
        assert_eq!(store.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        store.put("https://cdn/a/1.ts", &segment(10)).await.unwrap();
        store.put("https://cdn/a/2.ts", &segment(10)).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["https://cdn/a/1.ts", "https://cdn/a/2.ts"]);

        assert!(store.delete("https://cdn/a/1.ts").await.unwrap());
        assert!(!store.delete("https://cdn/a/1.ts").await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec!["https://cdn/a/2.ts"]);
    }

    #[tokio::test]
    async fn test_keys_skip_temp_and_corrupt_files() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        store.put("https://cdn/a/1.ts", &segment(10)).await.unwrap();
        std::fs::write(store.dir().join("partial.1-1.tmp"), b"half").unwrap();
        std::fs::write(store.dir().join("broken.entry"), b"xx").unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["https://cdn/a/1.ts"]);
    }

    #[tokio::test]
    async fn test_inspect_reports_sizes_and_stamp() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        let key = "https://cdn/a/1.ts";
        store.put_at(key, &segment(1000), 1234).await.unwrap();

        let info = store.inspect(key).await.unwrap().unwrap();
        assert_eq!(info.key, key);
        assert_eq!(info.stamp, Some(1234));
        assert_eq!(info.exact_len, Some(1000));
        assert_eq!(info.declared_len, Some(1000));
    }

    #[tokio::test]
    async fn test_clear_removes_store_and_put_recreates_it() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        store.put("https://cdn/a/1.ts", &segment(10)).await.unwrap();

        assert!(store.clear().await.unwrap());
        assert!(store.keys().await.unwrap().is_empty());
        assert!(!store.clear().await.unwrap());

        store.put("https://cdn/a/2.ts", &segment(10)).await.unwrap();
        assert_eq!(store.keys().await.unwrap().len(), 1);
        assert!(store.dir().join(STORE_MARKER).exists());
    }

    #[tokio::test]
    async fn test_rollover_deletes_only_other_generations() {
        let temp_dir = TempDir::new().unwrap();
        let root = StorageRoot::new(temp_dir.path(), WriteMode::Streamed);

        let old = root.open("media-cache-v0").await.unwrap();
        let older = root.open("legacy").await.unwrap();
        let current = root.open("media-cache-v1").await.unwrap();
        old.put("https://cdn/a/1.ts", &segment(10)).await.unwrap();
        older.put("https://cdn/a/2.ts", &segment(10)).await.unwrap();
        current.put("https://cdn/a/3.ts", &segment(10)).await.unwrap();

        let removed = root.rollover("media-cache-v1").await.unwrap();

        assert_eq!(removed, vec!["legacy", "media-cache-v0"]);
        assert_eq!(root.names().await.unwrap(), vec!["media-cache-v1"]);
        assert!(old.keys().await.unwrap().is_empty());
        assert_eq!(current.keys().await.unwrap(), vec!["https://cdn/a/3.ts"]);
    }

    #[tokio::test]
    async fn test_rollover_leaves_unmarked_directories_alone() {
        let temp_dir = TempDir::new().unwrap();
        let photos = temp_dir.path().join("my-photos");
        std::fs::create_dir_all(&photos).unwrap();
        std::fs::write(photos.join("holiday.jpg"), b"jpeg").unwrap();
        let root = StorageRoot::new(temp_dir.path(), WriteMode::Streamed);
        root.open("media-cache-v0").await.unwrap();

        let removed = root.rollover("media-cache-v1").await.unwrap();

        assert_eq!(removed, vec!["media-cache-v0"]);
        assert!(photos.join("holiday.jpg").exists());
        assert!(!root.delete("my-photos").await.unwrap());
        assert!(photos.join("holiday.jpg").exists());
    }

    #[tokio::test]
    async fn test_names_lists_only_marked_stores() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("downloads")).unwrap();
        let root = StorageRoot::new(temp_dir.path(), WriteMode::Buffered);
        root.open("media-cache-v1").await.unwrap();

        assert_eq!(root.names().await.unwrap(), vec!["media-cache-v1"]);
    }

    #[tokio::test]
    async fn test_names_on_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let root = StorageRoot::new(temp_dir.path().join("nope"), WriteMode::Buffered);
        assert!(root.names().await.unwrap().is_empty());
        assert!(root.rollover("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_round_trips() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        let key = "https://cdn/a/empty.ts";
        store.put(key, &Response::ok(Bytes::new())).await.unwrap();

        let cached = store.get(key).await.unwrap().unwrap();
        assert!(cached.body.is_empty());
        assert_eq!(store.inspect(key).await.unwrap().unwrap().exact_len, Some(0));
    }

    fn age_file(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn test_entry_writer_commits_chunks() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        let key = "https://cdn/a/movie.mp4";
        let head = Response::ok(Bytes::new()).with_header("Content-Type", "video/mp4");

        let mut writer = store.begin(key, &head, 7).await.unwrap();
        writer.write_chunk(b"abc").await.unwrap();
        assert!(store.get(key).await.unwrap().is_none());
        writer.write_chunk(b"def").await.unwrap();
        assert_eq!(writer.commit().await.unwrap(), 6);

        let cached = store.get(key).await.unwrap().unwrap();
        assert_eq!(&cached.body[..], b"abcdef");
        assert_eq!(cached.freshness_stamp(), Some(7));
        assert_eq!(cached.header("content-type"), Some("video/mp4"));
    }

    #[tokio::test]
    async fn test_entry_writer_abort_leaves_nothing_behind() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        let key = "https://cdn/a/movie.mp4";

        let mut writer = store.begin(key, &Response::ok(Bytes::new()), 7).await.unwrap();
        writer.write_chunk(b"partial").await.unwrap();
        writer.abort().await;

        assert!(store.get(key).await.unwrap().is_none());
        assert!(store.files_with_ext(TMP_EXT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_debris_removes_corrupt_and_abandoned_files() {
        let (store, _temp_dir) = create_test_store(WriteMode::Streamed).await;
        store.put("https://cdn/a/1.ts", &segment(100)).await.unwrap();
        let abandoned = store.dir().join("aaaa.1-1.tmp");
        let in_flight = store.dir().join("bbbb.1-2.tmp");
        let broken = store.dir().join("broken.entry");
        std::fs::write(&abandoned, vec![0u8; 3000]).unwrap();
        std::fs::write(&in_flight, vec![0u8; 500]).unwrap();
        std::fs::write(&broken, vec![0u8; 2000]).unwrap();
        age_file(&abandoned, Duration::from_secs(3600));

        let debris = store.sweep_debris(Duration::from_secs(60)).await.unwrap();

        assert_eq!(debris, Debris { files: 2, bytes: 5000 });
        assert!(!abandoned.exists());
        assert!(!broken.exists());
        assert!(in_flight.exists());
        assert!(store.dir().join(STORE_MARKER).exists());
        assert_eq!(store.keys().await.unwrap(), vec!["https://cdn/a/1.ts"]);
    }

    #[tokio::test]
    async fn test_next_stamp_is_strictly_later_than_stored() {
        let (store, _temp_dir) = create_test_store(WriteMode::Buffered).await;
        let key = "https://cdn/live/video.m3u8";
        let before = now_millis();
        assert!(store.next_stamp(key).await >= before);

        let future = now_millis() + 60_000;
        store.put_at(key, &Response::ok("#EXTM3U"), future).await.unwrap();

        assert_eq!(store.next_stamp(key).await, future + 1);
    }

    #[tokio::test]
    async fn test_unstamped_entry_reads_without_stamp() {
        let (store, _temp_dir) = create_test_store(WriteMode::Buffered).await;
        let key = "https://cdn/a/1.ts";
        store.put_unstamped(key, &segment(10)).await.unwrap();

        let info = store.inspect(key).await.unwrap().unwrap();
        assert_eq!(info.stamp, None);
        assert_eq!(info.exact_len, Some(10));
    }
}
