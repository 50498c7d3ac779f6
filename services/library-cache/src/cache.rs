//!
//! src/cache.rs  Oct 4th, 2026
//!
//! Persistent, year-partitioned album cache. A uri lives in exactly one
//! partition; the file is replaced on refresh, never edited in place
//!

use std::{
    collections::{BTreeMap, HashSet},
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration
};

use chrono::{DateTime, TimeZone, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::CatalogClient;
use crate::errors::LibraryError;
use crate::fetcher::{AlbumSet, Fetcher, YearConflict};
use crate::types::{Album, YearFilter};

/// Snapshot persisted as
/// `{ "timestamp": <unix secs>, "albums_by_year": { "<year>": [album, ..] } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFile {
    timestamp: i64,
    albums_by_year: BTreeMap<i32, Vec<Album>>
}

impl CacheFile {
    /// Partition fetched albums by release year; within a year albums are
    /// ordered newest-saved first so the file is stable across refreshes
    pub fn from_album_set(set: AlbumSet, timestamp: DateTime<Utc>) -> Self {
        let mut albums_by_year: BTreeMap<i32, Vec<Album>> = BTreeMap::new();
        for album in set.into_albums() {
            albums_by_year.entry(album.release_year).or_default().push(album);
        }
        for albums in albums_by_year.values_mut() {
            albums.sort_by(|a, b| b.added_at.cmp(&a.added_at).then_with(|| a.uri.cmp(&b.uri)));
        }
        Self { timestamp: timestamp.timestamp(), albums_by_year }
    }

    pub fn timestamp(&self) -> i64 { self.timestamp }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }

    pub fn partitions(&self) -> &BTreeMap<i32, Vec<Album>> { &self.albums_by_year }

    /// Albums in the partitions `filter` selects, grouped by year
    /// ascending. Non-matching partitions are never visited; the iterator
    /// is lazy and can be cloned to restart.
    pub fn iterate(&self, filter: YearFilter) -> impl Iterator<Item = &Album> + Clone + '_ {
        let (lo, hi) = filter.bounds();
        self.albums_by_year.range(lo..=hi).flat_map(|(_, albums)| albums.iter())
    }

    pub fn album_counts(&self) -> BTreeMap<i32, usize> {
        self.albums_by_year.iter().map(|(year, albums)| (*year, albums.len())).collect()
    }

    pub fn total_albums(&self) -> usize {
        self.albums_by_year.values().map(Vec::len).sum()
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        let secs = now.timestamp().saturating_sub(self.timestamp);
        Duration::from_secs(secs.max(0) as u64)
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.is_stale_at(Utc::now(), max_age)
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age_at(now) > max_age
    }

    fn decode(bytes: &[u8], path: &Path) -> Result<(Self, Vec<YearConflict>), LibraryError> {
        let mut file: CacheFile = serde_json::from_slice(bytes).map_err(|e| {
            LibraryError::CacheCorrupt { path: path.to_path_buf(), reason: e.to_string() }
        })?;
        for (year, albums) in file.albums_by_year.iter_mut() {
            for album in albums.iter_mut() {
                album.release_year = *year;
            }
        }
        let conflicts = file.enforce_unique(path)?;
        Ok((file, conflicts))
    }

    /// Drop every occurrence of a uri after its lowest year. Empty
    /// uris cannot be repaired.
    fn enforce_unique(&mut self, path: &Path) -> Result<Vec<YearConflict>, LibraryError> {
        let mut seen: BTreeMap<String, i32> = BTreeMap::new();
        let mut conflicts = Vec::new();

        // BTreeMap iterates years ascending, so the first sighting is the canonical one
        for (year, albums) in self.albums_by_year.iter_mut() {
            let mut err = None;
            albums.retain(|album| {
                if album.uri.trim().is_empty() {
                    err = Some(format!("album {:?} in {year} has no uri", album.name));
                    return false;
                }
                match seen.get(&album.uri) {
                    None => {
                        seen.insert(album.uri.clone(), *year);
                        true
                    },
                    Some(kept) => {
                        if kept != year {
                            conflicts.push(YearConflict {
                                uri: album.uri.clone(), kept_year: *kept, dropped_year: *year
                            });
                        }
                        false
                    }
                }
            });
            if let Some(reason) = err {
                return Err(LibraryError::CacheCorrupt { path: path.to_path_buf(), reason });
            }
        }
        self.albums_by_year.retain(|_, albums| !albums.is_empty());
        Ok(conflicts)
    }

    /// True when no uri appears in more than one partition
    pub fn is_globally_unique(&self) -> bool {
        let mut seen = HashSet::new();
        self.albums_by_year.values().flatten().all(|album| seen.insert(album.uri.as_str()))
    }
}

pub fn format_age_message(age: Duration) -> String {
    let hours_total = age.as_secs() / 3600;
    let (days, hours) = (hours_total / 24, hours_total % 24);
    if days > 0 {
        format!("Using cached albums ({days} days, {hours} hours old).")
    } else {
        format!("Using cached albums ({hours} hours old).")
    }
}

fn log_conflicts(conflicts: &[YearConflict], source: &str) {
    for c in conflicts {
        warn!(
            uri = %c.uri, kept_year = c.kept_year, dropped_year = c.dropped_year,
            source, "cache.invariant.repair"
        );
    }
}

/// Handle on one cache location. No process-wide state: callers pass
/// this to whatever needs the cache.
#[derive(Debug, Clone)]
pub struct LibraryCache {
    path: PathBuf,
    lock_path: PathBuf
}

impl LibraryCache {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn load(&self) -> Result<CacheFile, LibraryError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LibraryError::CacheMissing(self.path.clone()));
            },
            Err(e) => return Err(e.into())
        };
        let (file, conflicts) = CacheFile::decode(&bytes, &self.path)?;
        log_conflicts(&conflicts, "load");
        debug!(path = %self.path.display(), albums = file.total_albums(), "cache.load");
        Ok(file)
    }

    /// Fetch the whole library and atomically replace the cache. On any
    /// failure the previous file is left untouched.
    pub async fn refresh(&self, fetcher: &Fetcher, client: Arc<dyn CatalogClient>) ->
        Result<CacheFile, LibraryError> {
        let span = info_span!("cache.refresh", run = %Uuid::new_v4(), path = %self.path.display());
        async move {
            let _lock = self.lock(&fetcher.shutdown()).await?;

            let set = fetcher.fetch_all(client).await?;
            log_conflicts(set.conflicts(), "fetch");

            let file = CacheFile::from_album_set(set, Utc::now());
            self.store(&file)?;
            info!(albums = file.total_albums(), years = file.partitions().len(), "cache.refresh.done");
            Ok(file)
        }
        .instrument(span)
        .await
    }

    /// Write-temp-then-rename so readers only ever see a whole file
    pub fn store(&self, file: &CacheFile) -> Result<(), LibraryError> {
        let parent = self.parent_dir();
        fs::create_dir_all(&parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, file)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| LibraryError::Io(e.error))?;
        debug!(path = %self.path.display(), "cache.store");
        Ok(())
    }

    pub fn close(self) {
        debug!(path = %self.path.display(), "cache.close");
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from(".")
        }
    }

    /// Advisory exclusive lock serialising refreshes of this location;
    /// released when the returned file drops. Waiting ends on `cancel`.
    async fn lock(&self, cancel: &CancellationToken) -> Result<fs::File, LibraryError> {
        fs::create_dir_all(self.parent_dir())?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;

        if file.try_lock_exclusive().is_ok() {
            return Ok(file);
        }
        info!(lock = %self.lock_path.display(), "cache.refresh.wait");
        let wait = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|_| file));
        tokio::select! {
            _ = cancel.cancelled() => Err(LibraryError::Cancelled),
            joined = wait => joined
                .map_err(|e| LibraryError::Io(std::io::Error::other(e)))?
                .map_err(LibraryError::from)
        }
    }
}
