//!
//! src/fetcher.rs  Oct 2nd, 2026
//!
//! Drives the catalog client across every page of the saved-album
//! library through a bounded worker pool
//!
//!

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tokio::{sync::Semaphore, task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogClient, PageRequest, SavedAlbumsPage};
use crate::config::{FetchConfig, RetryConfig};
use crate::errors::LibraryError;
use crate::types::Album;

/// Simple function to generate random wait for with_retry
fn generate_backoff(base: Duration, attempt: usize, jitter: bool, rng: &mut SmallRng) -> Duration {
    let exp = base.saturating_mul(1_u32 << attempt.min(6));
    if jitter {
        exp + Duration::from_millis(rng.gen_range(50..=200))
    } else {
        exp
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// exhausts `policy.max_retries`. Exhaustion surfaces as `Transport`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    op: &str,
    cancel: &CancellationToken,
    mut call: F
) -> Result<T, LibraryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LibraryError>>,
{
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_usize;
    loop {
        if cancel.is_cancelled() {
            return Err(LibraryError::Cancelled);
        }
        let err = match call().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e
        };
        if attempt >= policy.max_retries {
            return Err(LibraryError::Transport(
                format!("{op} failed after {} attempts: {err}", attempt + 1)
            ));
        }

        let mut backoff = generate_backoff(policy.base_backoff, attempt, policy.jitter, &mut rng);
        if let LibraryError::RateLimited { retry_after: Some(after) } = &err {
            backoff = backoff.max(*after);
        }
        warn!(op, attempt, backoff = ?backoff.as_millis(), error = %err, "retry");
        tokio::select! {
            _ = cancel.cancelled() => return Err(LibraryError::Cancelled),
            _ = sleep(backoff) => {}
        }
        attempt += 1;
    }
}

/// Two pages disagreed on an album's release year
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearConflict {
    pub uri: String,
    pub kept_year: i32,
    pub dropped_year: i32
}

/// Unordered aggregate of fetched albums, keyed by uri
#[derive(Debug, Default, Clone)]
pub struct AlbumSet {
    albums: HashMap<String, Album>,
    conflicts: Vec<YearConflict>
}

impl AlbumSet {
    /// On a repeated uri the earliest release year wins
    pub fn insert(&mut self, album: Album) {
        match self.albums.get_mut(&album.uri) {
            None => {
                self.albums.insert(album.uri.clone(), album);
            },
            Some(existing) if existing.release_year == album.release_year => {},
            Some(existing) => {
                let (kept, dropped) = if album.release_year < existing.release_year {
                    let dropped = existing.release_year;
                    *existing = album;
                    (existing.release_year, dropped)
                } else {
                    (existing.release_year, album.release_year)
                };
                self.conflicts.push(YearConflict {
                    uri: existing.uri.clone(), kept_year: kept, dropped_year: dropped
                });
            }
        }
    }

    pub fn extend(&mut self, albums: impl IntoIterator<Item = Album>) {
        for album in albums {
            self.insert(album);
        }
    }

    pub fn len(&self) -> usize { self.albums.len() }

    pub fn is_empty(&self) -> bool { self.albums.is_empty() }

    pub fn get(&self, uri: &str) -> Option<&Album> { self.albums.get(uri) }

    pub fn conflicts(&self) -> &[YearConflict] { &self.conflicts }

    pub fn into_albums(self) -> impl Iterator<Item = Album> {
        self.albums.into_values()
    }
}

impl FromIterator<Album> for AlbumSet {
    fn from_iter<I: IntoIterator<Item = Album>>(iter: I) -> Self {
        let mut set = AlbumSet::default();
        set.extend(iter);
        set
    }
}

pub struct Fetcher {
    cfg: FetchConfig,
    pool: Arc<Semaphore>,
    shutdown: CancellationToken
}

impl Fetcher {
    pub fn new(cfg: FetchConfig) -> Self {
        let pool = Arc::new(Semaphore::new(cfg.concurrency.max(1)));
        Self { cfg, pool, shutdown: CancellationToken::new() }
    }

    /// Share a caller-owned token, e.g. one tripped by ctrl-c
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn concurrency(&self) -> usize {
        self.cfg.concurrency.max(1)
    }

    /// Fetch every saved album. One page that cannot be completed aborts
    /// the whole fetch; nothing is persisted here.
    pub async fn fetch_all(&self, client: Arc<dyn CatalogClient>) ->
        Result<AlbumSet, LibraryError> {
        let job = self.shutdown.child_token();
        let first = PageRequest { offset: 0, limit: self.cfg.page_size };

        let head = self.fetch_page(client.as_ref(), first, &job).await?;
        let remaining = head.remaining(first);
        let total = head.total;
        info!(total, pages = remaining.len() + 1, workers = self.concurrency(), "fetch.start");

        let mut set = AlbumSet::default();
        set.extend(head.items);

        let mut workers = JoinSet::new();
        for page in remaining {
            let client = client.clone();
            let pool = self.pool.clone();
            let token = job.clone();
            let retry = self.cfg.retry.clone();
            workers.spawn(async move {
                let _permit = tokio::select! {
                    _ = token.cancelled() => return Err(LibraryError::Cancelled),
                    p = pool.acquire_owned() => p.map_err(|_| LibraryError::Cancelled)?
                };
                with_retry(&retry, "fetch.page", &token, || client.list_saved_albums(page))
                    .await
                    .map(|fetched| (page, fetched))
            });
        }

        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(|e| LibraryError::Transport(format!("page worker: {e}")))
                .and_then(|r| r);
            match outcome {
                Ok((page, fetched)) => {
                    debug!(offset = page.offset, items = fetched.items.len(), "fetch.page.done");
                    set.extend(fetched.items);
                },
                Err(e) => {
                    warn!(error = %e, "fetch.abort");
                    job.cancel();
                    workers.abort_all();
                    return Err(e);
                }
            }
        }

        if set.len() != total as usize {
            warn!(expected = total, got = set.len(), "fetch.count.mismatch");
        }
        info!(albums = set.len(), conflicts = set.conflicts().len(), "fetch.done");
        Ok(set)
    }

    async fn fetch_page(
        &self,
        client: &dyn CatalogClient,
        page: PageRequest,
        token: &CancellationToken
    ) -> Result<SavedAlbumsPage, LibraryError> {
        let _permit = tokio::select! {
            _ = token.cancelled() => return Err(LibraryError::Cancelled),
            p = self.pool.acquire() => p.map_err(|_| LibraryError::Cancelled)?
        };
        with_retry(&self.cfg.retry, "fetch.page", token, || client.list_saved_albums(page)).await
    }
}
