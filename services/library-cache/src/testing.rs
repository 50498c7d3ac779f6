//!
//! src/testing.rs  Oct 2nd, 2026
//!
//! In-memory catalog with scripted failures, shared by the unit tests
//!

use std::{
    collections::HashMap,
    sync::{atomic::{AtomicUsize, Ordering}, Mutex},
    time::Duration
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::catalog::{CatalogClient, PageRequest, SavedAlbumsPage};
use crate::config::{FetchConfig, RetryConfig};
use crate::errors::LibraryError;
use crate::types::{Album, CatalogItem, ItemKind};

pub fn album(id: &str, year: i32) -> Album {
    Album {
        uri: format!("spotify:album:{id}"),
        name: format!("Album {id}"),
        artists: vec!["Artist".to_string()],
        release_year: year,
        added_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }
}

pub fn named_album(id: &str, name: &str, artists: &[&str], year: i32) -> Album {
    Album {
        name: name.to_string(),
        artists: artists.iter().map(|a| a.to_string()).collect(),
        ..album(id, year)
    }
}

pub fn item(kind: ItemKind, id: &str, title: &str, artists: &[&str]) -> CatalogItem {
    let path = if kind.is_release() { "album" } else { "track" };
    CatalogItem {
        uri: format!("spotify:{path}:{id}"),
        kind,
        title: title.to_string(),
        artists: artists.iter().map(|a| a.to_string()).collect(),
        release_year: None
    }
}

pub fn fast_fetch_config(concurrency: usize) -> FetchConfig {
    FetchConfig {
        concurrency,
        page_size: 50,
        retry: RetryConfig {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            jitter: false
        }
    }
}

type ErrorFactory = Box<dyn Fn() -> LibraryError + Send + Sync>;

struct FailureScript {
    remaining: AtomicUsize,
    make: ErrorFactory
}

#[derive(Default)]
pub struct MockCatalog {
    albums: Mutex<Vec<Album>>,
    page_delay: Option<Duration>,
    page_failures: HashMap<u32, FailureScript>,
    searches: HashMap<(String, ItemKind), Vec<CatalogItem>>,
    search_failures: HashMap<String, ErrorFactory>,
    items: HashMap<String, CatalogItem>,
    tracks: HashMap<String, Vec<CatalogItem>>,

    page_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    search_log: Mutex<Vec<(String, ItemKind)>>,
    added: Mutex<Vec<(String, Vec<String>)>>,
    created: Mutex<Vec<String>>
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_albums(albums: Vec<Album>) -> Self {
        Self { albums: Mutex::new(albums), ..Self::default() }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    /// The page at `offset` fails `times` times before succeeding
    pub fn fail_page(
        mut self,
        offset: u32,
        times: usize,
        make: impl Fn() -> LibraryError + Send + Sync + 'static
    ) -> Self {
        self.page_failures.insert(offset, FailureScript {
            remaining: AtomicUsize::new(times),
            make: Box::new(make)
        });
        self
    }

    pub fn with_search(mut self, query: &str, kind: ItemKind, results: Vec<CatalogItem>) -> Self {
        self.searches.insert((query.to_string(), kind), results);
        self
    }

    pub fn fail_search(
        mut self,
        query: &str,
        make: impl Fn() -> LibraryError + Send + Sync + 'static
    ) -> Self {
        self.search_failures.insert(query.to_string(), Box::new(make));
        self
    }

    pub fn with_item(mut self, item: CatalogItem) -> Self {
        self.items.insert(item.uri.clone(), item);
        self
    }

    pub fn with_tracks(mut self, album_uri: &str, tracks: Vec<CatalogItem>) -> Self {
        self.tracks.insert(album_uri.to_string(), tracks);
        self
    }

    pub fn page_calls(&self) -> usize { self.page_calls.load(Ordering::SeqCst) }

    pub fn max_in_flight(&self) -> usize { self.max_in_flight.load(Ordering::SeqCst) }

    pub fn searches(&self) -> Vec<(String, ItemKind)> { self.search_log.lock().unwrap().clone() }

    pub fn added(&self) -> Vec<(String, Vec<String>)> { self.added.lock().unwrap().clone() }

    pub fn created(&self) -> Vec<String> { self.created.lock().unwrap().clone() }
}

#[async_trait]
impl CatalogClient for MockCatalog {
    async fn list_saved_albums(&self, page: PageRequest) ->
        Result<SavedAlbumsPage, LibraryError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.page_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(script) = self.page_failures.get(&page.offset) {
            let left = script.remaining.load(Ordering::SeqCst);
            if left > 0 {
                script.remaining.store(left - 1, Ordering::SeqCst);
                return Err((script.make)());
            }
        }

        let albums = self.albums.lock().unwrap();
        let total = albums.len() as u32;
        let start = (page.offset as usize).min(albums.len());
        let end = (start + page.limit as usize).min(albums.len());
        Ok(SavedAlbumsPage { items: albums[start..end].to_vec(), total })
    }

    async fn search(&self, query: &str, kind: ItemKind, limit: u32) ->
        Result<Vec<CatalogItem>, LibraryError> {
        self.search_log.lock().unwrap().push((query.to_string(), kind));
        if let Some(make) = self.search_failures.get(query) {
            return Err(make());
        }
        let mut found = self.searches.get(&(query.to_string(), kind)).cloned().unwrap_or_default();
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn resolve_uri(&self, uri: &str) -> Result<CatalogItem, LibraryError> {
        self.items.get(uri).cloned().ok_or_else(|| LibraryError::NotFound(uri.to_string()))
    }

    async fn album_tracks(&self, album_uri: &str) -> Result<Vec<CatalogItem>, LibraryError> {
        self.tracks.get(album_uri).cloned().ok_or_else(|| LibraryError::NotFound(album_uri.to_string()))
    }

    async fn create_playlist(&self, name: &str, _description: &str) ->
        Result<String, LibraryError> {
        let mut created = self.created.lock().unwrap();
        created.push(name.to_string());
        Ok(format!("playlist{}", created.len()))
    }

    async fn add_items_to_playlist(&self, playlist_id: &str, uris: &[String]) ->
        Result<(), LibraryError> {
        self.added.lock().unwrap().push((playlist_id.to_string(), uris.to_vec()));
        Ok(())
    }
}
