//!
//! src/catalog.rs  Oct 2nd, 2026
//!
//! Defines the capability interface the fetcher, resolver and playlist
//! builder consume from the remote catalog service
//!

use async_trait::async_trait;

use crate::errors::LibraryError;
use crate::types::{Album, CatalogItem, ItemKind};

/// Offset-based page token, the service's native pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32
}

#[derive(Debug, Clone)]
pub struct SavedAlbumsPage {
    pub items: Vec<Album>,
    pub total: u32
}

impl SavedAlbumsPage {
    /// Every page request needed to cover `total` items after the first
    pub fn remaining(&self, first: PageRequest) -> Vec<PageRequest> {
        let limit = first.limit.max(1);
        (first.offset + limit..self.total)
            .step_by(limit as usize)
            .map(|offset| PageRequest { offset, limit })
            .collect()
    }
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// GET one page of the user's saved albums
    async fn list_saved_albums(&self, page: PageRequest) ->
        Result<SavedAlbumsPage, LibraryError>;

    /// Search the catalog, results in the service's relevance order
    async fn search(&self, query: &str, kind: ItemKind, limit: u32) ->
        Result<Vec<CatalogItem>, LibraryError>;

    /// Look up a literal `spotify:<kind>:<id>` URI
    async fn resolve_uri(&self, uri: &str) -> Result<CatalogItem, LibraryError>;

    /// Tracks of an album or single, in disc order
    async fn album_tracks(&self, album_uri: &str) -> Result<Vec<CatalogItem>, LibraryError>;

    /// Create a private playlist, returning its id
    async fn create_playlist(&self, name: &str, description: &str) ->
        Result<String, LibraryError>;

    async fn add_items_to_playlist(&self, playlist_id: &str, uris: &[String]) ->
        Result<(), LibraryError>;
}
