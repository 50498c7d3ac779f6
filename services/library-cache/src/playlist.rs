//!
//! src/playlist.rs  Oct 8th, 2026
//!
//! Builds playlists from resolution results: duplicate removal, release
//! expansion into tracks, batched submission and the `--output` file
//!

use std::{
    collections::HashSet,
    io::{BufWriter, Write},
    path::Path
};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::catalog::CatalogClient;
use crate::errors::LibraryError;
use crate::resolver::ResolutionResult;

/// Service maximum for a single add-items request
pub const PLAYLIST_BATCH_SIZE: usize = 100;
pub const PLAYLIST_DESCRIPTION: &str = "Created by spt";

/// Uris of resolved, non-duplicate results in input order
pub fn playlist_items(results: &[ResolutionResult]) -> Vec<String> {
    results.iter()
        .filter_map(ResolutionResult::resolved)
        .filter(|r| !r.is_duplicate)
        .map(|r| r.uri.clone())
        .collect()
}

/// Replaces every resolved single or album with its tracks. Order follows
/// the input; a track reached twice is kept at its first position.
pub async fn expand_to_tracks(client: &dyn CatalogClient, results: &[ResolutionResult]) ->
    Result<Vec<String>, LibraryError> {
    let mut seen = HashSet::new();
    let mut tracks = Vec::new();

    for resolved in results.iter().filter_map(ResolutionResult::resolved).filter(|r| !r.is_duplicate) {
        if !resolved.kind.is_release() {
            if seen.insert(resolved.uri.clone()) {
                tracks.push(resolved.uri.clone());
            }
            continue;
        }
        let album_tracks = client.album_tracks(&resolved.uri).await?;
        debug!(album = %resolved.uri, tracks = album_tracks.len(), "playlist.expand");
        for track in album_tracks {
            if seen.insert(track.uri.clone()) {
                tracks.push(track.uri);
            }
        }
    }
    Ok(tracks)
}

pub fn default_playlist_name(now: DateTime<Utc>) -> String {
    format!("Playlist {}", now.format("%Y-%m-%d %H:%M"))
}

/// Creates a private playlist holding `uris`; returns its id
pub async fn create_playlist(client: &dyn CatalogClient, name: &str, uris: &[String]) ->
    Result<String, LibraryError> {
    let playlist_id = client.create_playlist(name, PLAYLIST_DESCRIPTION).await?;
    for batch in uris.chunks(PLAYLIST_BATCH_SIZE) {
        client.add_items_to_playlist(&playlist_id, batch).await?;
    }
    info!(playlist = %playlist_id, name, items = uris.len(), "playlist.created");
    Ok(playlist_id)
}

/// One uri per line, replacing `path` atomically
pub fn write_uris(path: &Path, uris: &[String]) -> Result<(), LibraryError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new(".")
    };
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        for uri in uris {
            writeln!(writer, "{uri}")?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| LibraryError::Io(e.error))?;
    Ok(())
}
