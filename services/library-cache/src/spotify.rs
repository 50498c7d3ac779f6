//!
//! src/spotify.rs  Oct 9th, 2026
//!
//! Spotify Web API implementation of the catalog capability. Requests
//! are single-shot; retry policy belongs to the caller.
//!

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, redirect, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};
use url::Url;

use crate::catalog::{CatalogClient, PageRequest, SavedAlbumsPage};
use crate::config::{HttpConfig, SpotifyConfig};
use crate::errors::LibraryError;
use crate::types::{parse_release_year, Album, CatalogItem, ItemKind};

pub const ADD_ITEMS_BATCH: usize = 100;
const ALBUM_TRACKS_PAGE: u32 = 50;
const TOKEN_EXPIRY_MARGIN: u64 = 60;

fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, LibraryError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .build()
        .map_err(|e| LibraryError::Config(format!("build client: {e}")))
}

/// Maps a non-success status onto the error taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, message: String) -> LibraryError {
    match status.as_u16() {
        401 | 403 => LibraryError::Auth(format!("{status}: {message}")),
        429 => LibraryError::RateLimited { retry_after },
        404 => LibraryError::NotFound(message),
        s if status.is_server_error() => LibraryError::Transport(format!("server returned {s}: {message}")),
        s => LibraryError::Http { status: s, message }
    }
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn check(resp: Response) -> Result<Response, LibraryError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let wait = retry_after(&resp);
    let message = resp.text().await.unwrap_or_default();
    Err(classify_status(status, wait, message))
}

/// Splits `spotify:<kind>:<id>` into its parts
pub fn parse_spotify_uri(uri: &str) -> Option<(&str, &str)> {
    let mut parts = uri.split(':');
    if parts.next()? != "spotify" {
        return None;
    }
    let kind = parts.next()?;
    let id = parts.next()?;
    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric());
    (parts.next().is_none() && valid).then_some((kind, id))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64
}

fn default_expires_in() -> u64 { 3600 }

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    name: String
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistObject>,
    #[serde(default)]
    album_type: Option<String>,
    #[serde(default)]
    release_date: Option<String>
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistObject>,
    #[serde(default)]
    album: Option<AlbumObject>
}

#[derive(Debug, Deserialize)]
struct SavedAlbumObject {
    added_at: DateTime<Utc>,
    album: AlbumObject
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
    #[serde(default)]
    total: u32,
    #[serde(default)]
    next: Option<String>
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    tracks: Option<Paging<TrackObject>>,
    #[serde(default)]
    albums: Option<Paging<AlbumObject>>
}

#[derive(Debug, Deserialize)]
struct UserObject {
    id: String
}

#[derive(Debug, Deserialize)]
struct PlaylistObject {
    id: String
}

#[derive(Debug, Serialize)]
struct NewPlaylist<'a> {
    name: &'a str,
    description: &'a str,
    public: bool
}

#[derive(Debug, Serialize)]
struct AddItems<'a> {
    uris: &'a [String]
}

fn artist_names(artists: Vec<ArtistObject>) -> Vec<String> {
    artists.into_iter().map(|a| a.name).collect()
}

impl AlbumObject {
    fn kind(&self) -> ItemKind {
        match self.album_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("single") => ItemKind::Single,
            _ => ItemKind::Album
        }
    }

    fn into_item(self) -> CatalogItem {
        let kind = self.kind();
        CatalogItem {
            release_year: self.release_date.as_deref().and_then(|d| parse_release_year(d).ok()),
            uri: self.uri,
            kind,
            title: self.name,
            artists: artist_names(self.artists)
        }
    }
}

impl TrackObject {
    fn into_item(self) -> CatalogItem {
        CatalogItem {
            release_year: self.album.as_ref()
                .and_then(|a| a.release_date.as_deref())
                .and_then(|d| parse_release_year(d).ok()),
            uri: self.uri,
            kind: ItemKind::Track,
            title: self.name,
            artists: artist_names(self.artists)
        }
    }
}

impl SavedAlbumObject {
    fn into_album(self) -> Result<Album, LibraryError> {
        let date = self.album.release_date.as_deref().unwrap_or_default();
        let release_year = parse_release_year(date)
            .map_err(|e| LibraryError::Parse(format!("{}: {e}", self.album.uri)))?;
        Ok(Album {
            uri: self.album.uri,
            name: self.album.name,
            artists: artist_names(self.album.artists),
            release_year,
            added_at: self.added_at
        })
    }
}

fn saved_albums_page(body: Paging<SavedAlbumObject>) -> Result<SavedAlbumsPage, LibraryError> {
    let items = body.items.into_iter()
        .map(SavedAlbumObject::into_album)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SavedAlbumsPage { items, total: body.total })
}

/// Authenticated session against the Web API
pub struct SpotifyClient {
    http: Client,
    cfg: SpotifyConfig,
    token: Mutex<Option<AccessToken>>
}

impl SpotifyClient {
    /// Builds the http client and exchanges the refresh token; refused
    /// credentials surface as `Auth`
    pub async fn open(http_config: &HttpConfig, cfg: &SpotifyConfig) -> Result<Self, LibraryError> {
        let client = Self {
            http: base_client(http_config)?,
            cfg: cfg.clone(),
            token: Mutex::new(None)
        };
        client.bearer().await?;
        info!(api = %client.cfg.api_base, "spotify.session.open");
        Ok(client)
    }

    pub fn close(self) {
        debug!("spotify.session.close");
    }

    fn endpoint(&self, path: &str) -> Result<Url, LibraryError> {
        self.cfg.api_base.join(path)
            .map_err(|e| LibraryError::Config(format!("bad endpoint {path}: {e}")))
    }

    async fn refresh_token(&self) -> Result<AccessToken, LibraryError> {
        let resp = self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", self.cfg.refresh_token.as_str())])
            .send()
            .await?;

        // the token endpoint answers refused grants with 400
        let resp = match check(resp).await {
            Err(LibraryError::Http { status: 400, message }) => return Err(LibraryError::Auth(message)),
            other => other?
        };
        let body: TokenResponse = resp.json().await?;
        let ttl = body.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in = body.expires_in, "spotify.token.refresh");
        Ok(AccessToken { value: body.access_token, expires_at: Instant::now() + Duration::from_secs(ttl) })
    }

    /// Cached access token, refreshed once expired
    async fn bearer(&self) -> Result<String, LibraryError> {
        let mut token = self.token.lock().await;
        if let Some(t) = token.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(t.value.clone());
        }
        let fresh = self.refresh_token().await?;
        let value = fresh.value.clone();
        *token = Some(fresh);
        Ok(value)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url, query: &[(&str, String)]) ->
        Result<T, LibraryError> {
        let bearer = self.bearer().await?;
        let resp = self.http.get(url).bearer_auth(bearer).query(query).send().await?;
        Ok(check(resp).await?.json::<T>().await?)
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(&self, url: Url, body: &B) ->
        Result<T, LibraryError> {
        let bearer = self.bearer().await?;
        let resp = self.http.post(url).bearer_auth(bearer).json(body).send().await?;
        Ok(check(resp).await?.json::<T>().await?)
    }
}

#[async_trait]
impl CatalogClient for SpotifyClient {
    /// GET /v1/me/albums?limit=&offset=
    async fn list_saved_albums(&self, page: PageRequest) -> Result<SavedAlbumsPage, LibraryError> {
        let url = self.endpoint("me/albums")?;
        let body: Paging<SavedAlbumObject> = self.get_json(url, &[
            ("limit", page.limit.to_string()),
            ("offset", page.offset.to_string())
        ]).await?;
        saved_albums_page(body)
    }

    /// GET /v1/search?type=track|album&q=&limit=
    async fn search(&self, query: &str, kind: ItemKind, limit: u32) ->
        Result<Vec<CatalogItem>, LibraryError> {
        let search_type = if kind.is_release() { "album" } else { "track" };
        let url = self.endpoint("search")?;
        let body: SearchResponse = self.get_json(url, &[
            ("q", query.to_string()),
            ("type", search_type.to_string()),
            ("limit", limit.to_string())
        ]).await?;

        let items = match kind {
            ItemKind::Track => body.tracks
                .map(|p| p.items.into_iter().map(TrackObject::into_item).collect())
                .unwrap_or_default(),
            ItemKind::Single | ItemKind::Album => body.albums
                .map(|p| p.items.into_iter().map(AlbumObject::into_item).collect())
                .unwrap_or_default()
        };
        Ok(items)
    }

    /// GET /v1/tracks/{id} or /v1/albums/{id}
    async fn resolve_uri(&self, uri: &str) -> Result<CatalogItem, LibraryError> {
        let Some((kind, id)) = parse_spotify_uri(uri) else {
            return Err(LibraryError::NotFound(format!("malformed uri {uri}")));
        };
        match kind {
            "track" => {
                let track: TrackObject = self.get_json(self.endpoint(&format!("tracks/{id}"))?, &[]).await?;
                Ok(track.into_item())
            },
            "album" => {
                let album: AlbumObject = self.get_json(self.endpoint(&format!("albums/{id}"))?, &[]).await?;
                Ok(album.into_item())
            },
            other => Err(LibraryError::NotFound(format!("unsupported uri kind {other}")))
        }
    }

    /// GET /v1/albums/{id}/tracks, all pages
    async fn album_tracks(&self, album_uri: &str) -> Result<Vec<CatalogItem>, LibraryError> {
        let Some(("album", id)) = parse_spotify_uri(album_uri) else {
            return Err(LibraryError::NotFound(format!("not an album uri {album_uri}")));
        };
        let url = self.endpoint(&format!("albums/{id}/tracks"))?;
        let mut tracks = Vec::new();
        let mut offset = 0_u32;
        loop {
            let page: Paging<TrackObject> = self.get_json(url.clone(), &[
                ("limit", ALBUM_TRACKS_PAGE.to_string()),
                ("offset", offset.to_string())
            ]).await?;
            let more = page.next.is_some() && !page.items.is_empty();
            offset += page.items.len() as u32;
            tracks.extend(page.items.into_iter().map(TrackObject::into_item));
            if !more {
                break;
            }
        }
        Ok(tracks)
    }

    /// GET /v1/me then POST /v1/users/{user}/playlists
    async fn create_playlist(&self, name: &str, description: &str) -> Result<String, LibraryError> {
        let user: UserObject = self.get_json(self.endpoint("me")?, &[]).await?;
        let url = self.endpoint(&format!("users/{}/playlists", user.id))?;
        let playlist: PlaylistObject = self.post_json(url, &NewPlaylist {
            name,
            description,
            public: false
        }).await?;
        Ok(playlist.id)
    }

    /// POST /v1/playlists/{id}/tracks
    async fn add_items_to_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<(), LibraryError> {
        let url = self.endpoint(&format!("playlists/{playlist_id}/tracks"))?;
        for batch in uris.chunks(ADD_ITEMS_BATCH) {
            // snapshot id response is not needed
            let _: serde_json::Value = self.post_json(url.clone(), &AddItems { uris: batch }).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn live() -> bool {
        std::env::var("LIVE_HTTP").ok().as_deref() == Some("1")
    }

    #[test]
    fn status_mapping() {
        let s = |code| StatusCode::from_u16(code).unwrap();
        assert!(matches!(classify_status(s(401), None, String::new()), LibraryError::Auth(_)));
        assert!(matches!(classify_status(s(403), None, String::new()), LibraryError::Auth(_)));
        assert!(matches!(
            classify_status(s(429), Some(Duration::from_secs(3)), String::new()),
            LibraryError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
        assert!(matches!(classify_status(s(502), None, String::new()), LibraryError::Transport(_)));
        assert!(matches!(classify_status(s(404), None, String::new()), LibraryError::NotFound(_)));
        assert!(matches!(
            classify_status(s(400), None, "bad".into()),
            LibraryError::Http { status: 400, .. }
        ));
    }

    #[test]
    fn uri_parsing() {
        assert_eq!(parse_spotify_uri("spotify:track:6GtOsEzNUhJghrIf6UTbRV"), Some(("track", "6GtOsEzNUhJghrIf6UTbRV")));
        assert_eq!(parse_spotify_uri("spotify:album:abc"), Some(("album", "abc")));
        assert_eq!(parse_spotify_uri("spotify:track:"), None);
        assert_eq!(parse_spotify_uri("spotify:track:../me"), None);
        assert_eq!(parse_spotify_uri("spotify:user:x:playlist:y"), None);
        assert_eq!(parse_spotify_uri("track:abc"), None);
    }

    #[test]
    fn saved_album_page_decodes() {
        let raw = r#"{
            "items": [
                { "added_at": "2024-05-01T12:00:00Z",
                  "album": { "uri": "spotify:album:1", "name": "Blue",
                             "artists": [{ "name": "Joni Mitchell" }],
                             "album_type": "album", "release_date": "1971-06-22" } },
                { "added_at": "2024-04-01T12:00:00Z",
                  "album": { "uri": "spotify:album:2", "name": "Hejira",
                             "artists": [{ "name": "Joni Mitchell" }],
                             "release_date": "1976" } }
            ],
            "total": 120, "next": "https://api.spotify.com/v1/me/albums?offset=50&limit=50",
            "offset": 0, "limit": 50
        }"#;
        let body: Paging<SavedAlbumObject> = serde_json::from_str(raw).unwrap();
        let page = saved_albums_page(body).unwrap();

        assert_eq!(page.total, 120);
        assert_eq!(page.items[0].release_year, 1971);
        assert_eq!(page.items[1].release_year, 1976);
        assert_eq!(page.items[0].artists, vec!["Joni Mitchell"]);
    }

    #[test]
    fn bad_release_date_fails_page() {
        let raw = r#"{ "items": [ { "added_at": "2024-05-01T12:00:00Z",
            "album": { "uri": "spotify:album:1", "name": "X", "release_date": "" } } ],
            "total": 1, "next": null }"#;
        let body: Paging<SavedAlbumObject> = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            saved_albums_page(body),
            Err(LibraryError::Parse(_))
        ));
    }

    #[test]
    fn search_results_classify_releases() {
        let raw = r#"{ "albums": { "items": [
            { "uri": "spotify:album:s", "name": "Creep", "album_type": "single",
              "artists": [{ "name": "Radiohead" }], "release_date": "1992-09-21" },
            { "uri": "spotify:album:a", "name": "Pablo Honey", "album_type": "album",
              "artists": [{ "name": "Radiohead" }], "release_date": "1993-02-22" }
        ], "total": 2 } }"#;
        let body: SearchResponse = serde_json::from_str(raw).unwrap();
        let items: Vec<CatalogItem> = body.albums.unwrap().items.into_iter().map(AlbumObject::into_item).collect();
        assert_eq!(items[0].kind, ItemKind::Single);
        assert_eq!(items[1].kind, ItemKind::Album);
        assert_eq!(items[1].release_year, Some(1993));
    }

    #[tokio::test]
    #[allow(dead_code)]
    async fn spotify_client_testbench() -> Result<(), LibraryError> {
        dotenvy::dotenv().ok();
        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = config::load_config()?;
        let spotify = SpotifyClient::open(&cfgs.http, &config::load_spotify_config()?).await?;

        let page = spotify.list_saved_albums(PageRequest { offset: 0, limit: 5 }).await?;
        println!("saved albums: {} total, first {:?}", page.total, page.items.first());

        // Breathe Deeper - Tame Impala, Lil Yachty
        let track = spotify.resolve_uri("spotify:track:6GtOsEzNUhJghrIf6UTbRV").await?;
        assert_eq!(track.kind, ItemKind::Track);

        let found = spotify.search("Currents Tame Impala", ItemKind::Album, 5).await?;
        assert!(!found.is_empty());

        spotify.close();
        Ok(())
    }
}
