//!
//! src/config.rs  Oct 2nd, 2026
//!
//! Loads configuration from the environment at program start
//!

use std::{path::PathBuf, time};

use url::Url;

use crate::errors::LibraryError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_RETRIES: usize = 3;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRY_JITTER: bool = true;

pub const FETCH_CONCURRENCY: usize = 5;
pub const FETCH_PAGE_SIZE: u32 = 50;      // service maximum for saved albums

pub const CACHE_MAX_AGE_HOURS: u64 = 24 * 7;
pub const CACHE_FILE_NAME: &str = "albums.json";
pub const CACHE_DIR_NAME: &str = "spotify-tools";

pub const MATCH_ACCEPT_THRESHOLD: f64 = 0.75;
pub const MATCH_ARTIST_MISMATCH_CAP: f64 = 0.5;
pub const MATCH_ARTIST_SIMILARITY: f64 = 0.8;
pub const MATCH_SEARCH_LIMIT: u32 = 10;

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, LibraryError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LibraryError::Config(format!("{s} was not set"))),
    }
}

/// Parses an optional numeric variable, falling back to `default`
fn env_or<T: std::str::FromStr>(s: &str, default: T) -> T {
    std::env::var(s)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// Credentials and endpoints for the Spotify Web API
#[derive(Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_url: Url,
    pub api_base: Url,
}

// secrets stay out of logs
impl std::fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url.as_str())
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

/// Read separately from `load_config` so offline commands run without credentials
pub fn load_spotify_config() -> Result<SpotifyConfig, LibraryError> {
    dotenvy::dotenv().ok();

    let client_id     = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;
    let refresh_token = env_check("SPOTIFY_REFRESH_TOKEN")?;

    // form urls
    let token_url = std::env::var("SPOTIFY_TOKEN_URL")
        .unwrap_or_else(|_| "https://accounts.spotify.com/api/token".to_string());

    let api_base  = std::env::var("SPOTIFY_API_BASE")
        .unwrap_or_else(|_| "https://api.spotify.com/v1/".to_string());

    let token_url = Url::parse(&token_url)
        .map_err(|e| LibraryError::Config(format!("SPOTIFY_TOKEN_URL invalid {e}")))?;

    let mut api_base = Url::parse(&api_base)
        .map_err(|e| LibraryError::Config(format!("SPOTIFY_API_BASE invalid {e}")))?;

    // ensure valid https and hostname for both urls
    ensure_https(&token_url).map_err(LibraryError::Config)?;
    ensure_https(&api_base).map_err(LibraryError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(LibraryError::Config)?;
    ensure_host(&api_base, "api.spotify.com").map_err(LibraryError::Config)?;
    ensure_trailing_slash(&mut api_base);

    Ok( SpotifyConfig { client_id, client_secret, refresh_token, token_url, api_base })
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_backoff: time::Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: RETRY_MAX_RETRIES,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            jitter: RETRY_JITTER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
        }
    }
}

///
/// Worker pool bounds for the saved-album fan-out
///
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub concurrency: usize,    // in-flight page requests, not queue depth
    pub page_size: u32,
    pub retry: RetryConfig
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: FETCH_CONCURRENCY,
            page_size: FETCH_PAGE_SIZE,
            retry: RetryConfig::default()
        }
    }
}

fn build_fetch() -> FetchConfig {
    let defaults = FetchConfig::default();
    let retry = RetryConfig {
        max_retries: env_or("SPT_MAX_RETRIES", defaults.retry.max_retries),
        ..defaults.retry
    };
    FetchConfig {
        concurrency: env_or("SPT_MAX_WORKERS", defaults.concurrency).max(1),
        page_size: defaults.page_size,
        retry
    }
}

///
/// Location and staleness policy of the on-disk album cache
///
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub max_age: time::Duration
}

pub fn default_cache_path() -> Result<PathBuf, LibraryError> {
    let base = dirs::cache_dir()
        .ok_or_else(|| LibraryError::Config("unable to determine cache directory".into()))?;
    Ok(base.join(CACHE_DIR_NAME).join(CACHE_FILE_NAME))
}

fn build_cache() -> Result<CacheConfig, LibraryError> {
    let path = match std::env::var("SPT_CACHE_PATH") {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => default_cache_path()?
    };
    let hours = env_or("SPT_CACHE_MAX_AGE_HOURS", CACHE_MAX_AGE_HOURS);
    Ok( CacheConfig { path, max_age: time::Duration::from_secs(hours * 3600) } )
}

///
/// Thresholds for accepting a fuzzy match between a reference and a
/// catalog item
///
#[derive(Debug, Clone, Copy)]
pub struct MatchingConfig {
    pub accept_threshold: f64,     // 0..1; candidates below are rejected
    pub artist_mismatch_cap: f64,  // ceiling when the artist hint matches no artist
    pub artist_similarity: f64,    // similarity at which two artist names agree
    pub search_limit: u32,         // candidates requested per search
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            accept_threshold: MATCH_ACCEPT_THRESHOLD,
            artist_mismatch_cap: MATCH_ARTIST_MISMATCH_CAP,
            artist_similarity: MATCH_ARTIST_SIMILARITY,
            search_limit: MATCH_SEARCH_LIMIT,
        }
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "warn,library_cache=info,spt=info".to_string(),
            format: LogFormat::Pretty,
            with_ansi: true,
            include_file_line: false,
            include_target: false,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let mut logging = LoggingConfig::default();
    if let Ok(format) = std::env::var("SPT_LOG_FORMAT") {
        if format.eq_ignore_ascii_case("json") {
            logging.format = LogFormat::Json;
            logging.with_ansi = false;
            logging.include_file_line = true;
            logging.include_target = true;
        }
    }
    logging
}

///
/// AppConfig which holds everything the commands need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub matching: MatchingConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, LibraryError> {
    dotenvy::dotenv().ok();

    let http     = HttpConfig::default();
    let fetch    = build_fetch();
    let cache    = build_cache()?;
    let matching = MatchingConfig::default();
    let logging  = build_logging();

    Ok( AppConfig { http, fetch, cache, matching, logging } )
}
