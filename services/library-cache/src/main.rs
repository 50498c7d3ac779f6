//!
//! src/main.rs  Oct 10th, 2026
//!
//! `spt` command line: wires config, logging, the Spotify session and the
//! library cache into the four user commands
//!

use std::{fs, path::{Path, PathBuf}, sync::Arc};

use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::{rngs::SmallRng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use library_cache::{
    cache::{format_age_message, CacheFile, LibraryCache},
    catalog::CatalogClient,
    config::{self, AppConfig},
    errors::LibraryError,
    fetcher::Fetcher,
    logging,
    playlist,
    resolver::{ResolutionReport, Resolver},
    sampler,
    spotify::SpotifyClient,
    types::YearFilter
};

#[derive(Parser, Debug)]
#[command(
    name = "spt",
    version,
    about = "Offline-first tools for a Spotify saved-album library",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick random albums from the library
    RandomAlbum {
        /// Release year `Y` or range `Y1-Y2`
        #[arg(short, long, default_value = "all")]
        year: YearFilter,

        /// Number of albums to draw
        #[arg(short, long, default_value_t = 1)]
        count: usize
    },

    /// Re-fetch every saved album and replace the cache
    RefreshCache {
        /// Concurrent page requests
        #[arg(long, env = "SPT_MAX_WORKERS")]
        max_workers: Option<usize>
    },

    /// Album counts per year, or the albums of a year filter
    ListAlbums {
        #[arg(short, long)]
        year: Option<YearFilter>
    },

    /// Resolve references and build a private playlist
    CreatePlaylist {
        /// File of references, one per line; `#` starts a comment
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Playlist name, defaults to the current date and time
        #[arg(short, long)]
        name: Option<String>,

        /// Resolve and print uris without creating the playlist
        #[arg(long)]
        dry_run: bool,

        /// Also write the resolved uris to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// References such as `track:Song by Artist`, `album:Title` or uris
        refs: Vec<String>
    }
}

#[tokio::main]
async fn main() -> Result<(), LibraryError> {
    let args = Args::parse();
    let cfgs = config::load_config()?;
    let _guard = logging::init_logging(&cfgs.logging)?;

    debug!(
        service = "spt",
        version = %env!("CARGO_PKG_VERSION"),
        cache = %cfgs.cache.path.display(),
        "starting"
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let cache = LibraryCache::open(&cfgs.cache.path);
    let result = run(args.command, &cfgs, &cache, shutdown).await;
    cache.close();
    result
}

async fn run(
    command: Command,
    cfgs: &AppConfig,
    cache: &LibraryCache,
    shutdown: CancellationToken
) -> Result<(), LibraryError> {
    match command {
        Command::RandomAlbum { year, count } => random_album(cfgs, cache, shutdown, year, count).await,
        Command::RefreshCache { max_workers } => {
            let mut cfgs = cfgs.clone();
            if let Some(n) = max_workers {
                cfgs.fetch.concurrency = n.max(1);
            }
            let file = with_session(&cfgs, |client| refresh(&cfgs, cache, client, shutdown)).await?;
            println!(
                "Cached {} albums across {} release years.",
                file.total_albums(),
                file.partitions().len()
            );
            Ok(())
        },
        Command::ListAlbums { year } => list_albums(cfgs, cache, year),
        Command::CreatePlaylist { file, name, dry_run, output, refs } => {
            let mut references = match file {
                Some(path) => read_references(&path)?,
                None => Vec::new()
            };
            references.extend(refs);
            if references.is_empty() {
                return Err(LibraryError::Config("no references given".into()));
            }
            let request = PlaylistRequest { references, name, dry_run, output };
            with_session(cfgs, |client| create_playlist(cfgs, cache, client, shutdown, request)).await
        }
    }
}

/// Opens a Spotify session, runs `f` and closes the session on every path
async fn with_session<T, F, Fut>(cfgs: &AppConfig, f: F) -> Result<T, LibraryError>
where
    F: FnOnce(Arc<SpotifyClient>) -> Fut,
    Fut: Future<Output = Result<T, LibraryError>>,
{
    let spotify = config::load_spotify_config()?;
    let client = Arc::new(SpotifyClient::open(&cfgs.http, &spotify).await?);
    let result = f(client.clone()).await;
    match Arc::try_unwrap(client) {
        Ok(client) => client.close(),
        // aborted page workers may still hold a handle; dropping it ends the session
        Err(shared) => warn!(handles = Arc::strong_count(&shared), "spotify.session.close.skipped")
    }
    result
}

async fn refresh(
    cfgs: &AppConfig,
    cache: &LibraryCache,
    client: Arc<SpotifyClient>,
    shutdown: CancellationToken
) -> Result<CacheFile, LibraryError> {
    let fetcher = Fetcher::new(cfgs.fetch.clone()).with_shutdown(shutdown);
    cache.refresh(&fetcher, client).await
}

/// Stale caches are still served, with a recommendation to refresh
fn report_age(cfgs: &AppConfig, file: &CacheFile) {
    let age = file.age_at(Utc::now());
    info!("{}", format_age_message(age));
    if file.is_stale(cfgs.cache.max_age) {
        warn!(age_hours = age.as_secs() / 3600, "cache.stale: run `spt refresh-cache` to update");
    }
}

async fn random_album(
    cfgs: &AppConfig,
    cache: &LibraryCache,
    shutdown: CancellationToken,
    year: YearFilter,
    count: usize
) -> Result<(), LibraryError> {
    let file = match cache.load() {
        Ok(file) => {
            report_age(cfgs, &file);
            file
        },
        Err(e @ (LibraryError::CacheMissing(_) | LibraryError::CacheCorrupt { .. })) => {
            info!(reason = %e, "cache.rebuild");
            with_session(cfgs, |client| refresh(cfgs, cache, client, shutdown)).await?
        },
        Err(e) => return Err(e)
    };

    let mut rng = SmallRng::from_entropy();
    let picked = match sampler::sample(&file, year, count, &mut rng) {
        Err(LibraryError::EmptySelection) => {
            println!("No albums found for {year}.");
            return Ok(());
        },
        other => other?
    };
    for album in picked {
        println!("{} by {} ({})", album.name, album.format_artists(), album.release_year);
        println!("  {}", album.uri);
    }
    Ok(())
}

fn list_albums(cfgs: &AppConfig, cache: &LibraryCache, year: Option<YearFilter>) -> Result<(), LibraryError> {
    let file = cache.load()?;
    report_age(cfgs, &file);

    match year {
        None => {
            for (year, count) in file.album_counts() {
                println!("{year}: {count}");
            }
            println!("Total: {} albums", file.total_albums());
        },
        Some(filter) => {
            let mut shown = 0_usize;
            for album in file.iterate(filter) {
                println!("{}  {} by {}", album.release_year, album.name, album.format_artists());
                shown += 1;
            }
            if shown == 0 {
                println!("No albums found for {filter}.");
            }
        }
    }
    Ok(())
}

fn read_references(path: &Path) -> Result<Vec<String>, LibraryError> {
    let text = fs::read_to_string(path)?;
    Ok(text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

struct PlaylistRequest {
    references: Vec<String>,
    name: Option<String>,
    dry_run: bool,
    output: Option<PathBuf>
}

async fn create_playlist(
    cfgs: &AppConfig,
    cache: &LibraryCache,
    client: Arc<SpotifyClient>,
    shutdown: CancellationToken,
    request: PlaylistRequest
) -> Result<(), LibraryError> {
    // the local fast path is optional; any load failure falls back to search
    let local = match cache.load() {
        Ok(file) => Some(file),
        Err(e) => {
            debug!(reason = %e, "resolve.cache.unavailable");
            None
        }
    };

    let resolver = Resolver::new(client.as_ref(), cfgs.matching)
        .with_retry(cfgs.fetch.retry.clone())
        .with_shutdown(shutdown);
    let results = resolver.resolve(&request.references, local.as_ref()).await?;

    let report = ResolutionReport::from_results(&results);
    for (reference, reason) in &report.unresolved {
        warn!(reference = %reference, reason = %reason, "resolve.skipped");
    }
    eprintln!(
        "Resolved {} of {} references ({} duplicates, {} skipped).",
        report.resolved,
        results.len(),
        report.duplicates,
        report.unresolved.len()
    );

    let catalog: &dyn CatalogClient = client.as_ref();
    let uris = playlist::expand_to_tracks(catalog, &results).await?;
    if let Some(path) = &request.output {
        playlist::write_uris(path, &uris)?;
    }

    if request.dry_run {
        for uri in &uris {
            println!("{uri}");
        }
        return Ok(());
    }
    if uris.is_empty() {
        println!("Nothing to add; no playlist created.");
        return Ok(());
    }

    let name = request.name.unwrap_or_else(|| playlist::default_playlist_name(Utc::now()));
    let id = playlist::create_playlist(catalog, &name, &uris).await?;
    println!("Created playlist \"{name}\" ({id}) with {} tracks.", uris.len());
    Ok(())
}
