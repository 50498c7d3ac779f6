//!
//! src/resolver.rs  Oct 6th, 2026
//!
//! Turns free-text and prefixed references (`track:X by Y`, `album:X`,
//! raw uris, bare titles) into catalog identifiers via the local cache,
//! remote search and fuzzy matching
//!

use std::collections::{HashMap, HashSet};

use strsim::normalized_levenshtein;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};
use url::Url;

use crate::cache::CacheFile;
use crate::catalog::CatalogClient;
use crate::config::{MatchingConfig, RetryConfig};
use crate::errors::LibraryError;
use crate::fetcher::with_retry;
use crate::types::{Album, CatalogItem, ItemKind, YearFilter};

const ARTIST_SEPARATOR: &str = " by ";
const URI_SCHEME: &str = "spotify:";
const OPEN_HOST: &str = "open.spotify.com";
const WORD_MATCH_CUTOFF: f64 = 0.6;
const VERSION_MARKERS: [&str; 8] =
    ["remaster", "mono", "stereo", "version", "edit", "deluxe", "anniversary", "expanded"];

/// Lowercase, strip diacritics and punctuation, collapse whitespace
pub fn normalize(s: &str) -> String {
    let folded: String = s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fraction of query words with a close word in `target`
fn word_similarity(query: &str, target: &str) -> f64 {
    let target_words: Vec<&str> = target.split_whitespace().collect();
    let query_words: Vec<&str> = query.split_whitespace().collect();
    if query_words.is_empty() || target_words.is_empty() {
        return 0.0;
    }
    let matched = query_words.iter()
        .filter(|q| target_words.iter().any(|t| normalized_levenshtein(q, t) >= WORD_MATCH_CUTOFF))
        .count();
    matched as f64 / query_words.len() as f64
}

/// `2 * lcs / (|a| + |b|)` over chars; an added suffix costs only its length
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut row = vec![0_usize; b.len() + 1];
    for &ca in &a {
        let mut diag = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb { diag + 1 } else { above.max(row[j]) };
            diag = above;
        }
    }
    2.0 * row[b.len()] as f64 / (a.len() + b.len()) as f64
}

/// Blend of character-level and word-level similarity over normalized text
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    0.6 * sequence_ratio(a, b) + 0.4 * word_similarity(a, b)
}

/// Drops trailing ` - Remastered 2011`, `(Mono Version)`, `[Deluxe Edition]`
/// style tags; other suffixes stay
pub fn strip_version_suffix(title: &str) -> &str {
    let mut title = title.trim();
    if let Some(at) = title.rfind(" - ") {
        if is_version_tag(&title[at + 3..]) {
            title = title[..at].trim_end();
        }
    }
    while let Some(close) = title.chars().last().filter(|c| *c == ')' || *c == ']') {
        let open = if close == ')' { '(' } else { '[' };
        let Some(at) = title.rfind(open) else { break };
        if at == 0 || !is_version_tag(&title[at + 1..title.len() - 1]) {
            break;
        }
        title = title[..at].trim_end();
    }
    title
}

fn is_version_tag(tag: &str) -> bool {
    normalize(tag).split_whitespace()
        .any(|w| VERSION_MARKERS.iter().any(|m| w.starts_with(m)))
}

/// Artist name for comparison: `&` reads as `and`, a leading `the` is dropped
pub fn artist_key(artist: &str) -> String {
    let key = normalize(&artist.replace('&', " and "));
    match key.strip_prefix("the ") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => key
    }
}

/// Same artist when the keys agree, one key's words contain the other's,
/// or the spellings are close
fn artists_agree(hint: &str, credited: &str, similarity: f64) -> bool {
    if hint.is_empty() || credited.is_empty() {
        return false;
    }
    if hint == credited {
        return true;
    }
    let hint_words: HashSet<&str> = hint.split_whitespace().collect();
    let credited_words: HashSet<&str> = credited.split_whitespace().collect();
    hint_words.is_subset(&credited_words)
        || credited_words.is_subset(&hint_words)
        || normalized_levenshtein(hint, credited) >= similarity
}

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub raw: String,
    pub kind_hint: Option<ItemKind>,
    pub query: String,
    pub artist_hint: Option<String>,
    pub uri: Option<String>
}

impl Reference {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        let mut reference = Reference {
            raw: raw.to_string(),
            kind_hint: None,
            query: String::new(),
            artist_hint: None,
            uri: None
        };

        if let Some(uri) = literal_uri(text) {
            reference.query = uri.clone();
            reference.uri = Some(uri);
            return reference;
        }

        let body = match text.split_once(':') {
            Some((prefix, rest)) => match ItemKind::parse(&prefix.trim().to_lowercase()) {
                Some(kind) => {
                    reference.kind_hint = Some(kind);
                    rest.trim()
                },
                None => text
            },
            None => text
        };

        match body.rfind(ARTIST_SEPARATOR) {
            Some(at) => {
                let (title, artist) = (body[..at].trim(), body[at + ARTIST_SEPARATOR.len()..].trim());
                if title.is_empty() || artist.is_empty() {
                    reference.query = body.to_string();
                } else {
                    reference.query = title.to_string();
                    reference.artist_hint = Some(artist.to_string());
                }
            },
            None => reference.query = body.to_string()
        }
        reference
    }

    /// Text sent to the catalog search
    pub fn search_text(&self) -> String {
        match &self.artist_hint {
            Some(artist) => format!("{} {}", self.query, artist),
            None => self.query.clone()
        }
    }
}

/// `spotify:<kind>:<id>` as-is, or an open.spotify.com link rewritten to one
fn literal_uri(text: &str) -> Option<String> {
    if text.starts_with(URI_SCHEME) {
        return Some(text.to_string());
    }
    let url = Url::parse(text).ok()?;
    if !url.host_str()?.eq_ignore_ascii_case(OPEN_HOST) {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty() && !s.starts_with("intl-"));
    let kind = segments.next()?;
    let id = segments.next()?;
    Some(format!("{URI_SCHEME}{kind}:{id}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Uri,
    Library,
    Search
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub reference: String,
    pub uri: String,
    pub kind: ItemKind,
    pub matched_title: String,
    pub artists: Vec<String>,
    pub confidence: f64,
    pub source: MatchSource,
    pub is_duplicate: bool
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionResult {
    Resolved(Resolved),
    Unresolved { reference: String, reason: String }
}

impl ResolutionResult {
    pub fn reference(&self) -> &str {
        match self {
            ResolutionResult::Resolved(r) => &r.reference,
            ResolutionResult::Unresolved { reference, .. } => reference
        }
    }

    pub fn resolved(&self) -> Option<&Resolved> {
        match self {
            ResolutionResult::Resolved(r) => Some(r),
            ResolutionResult::Unresolved { .. } => None
        }
    }

    fn unresolved(reference: &Reference, reason: impl Into<String>) -> Self {
        ResolutionResult::Unresolved { reference: reference.raw.clone(), reason: reason.into() }
    }
}

/// Aggregate view of a batch, for reporting skipped references
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionReport {
    pub resolved: usize,
    pub duplicates: usize,
    pub unresolved: Vec<(String, String)>
}

impl ResolutionReport {
    pub fn from_results(results: &[ResolutionResult]) -> Self {
        let mut report = ResolutionReport::default();
        for result in results {
            match result {
                ResolutionResult::Resolved(r) if r.is_duplicate => report.duplicates += 1,
                ResolutionResult::Resolved(_) => report.resolved += 1,
                ResolutionResult::Unresolved { reference, reason } => {
                    report.unresolved.push((reference.clone(), reason.clone()));
                }
            }
        }
        report
    }
}

/// Library albums keyed by normalized (title, artist), one entry per credited artist
struct LocalIndex<'c> {
    by_title_artist: HashMap<(String, String), &'c Album>
}

impl<'c> LocalIndex<'c> {
    fn build(cache: &'c CacheFile) -> Self {
        let mut by_title_artist = HashMap::new();
        for album in cache.iterate(YearFilter::All) {
            let title = normalize(&album.name);
            for artist in &album.artists {
                by_title_artist.entry((title.clone(), normalize(artist))).or_insert(album);
            }
        }
        Self { by_title_artist }
    }

    fn lookup(&self, title: &str, artist: &str) -> Option<&'c Album> {
        self.by_title_artist.get(&(normalize(title), normalize(artist))).copied()
    }
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    index: usize,
    score: f64,
    rank: u8
}

impl Scored {
    /// Higher score, then kind preference, then search position
    fn beats(&self, other: &Scored) -> bool {
        if self.score != other.score {
            return self.score > other.score;
        }
        if self.rank != other.rank {
            return self.rank < other.rank;
        }
        self.index < other.index
    }
}

pub struct Resolver<'a> {
    client: &'a dyn CatalogClient,
    matching: MatchingConfig,
    retry: RetryConfig,
    shutdown: CancellationToken
}

impl<'a> Resolver<'a> {
    pub fn new(client: &'a dyn CatalogClient, matching: MatchingConfig) -> Self {
        Self {
            client,
            matching,
            retry: RetryConfig::default(),
            shutdown: CancellationToken::new()
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// One result per reference, in input order. Later references that
    /// land on an already-resolved uri are flagged `is_duplicate`.
    pub async fn resolve<S: AsRef<str>>(&self, references: &[S], cache: Option<&CacheFile>) ->
        Result<Vec<ResolutionResult>, LibraryError> {
        let index = cache.map(LocalIndex::build);
        let mut results = Vec::with_capacity(references.len());

        for raw in references {
            if self.shutdown.is_cancelled() {
                return Err(LibraryError::Cancelled);
            }
            let reference = Reference::parse(raw.as_ref());
            let result = self.resolve_one(&reference, index.as_ref()).await?;
            match &result {
                ResolutionResult::Resolved(r) => debug!(
                    reference = %r.reference, uri = %r.uri, confidence = r.confidence, "resolve.hit"
                ),
                ResolutionResult::Unresolved { reference, reason } => info!(
                    reference = %reference, reason = %reason, "resolve.miss"
                )
            }
            results.push(result);
        }

        let mut seen = HashSet::new();
        for result in results.iter_mut() {
            if let ResolutionResult::Resolved(r) = result {
                r.is_duplicate = !seen.insert(r.uri.clone());
            }
        }
        Ok(results)
    }

    async fn resolve_one(&self, reference: &Reference, index: Option<&LocalIndex<'_>>) ->
        Result<ResolutionResult, LibraryError> {
        if let Some(uri) = &reference.uri {
            return self.resolve_literal(reference, uri).await;
        }
        if reference.query.is_empty() {
            return Ok(ResolutionResult::unresolved(reference, "empty reference"));
        }

        if let (Some(index), Some(artist)) = (index, &reference.artist_hint) {
            let album_allowed = matches!(reference.kind_hint, None | Some(ItemKind::Album));
            if album_allowed {
                if let Some(album) = index.lookup(&reference.query, artist) {
                    return Ok(ResolutionResult::Resolved(Resolved {
                        reference: reference.raw.clone(),
                        uri: album.uri.clone(),
                        kind: ItemKind::Album,
                        matched_title: album.name.clone(),
                        artists: album.artists.clone(),
                        confidence: 1.0,
                        source: MatchSource::Library,
                        is_duplicate: false
                    }));
                }
            }
        }

        let stages: Vec<ItemKind> = match reference.kind_hint {
            Some(kind) => vec![kind],
            None => ItemKind::AUTO_ORDER.to_vec()
        };
        let text = reference.search_text();
        let mut last_error = None;

        for stage in stages {
            let found = with_retry(&self.retry, "resolve.search", &self.shutdown, || {
                self.client.search(&text, stage, self.matching.search_limit)
            }).await;
            let candidates = match found {
                Ok(c) => c,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(reference = %reference.raw, kind = %stage, error = %e, "resolve.search.error");
                    last_error = Some(e);
                    continue;
                }
            };

            // auto mode takes each kind in turn; an explicit hint accepts any release for a release
            let eligible: Vec<CatalogItem> = candidates.into_iter()
                .filter(|c| match reference.kind_hint {
                    Some(hint) => hint.compatible(c.kind),
                    None => c.kind == stage
                })
                .collect();

            if let Some(best) = self.select(reference, &eligible) {
                let item = &eligible[best.index];
                return Ok(ResolutionResult::Resolved(Resolved {
                    reference: reference.raw.clone(),
                    uri: item.uri.clone(),
                    kind: item.kind,
                    matched_title: item.title.clone(),
                    artists: item.artists.clone(),
                    confidence: best.score,
                    source: MatchSource::Search,
                    is_duplicate: false
                }));
            }
        }

        let reason = match last_error {
            Some(e) => format!("search failed: {e}"),
            None => "no confident match".to_string()
        };
        Ok(ResolutionResult::unresolved(reference, reason))
    }

    async fn resolve_literal(&self, reference: &Reference, uri: &str) ->
        Result<ResolutionResult, LibraryError> {
        let found = with_retry(&self.retry, "resolve.uri", &self.shutdown, || {
            self.client.resolve_uri(uri)
        }).await;
        match found {
            Ok(item) => Ok(ResolutionResult::Resolved(Resolved {
                reference: reference.raw.clone(),
                uri: item.uri,
                kind: item.kind,
                matched_title: item.title,
                artists: item.artists,
                confidence: 1.0,
                source: MatchSource::Uri,
                is_duplicate: false
            })),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(ResolutionResult::unresolved(
                reference, format!("invalid or inaccessible uri: {e}")
            ))
        }
    }

    /// Similarity of a candidate to a reference in [0, 1]
    pub fn match_score(&self, reference: &Reference, candidate: &CatalogItem) -> f64 {
        let query = normalize(strip_version_suffix(&reference.query));
        let title = normalize(strip_version_suffix(&candidate.title));
        let primary = candidate.primary_artist().map(artist_key).unwrap_or_default();
        let target = format!("{title} {primary}").trim().to_string();

        let score = match &reference.artist_hint {
            Some(artist) => {
                let artist = artist_key(artist);
                let wanted = format!("{query} {artist}").trim().to_string();
                let score = text_similarity(&wanted, &target);
                let credited = candidate.artists.iter()
                    .any(|a| artists_agree(&artist, &artist_key(a), self.matching.artist_similarity));
                if credited { score } else { score.min(self.matching.artist_mismatch_cap) }
            },
            None => text_similarity(&query, &title).max(text_similarity(&query, &target))
        };
        score.clamp(0.0, 1.0)
    }

    fn select(&self, reference: &Reference, candidates: &[CatalogItem]) -> Option<Scored> {
        let mut best: Option<Scored> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let score = self.match_score(reference, candidate);
            if score < self.matching.accept_threshold {
                continue;
            }
            let rank = match reference.kind_hint {
                Some(hint) if hint == candidate.kind => 0,
                Some(_) => 1 + candidate.kind.priority(),
                None => candidate.kind.priority()
            };
            let scored = Scored { index, score, rank };
            if best.as_ref().is_none_or(|b| scored.beats(b)) {
                best = Some(scored);
            }
        }
        best
    }
}
