//!
//! src/types.rs  Oct 2nd, 2026
//!
//! Strongly typed records shared by the fetcher, cache, resolver
//! and sampler
//!

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LibraryError;

/// A saved album as it lives in the cache. `release_year` is the partition
/// key on disk and is not repeated inside each record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>,
    #[serde(skip)]
    pub release_year: i32,
    pub added_at: DateTime<Utc>
}

impl Album {
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(String::as_str)
    }

    pub fn format_artists(&self) -> String {
        self.artists.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Track,
    Single,
    Album
}

impl ItemKind {
    /// Precedence used when a reference carries no kind: track beats
    /// single beats album
    pub const AUTO_ORDER: [ItemKind; 3] = [ItemKind::Track, ItemKind::Single, ItemKind::Album];

    pub fn priority(self) -> u8 {
        match self {
            ItemKind::Track  => 0,
            ItemKind::Single => 1,
            ItemKind::Album  => 2
        }
    }

    /// Singles and albums are both releases and share a search type
    pub fn is_release(self) -> bool {
        matches!(self, ItemKind::Single | ItemKind::Album)
    }

    pub fn compatible(self, other: ItemKind) -> bool {
        self == other || (self.is_release() && other.is_release())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Track  => "track",
            ItemKind::Single => "single",
            ItemKind::Album  => "album"
        }
    }

    pub fn parse(s: &str) -> Option<ItemKind> {
        match s {
            "track"  => Some(ItemKind::Track),
            "single" => Some(ItemKind::Single),
            "album"  => Some(ItemKind::Album),
            _ => None
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A search or lookup result. Transient, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub uri: String,
    pub kind: ItemKind,
    pub title: String,
    pub artists: Vec<String>,
    pub release_year: Option<i32>
}

impl CatalogItem {
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(String::as_str)
    }
}

/// Takes the year component of `YYYY`, `YYYY-MM` or `YYYY-MM-DD`
pub fn parse_release_year(date: &str) -> Result<i32, LibraryError> {
    let year = date.trim().split('-').next().unwrap_or_default();
    year.parse::<i32>()
        .map_err(|_| LibraryError::Parse(format!("invalid release date {date:?}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YearFilter {
    #[default]
    All,
    Year(i32),
    Range(i32, i32)
}

impl YearFilter {
    /// Inclusive range; reversed bounds are swapped
    pub fn range(a: i32, b: i32) -> Self {
        if a <= b { YearFilter::Range(a, b) } else { YearFilter::Range(b, a) }
    }

    pub fn bounds(self) -> (i32, i32) {
        match self {
            YearFilter::All => (i32::MIN, i32::MAX),
            YearFilter::Year(y) => (y, y),
            YearFilter::Range(a, b) => (a.min(b), a.max(b))
        }
    }

    pub fn matches(self, year: i32) -> bool {
        let (lo, hi) = self.bounds();
        (lo..=hi).contains(&year)
    }
}

impl FromStr for YearFilter {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || LibraryError::InvalidYearFilter(s.to_string());
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(YearFilter::All);
        }
        match s.split_once('-') {
            Some((a, b)) => {
                let a = a.trim().parse::<i32>().map_err(|_| invalid())?;
                let b = b.trim().parse::<i32>().map_err(|_| invalid())?;
                Ok(YearFilter::range(a, b))
            },
            None => s.parse::<i32>().map(YearFilter::Year).map_err(|_| invalid())
        }
    }
}

impl fmt::Display for YearFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearFilter::All => f.write_str("all years"),
            YearFilter::Year(y) => write!(f, "{y}"),
            YearFilter::Range(a, b) => write!(f, "{a}-{b}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_year_from_partial_dates() {
        assert_eq!(parse_release_year("1973").unwrap(), 1973);
        assert_eq!(parse_release_year("1973-03").unwrap(), 1973);
        assert_eq!(parse_release_year("1973-03-01").unwrap(), 1973);
        assert!(parse_release_year("").is_err());
        assert!(parse_release_year("unknown").is_err());
    }

    #[test]
    fn year_filter_parsing() {
        assert_eq!("1999".parse::<YearFilter>().unwrap(), YearFilter::Year(1999));
        assert_eq!("1990-1999".parse::<YearFilter>().unwrap(), YearFilter::Range(1990, 1999));
        assert_eq!("1999-1990".parse::<YearFilter>().unwrap(), YearFilter::Range(1990, 1999));
        assert_eq!("all".parse::<YearFilter>().unwrap(), YearFilter::All);
        assert!(matches!(
            "nineties".parse::<YearFilter>(),
            Err(LibraryError::InvalidYearFilter(_))
        ));
    }

    #[test]
    fn year_filter_matching() {
        assert!(YearFilter::All.matches(1850));
        assert!(YearFilter::Year(2001).matches(2001));
        assert!(!YearFilter::Year(2001).matches(2002));
        assert!(YearFilter::range(2000, 2005).matches(2005));
        assert!(!YearFilter::range(2000, 2005).matches(1999));
    }

    #[test]
    fn kind_compatibility() {
        assert!(ItemKind::Single.compatible(ItemKind::Album));
        assert!(!ItemKind::Track.compatible(ItemKind::Album));
        assert!(ItemKind::Track.priority() < ItemKind::Single.priority());
        assert!(ItemKind::Single.priority() < ItemKind::Album.priority());
    }
}
