//!
//! src/sampler.rs  Oct 7th, 2026
//!
//! Random draws from the cached library
//!

use rand::{seq::{IteratorRandom, SliceRandom}, Rng};

use crate::cache::CacheFile;
use crate::errors::LibraryError;
use crate::types::{Album, YearFilter};

/// Uniform draw without replacement of `min(count, pool)` albums matching
/// `filter`, in random order. The caller owns the random source.
pub fn sample<R: Rng + ?Sized>(
    cache: &CacheFile,
    filter: YearFilter,
    count: usize,
    rng: &mut R
) -> Result<Vec<Album>, LibraryError> {
    let pool = cache.iterate(filter);
    if pool.clone().next().is_none() {
        return Err(LibraryError::EmptySelection);
    }
    // reservoir selection keeps pool order
    let mut picked: Vec<Album> = pool.choose_multiple(rng, count).into_iter().cloned().collect();
    picked.shuffle(rng);
    Ok(picked)
}

/// Number of albums `sample` would draw from
pub fn pool_size(cache: &CacheFile, filter: YearFilter) -> usize {
    cache.iterate(filter).count()
}
