//  CACHE.rs
//    by Lut99
//
//  Created:
//    07 Feb 2023, 14:40:12
//  Last edited:
//    27 Mar 2023, 16:16:58
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the poll-permission cache, which avoids re-authorizing
//!   every poll of a long-running execution. Entries are time-boxed
//!   rather than kept for the process lifetime.
//

use std::time::{Duration, Instant};

use dashmap::DashMap;


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    /// A remembered grant is fresh, an unknown one is not.
    #[test]
    fn remembered_grants_are_fresh() {
        let cache: AccessCache = AccessCache::default();
        assert!(!cache.is_fresh("abc", "token-1"));

        cache.remember("abc", "token-1");
        assert!(cache.is_fresh("abc", "token-1"));
        assert!(!cache.is_fresh("abc", "token-2"));
        assert!(!cache.is_fresh("def", "token-1"));
    }

    /// An expired grant is evicted, not returned.
    #[test]
    fn expired_grants_are_evicted() {
        let cache: AccessCache = AccessCache::new(Duration::from_secs(0));
        cache.remember("abc", "token-1");

        assert!(!cache.is_fresh("abc", "token-1"));
        assert_eq!(cache.len(), 0);
    }
}





/***** LIBRARY *****/
/// Implements the cache of `(execution id, bearer token)` pairs that have already been authorized
/// to poll.
///
/// Entries expire after a fixed time-to-live, which bounds both staleness and growth.
#[derive(Debug)]
pub struct AccessCache {
    /// How long a granted entry stays valid.
    ttl     : Duration,
    /// The granted entries, mapped to the moment they were granted.
    entries : DashMap<(String, String), Instant>,
}

impl AccessCache {
    /// The time-to-live used by `AccessCache::default()`.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);


    /// Constructor for the AccessCache.
    ///
    /// # Arguments
    /// - `ttl`: How long a granted entry stays valid.
    ///
    /// # Returns
    /// A new AccessCache instance.
    #[inline]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries : DashMap::new(),
        }
    }



    /// Remembers that the given token was granted access to the given execution.
    ///
    /// # Arguments
    /// - `id`: The execution that was polled.
    /// - `token`: The bearer token that was authorized.
    #[inline]
    pub fn remember(&self, id: impl Into<String>, token: impl Into<String>) {
        self.entries.insert((id.into(), token.into()), Instant::now());
    }

    /// Checks whether the given token holds a fresh grant for the given execution.
    ///
    /// Expired entries are evicted as a side effect.
    ///
    /// # Arguments
    /// - `id`: The execution being polled.
    /// - `token`: The bearer token to check.
    ///
    /// # Returns
    /// True if a fresh grant exists, false otherwise.
    pub fn is_fresh(&self, id: impl Into<String>, token: impl Into<String>) -> bool {
        let key: (String, String) = (id.into(), token.into());

        // The read guard must be gone before we may evict
        {
            match self.entries.get(&key) {
                Some(granted) => { if granted.elapsed() < self.ttl { return true; } },
                None          => { return false; },
            }
        }

        self.entries.remove(&key);
        false
    }

    /// Returns the number of (possibly expired) entries currently held.
    #[inline]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns whether the cache currently holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

impl Default for AccessCache {
    #[inline]
    fn default() -> Self { Self::new(Self::DEFAULT_TTL) }
}
