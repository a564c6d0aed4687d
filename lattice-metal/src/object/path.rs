//! Dotted Paths
//!
//! Paths such as `"a.b.c"` are parsed once into a segment list and kept in a
//! small process-wide LRU, so hot property reads never re-split strings.
//!
//! This module also implements brace expansion for dependent keys:
//! `"person.{first,last}Name"` expands to `person.firstName` and
//! `person.lastName`.

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{KernelError, Result};
use super::Key;

const DEFAULT_CAPACITY: usize = 1000;

/// A parsed property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    raw: Key,
    segments: SmallVec<[Key; 4]>,
}

impl Path {
    /// Parse `raw`, consulting the shared cache first.
    pub fn parse(raw: &str) -> Arc<Path> {
        cache().lock().get_or_parse(raw)
    }

    fn parse_uncached(raw: &str) -> Path {
        Path {
            raw: Key::from(raw),
            segments: raw.split('.').map(Key::from).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Key] {
        &self.segments
    }

    pub fn first(&self) -> &Key {
        &self.segments[0]
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Whether this is a multi-segment path.
    pub fn is_path(&self) -> bool {
        self.segments.len() > 1
    }
}

/// Whether `key` names a dotted path rather than a single property.
pub fn is_path(key: &str) -> bool {
    key.contains('.')
}

// ----------------------------------------------------------------------------
// LRU cache
// ----------------------------------------------------------------------------

struct PathCache {
    /// Oldest entry first.
    entries: IndexMap<Key, Arc<Path>>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl PathCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    fn get_or_parse(&mut self, raw: &str) -> Arc<Path> {
        if let Some(index) = self.entries.get_index_of(raw) {
            self.hits += 1;
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
            return Arc::clone(&self.entries[last]);
        }

        self.misses += 1;
        let path = Arc::new(Path::parse_uncached(raw));
        self.entries.insert(Arc::clone(&path.raw), Arc::clone(&path));
        self.evict();
        path
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }
}

static PATH_CACHE: OnceLock<Mutex<PathCache>> = OnceLock::new();

fn cache() -> &'static Mutex<PathCache> {
    PATH_CACHE.get_or_init(|| Mutex::new(PathCache::new(DEFAULT_CAPACITY)))
}

pub(crate) fn resize_cache(capacity: usize) {
    let mut cache = cache().lock();
    cache.capacity = capacity.max(1);
    cache.evict();
}

/// `(hits, misses)` since process start.
pub fn cache_stats() -> (u64, u64) {
    let cache = cache().lock();
    (cache.hits, cache.misses)
}

// ----------------------------------------------------------------------------
// Brace expansion
// ----------------------------------------------------------------------------

/// Expand `{a,b}` groups in a dependent-key pattern.
///
/// Groups may appear several times but cannot nest, and patterns cannot
/// contain spaces.
pub fn expand_properties(pattern: &str) -> Result<Vec<String>> {
    let invalid = |reason| KernelError::InvalidBraceExpansion {
        pattern: pattern.to_string(),
        reason,
    };

    if pattern.contains(' ') {
        return Err(invalid("brace expanded properties cannot contain a space"));
    }

    let mut depth = 0i32;
    for c in pattern.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        if !(0..=1).contains(&depth) {
            return Err(invalid("braces have to be balanced and cannot be nested"));
        }
    }
    if depth != 0 {
        return Err(invalid("braces have to be balanced and cannot be nested"));
    }

    // Even-indexed parts are literal text, odd-indexed parts were inside braces.
    let mut expanded = vec![String::new()];
    for (index, part) in pattern.split(['{', '}']).enumerate() {
        if index % 2 == 0 {
            for prefix in &mut expanded {
                prefix.push_str(part);
            }
        } else {
            let alternatives: Vec<&str> = part.split(',').collect();
            expanded = expanded
                .iter()
                .flat_map(|prefix| alternatives.iter().map(move |alt| format!("{prefix}{alt}")))
                .collect();
        }
    }

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_segments() {
        let path = Path::parse("a.b.c");
        assert_eq!(path.len(), 3);
        assert_eq!(&**path.first(), "a");
        assert!(path.is_path());
        assert!(!Path::parse("a").is_path());
    }

    #[test]
    fn cache_returns_shared_paths() {
        let first = Path::parse("shared.cache.path");
        let second = Path::parse("shared.cache.path");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn lru_evicts_oldest() {
        let mut cache = PathCache::new(2);
        let a = cache.get_or_parse("a.x");
        cache.get_or_parse("b.x");
        // touch "a.x" so "b.x" becomes the oldest
        assert!(Arc::ptr_eq(&a, &cache.get_or_parse("a.x")));
        cache.get_or_parse("c.x");

        assert!(cache.entries.contains_key("a.x"));
        assert!(!cache.entries.contains_key("b.x"));
        assert!(cache.entries.contains_key("c.x"));
        assert_eq!((cache.hits, cache.misses), (1, 3));
    }

    #[test]
    fn expands_braces() {
        assert_eq!(expand_properties("a").unwrap(), vec!["a"]);
        assert_eq!(
            expand_properties("person.{firstName,lastName}").unwrap(),
            vec!["person.firstName", "person.lastName"]
        );
        assert_eq!(
            expand_properties("{a,b}.{c,d}").unwrap(),
            vec!["a.c", "a.d", "b.c", "b.d"]
        );
        assert_eq!(
            expand_properties("user.{first,last}Name").unwrap(),
            vec!["user.firstName", "user.lastName"]
        );
    }

    #[test]
    fn rejects_bad_patterns() {
        assert!(expand_properties("a.{b, c}").is_err());
        assert!(expand_properties("a.{b,{c,d}}").is_err());
        assert!(expand_properties("a.{b,c").is_err());
        assert!(expand_properties("a.b,c}").is_err());
    }
}
