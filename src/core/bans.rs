// src/core/bans.rs

//! Ban predicates and lazy invalidation (spec §4.1). A ban bans every
//! object already in the index that matches its predicate and was created
//! before the ban itself; rather than walking the whole index eagerly, each
//! object is checked against the ban list lazily, the first time it's
//! looked up after the ban was created.

use parking_lot::Mutex;
use std::sync::Arc;
use wildmatch::WildMatch;

/// What part of a cached response a ban's pattern is matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanField {
    Url,
    Header(String),
}

/// A single ban: "obsolete every object matching `field` ~ `pattern` that
/// existed before `created`".
#[derive(Debug)]
pub struct Ban {
    pub created: f64,
    pub field: BanField,
    pattern: WildMatch,
    pattern_src: String,
}

impl Ban {
    pub fn new(created: f64, field: BanField, pattern: impl Into<String>) -> Self {
        let pattern_src = pattern.into();
        Self {
            created,
            field,
            pattern: WildMatch::new(&pattern_src),
            pattern_src,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern_src
    }

    fn matches_url(&self, url: &str) -> bool {
        matches!(&self.field, BanField::Url) && self.pattern.matches(url)
    }

    fn matches_header(&self, name: &str, value: &str) -> bool {
        match &self.field {
            BanField::Header(n) => n.eq_ignore_ascii_case(name) && self.pattern.matches(value),
            BanField::Url => false,
        }
    }
}

/// The append-only, newest-last list of live bans.
pub struct BanList {
    bans: Mutex<Vec<Arc<Ban>>>,
}

impl Default for BanList {
    fn default() -> Self {
        Self::new()
    }
}

impl BanList {
    pub fn new() -> Self {
        Self {
            bans: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, created: f64, field: BanField, pattern: impl Into<String>) -> Arc<Ban> {
        let ban = Arc::new(Ban::new(created, field, pattern));
        self.bans.lock().push(ban.clone());
        ban
    }

    pub fn len(&self) -> usize {
        self.bans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is an object created at `creation_ts`, with URL `url` and response
    /// headers `headers`, obsoleted by any ban created after it existed?
    /// Called lazily from the lookup path (spec §4.1, §4.5).
    pub fn is_obsolete(&self, creation_ts: f64, url: &str, headers: &[(String, String)]) -> bool {
        let bans = self.bans.lock();
        bans.iter().any(|ban| {
            if ban.created <= creation_ts {
                return false;
            }
            if ban.matches_url(url) {
                return true;
            }
            headers
                .iter()
                .any(|(name, value)| ban.matches_header(name, value))
        })
    }

    /// Drop bans older than every currently-live object (`floor_ts`), since
    /// they can no longer obsolete anything new and lazy checks against
    /// them are now wasted work.
    pub fn gc_older_than(&self, floor_ts: f64) {
        self.bans.lock().retain(|ban| ban.created >= floor_ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_created_after_object_obsoletes_matching_url() {
        let list = BanList::new();
        list.add(10.0, BanField::Url, "/api/*");
        assert!(list.is_obsolete(5.0, "/api/widgets", &[]));
        assert!(!list.is_obsolete(5.0, "/static/app.js", &[]));
    }

    #[test]
    fn ban_created_before_object_does_not_obsolete_it() {
        let list = BanList::new();
        list.add(1.0, BanField::Url, "/api/*");
        assert!(!list.is_obsolete(5.0, "/api/widgets", &[]));
    }

    #[test]
    fn header_ban_matches_case_insensitive_name() {
        let list = BanList::new();
        list.add(10.0, BanField::Header("X-Tenant".into()), "acme");
        let headers = vec![("x-tenant".to_string(), "acme".to_string())];
        assert!(list.is_obsolete(1.0, "/any", &headers));
    }

    #[test]
    fn gc_drops_bans_older_than_the_given_floor() {
        let list = BanList::new();
        list.add(1.0, BanField::Url, "/old/*");
        list.add(20.0, BanField::Url, "/new/*");
        list.gc_older_than(10.0);
        assert_eq!(list.len(), 1);
        assert_eq!(list.bans.lock()[0].pattern(), "/new/*");
    }
}
