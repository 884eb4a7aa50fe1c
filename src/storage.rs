/*!
 * In-Memory Storage Implementation
 *
 * `Dict` is the key-value map itself; `Db` is the shared handle the event
 * loop executes commands against. Expiry is a compare-and-delete keyed by a
 * per-write version, so a deferred delete scheduled for an old value never
 * removes a newer one.
 */

use crate::expiry::{spawn_expiry_worker, ExpiryHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use std::time::{Duration, Instant};

type AHash = BuildHasherDefault<ahash::AHasher>;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    #[inline]
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Key-value map with versioned entries.
///
/// Every `set` stamps the entry with a fresh, strictly increasing version.
/// An entry whose deadline has passed reads as absent even before the expiry
/// worker reclaims it.
#[derive(Debug, Default)]
pub struct Dict {
    inner: HashMap<String, Entry, AHash>,
    next_version: u64,
}

impl Dict {
    /// Get the live value for `k`.
    #[inline]
    pub fn get(&self, k: &str) -> Option<&str> {
        self.get_at(k, Instant::now())
    }

    /// Get the value for `k` as seen at `now`.
    pub fn get_at(&self, k: &str, now: Instant) -> Option<&str> {
        self.inner
            .get(k)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_str())
    }

    /// Insert or replace `k`.
    ///
    /// # Returns
    /// * The version stamped on the new entry, used to match a later
    ///   deferred delete against this exact write.
    pub fn set(&mut self, k: String, v: String, expires_at: Option<Instant>) -> u64 {
        self.next_version += 1;
        let version = self.next_version;
        self.inner.insert(
            k,
            Entry {
                value: v,
                version,
                expires_at,
            },
        );
        version
    }

    /// Delete `k`, returning whether a live value was removed.
    pub fn del(&mut self, k: &str) -> bool {
        let now = Instant::now();
        self.inner.remove(k).map_or(false, |e| e.is_live(now))
    }

    /// Delete `k` only if it still holds the write stamped `version`.
    pub fn remove_if_version(&mut self, k: &str, version: u64) -> bool {
        match self.inner.get(k) {
            Some(e) if e.version == version => {
                self.inner.remove(k);
                true
            }
            _ => false,
        }
    }

    /// Number of stored entries, counting expired ones not yet reclaimed.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Shared store handle.
///
/// Cloning is cheap. The dict sits behind a mutex because the expiry worker
/// mutates it from its own thread; every critical section is O(1).
#[derive(Clone)]
pub struct Db {
    dict: Arc<Mutex<Dict>>,
    expiry: ExpiryHandle,
}

impl Db {
    /// Create an empty store and start its expiry worker thread.
    pub fn new() -> std::io::Result<Self> {
        let dict = Arc::new(Mutex::new(Dict::default()));
        let expiry = spawn_expiry_worker(dict.clone())?;
        Ok(Self { dict, expiry })
    }

    /// Look up `k`.
    ///
    /// # Returns
    ///
    /// An owned copy of the value, or `None` when the key was never set,
    /// was deleted, or has passed its deadline.
    pub fn get(&self, k: &str) -> Option<String> {
        self.dict.lock().get(k).map(str::to_owned)
    }

    /// Store `k -> v`. With a `ttl`, one deferred delete is scheduled for
    /// `ttl` after this call.
    pub fn set(&self, k: String, v: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        match expires_at {
            Some(deadline) => {
                let version = self.dict.lock().set(k.clone(), v, Some(deadline));
                self.expiry.schedule(deadline, k, version);
            }
            None => {
                self.dict.lock().set(k, v, None);
            }
        }
    }

    /// Delete `k`; true if a live value was removed.
    pub fn del(&self, k: &str) -> bool {
        self.dict.lock().del(k)
    }

    pub fn len(&self) -> usize {
        self.dict.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.lock().is_empty()
    }
}
