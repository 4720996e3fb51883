//! Duplicate-suppression cache.
//!
//! Upload ingestion asks one question per record: "has this
//! certificate identity been seen before?" The answer must be race
//! safe. When several workers upload the same certificate
//! concurrently, exactly one caller may be told MISS, otherwise the
//! fleet double-inserts and leans on the database constraint for
//! every overlap.
//!
//! The structure is a fixed array of stripes, each a mutex around a
//! `HashSet` plus FIFO order queue. A fingerprint maps to one stripe
//! by hash, so the membership test and insertion happen under a single
//! short critical section, which is what makes the one-MISS guarantee
//! hold. Nothing here is held across the database write that follows
//! a MISS.
//!
//! Eviction is FIFO per stripe once the stripe reaches its share of
//! `max_size`. An evicted fingerprint may later produce a second MISS;
//! that is acceptable because the store's UNIQUE index is the source
//! of truth.

use std::collections::{HashSet, VecDeque};
use std::hash::{BuildHasher, Hash, Hasher, RandomState};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use certsweep_core::cert::CertFingerprint;
use certsweep_core::protocol::CacheStats;


/// Number of lock stripes.
const STRIPES: usize = 64;

/// Answer of [`DuplicateCache::check_and_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The fingerprint was already present.
    Hit,
    /// The fingerprint was inserted by this call.
    Miss,
}

#[derive(Default)]
struct Stripe {
    seen: HashSet<CertFingerprint>,
    order: VecDeque<CertFingerprint>,
}

/// Bounded, striped membership cache over certificate fingerprints.
pub struct DuplicateCache {
    stripes: Vec<Mutex<Stripe>>,
    hasher: RandomState,
    per_stripe_cap: usize,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DuplicateCache {
    /// Creates a cache bounded to roughly `max_size` fingerprints.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let per_stripe_cap = (max_size / STRIPES).max(1);
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(Stripe::default())).collect(),
            hasher: RandomState::new(),
            per_stripe_cap,
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn stripe_for(&self, fingerprint: &CertFingerprint) -> &Mutex<Stripe> {
        let mut hasher = self.hasher.build_hasher();
        fingerprint.hash(&mut hasher);
        let index = usize::try_from(hasher.finish() % STRIPES as u64).unwrap_or(0);
        &self.stripes[index]
    }

    /// Membership test and insertion in one critical section.
    ///
    /// For concurrent callers racing the same fingerprint, exactly one
    /// receives [`CacheOutcome::Miss`]; the rest receive
    /// [`CacheOutcome::Hit`] (barring an intervening [`clear`] or
    /// eviction of that fingerprint).
    ///
    /// [`clear`]: Self::clear
    pub fn check_and_add(&self, fingerprint: &CertFingerprint) -> CacheOutcome {
        let stripe = self.stripe_for(fingerprint);
        // A poisoned stripe means a thread panicked mid-insert; the
        // set itself is still coherent, so keep serving.
        let mut guard = stripe.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if guard.seen.contains(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return CacheOutcome::Hit;
        }

        while guard.seen.len() >= self.per_stripe_cap {
            match guard.order.pop_front() {
                Some(oldest) => {
                    guard.seen.remove(&oldest);
                }
                None => break,
            }
        }

        guard.seen.insert(fingerprint.clone());
        guard.order.push_back(fingerprint.clone());
        self.misses.fetch_add(1, Ordering::Relaxed);
        CacheOutcome::Miss
    }

    /// Removes a fingerprint, so a failed insert does not falsely
    /// suppress a later retry. Returns whether it was present.
    pub fn remove(&self, fingerprint: &CertFingerprint) -> bool {
        let stripe = self.stripe_for(fingerprint);
        let mut guard = stripe.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let removed = guard.seen.remove(fingerprint);
        if removed {
            guard.order.retain(|entry| entry != fingerprint);
        }
        removed
    }

    /// Number of fingerprints currently held.
    #[must_use]
    pub fn size(&self) -> usize {
        self.stripes
            .iter()
            .map(|stripe| {
                stripe
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .seen
                    .len()
            })
            .sum()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let total_requests = hit_count + miss_count;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hit_count as f64 / total_requests as f64
        };
        CacheStats {
            cache_size: u64::try_from(self.size()).unwrap_or(u64::MAX),
            max_size: u64::try_from(self.max_size).unwrap_or(u64::MAX),
            hit_count,
            miss_count,
            total_requests,
            hit_rate,
        }
    }

    /// Drops every fingerprint and resets the counters.
    pub fn clear(&self) {
        for stripe in &self.stripes {
            let mut guard = stripe.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.seen.clear();
            guard.order.clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}
