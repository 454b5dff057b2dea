//! Session layer coordinating up to three cache tiers.
//!
//! Each aligner thread drives one [`AlignmentCacheIface`]. It owns the
//! current-read tier, optionally owns a per-thread across-read tier, and
//! optionally shares a process-wide synchronized tier with other threads.
//! Probes walk the tiers nearest-first; finished entries are promoted once,
//! to the nearest across-read tier.
//!
//! A seed alignment is bracketed by `begin_align` .. `finish_align`. In
//! between, every reference substring the aligner discovers is recorded
//! through `add_on_the_fly` into the current-read tier, while the session
//! accumulates the payload in its own buffer. `finish_align` writes the
//! finished payload back to the current-read tier and commits it up the
//! hierarchy; `next_read` turns the current-read tier over.
//!
//! Locking: only the shared tier carries a mutex, inside [`SharedCache`].
//! Compound operations (promotion, copy-out) take that lock exactly once
//! and do all their work under it, so promotions are linearizable and a
//! reader never observes a half-copied entry.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{AlignmentCache, QVal, SATuple};
use crate::key::{QKey, SAKey};

/// A cache tier shared between threads, behind its per-tier mutex.
pub struct SharedCache {
    inner: Mutex<AlignmentCache>,
}

impl SharedCache {
    /// Create a shared tier with the given pool byte budget.
    pub fn new(bytes: u64) -> Self {
        SharedCache {
            inner: Mutex::new(AlignmentCache::new(bytes, true)),
        }
    }

    /// Run `f` with the tier locked. All compound work against a shared
    /// tier goes through here so the lock is taken exactly once.
    pub fn with<R>(&self, f: impl FnOnce(&mut AlignmentCache) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Look up `qk`, returning the payload by value.
    pub fn query(&self, qk: &QKey) -> Option<QVal> {
        self.inner.lock().query(qk).copied()
    }

    /// Promote one entry out of `src`, turning this tier over on
    /// exhaustion. Returns true iff the turnover happened.
    pub fn clear_copy(&self, qk: &QKey, qv: &QVal, src: &AlignmentCache) -> bool {
        self.inner.lock().clear_copy(qk, qv, src)
    }

    /// Turn the tier over.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn version(&self) -> u32 {
        self.inner.lock().version()
    }
}

/// Which tier answered a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Current,
    Local,
    Shared,
}

/// Outcome of `begin_align`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginAlign {
    /// The seed was already resolved in the current-read tier; no session
    /// was opened.
    Hit(QVal),
    /// Not cached. A session is open and expects `add_on_the_fly` calls.
    Miss,
    /// The current-read tier could not hold a new key. No session is open.
    OutOfMemory,
}

/// Per-thread session over a current-read tier, an optional per-thread
/// across-read tier, and an optional shared across-read tier.
pub struct AlignmentCacheIface {
    qk: QKey,         // key for the seed being aligned
    qv: QVal,         // payload being assembled for that seed
    in_session: bool, // between begin_align and finish_align
    cacheable: bool,  // did begin_align create a new node?
    exhausted: bool,  // an append ran out of pool this session

    rangen: usize, // ranges added since begin_align
    eltsn: usize,  // elements added since begin_align

    current: AlignmentCache,
    local: Option<AlignmentCache>,
    shared: Option<Arc<SharedCache>>,
}

impl AlignmentCacheIface {
    pub fn new(
        current: AlignmentCache,
        local: Option<AlignmentCache>,
        shared: Option<Arc<SharedCache>>,
    ) -> Self {
        debug_assert!(!current.shared());
        debug_assert!(local.as_ref().map_or(true, |c| !c.shared()));
        AlignmentCacheIface {
            qk: QKey::default(),
            qv: QVal::new(),
            in_session: false,
            cacheable: false,
            exhausted: false,
            rangen: 0,
            eltsn: 0,
            current,
            local,
            shared,
        }
    }

    /// Probe current, then local, then shared for `qk`, reporting which
    /// tier answered. An unset payload (leftover of an aborted copy) is
    /// not a hit.
    pub fn query(&self, qk: &QKey) -> Option<(QVal, Tier)> {
        if let Some(qv) = self.current.query(qk).filter(|v| v.valid()) {
            return Some((*qv, Tier::Current));
        }
        if let Some(local) = &self.local {
            if let Some(qv) = local.query(qk).filter(|v| v.valid()) {
                return Some((*qv, Tier::Local));
            }
        }
        if let Some(shared) = &self.shared {
            if let Some(qv) = shared.query(qk).filter(|v| v.valid()) {
                return Some((qv, Tier::Shared));
            }
        }
        None
    }

    /// Probe all tiers for `qk`; a hit outside the current-read tier is
    /// first copied into it. The returned payload always points into the
    /// current-read tier. `None` means either no tier holds the key or the
    /// copy ran out of memory.
    pub fn query_copy(&mut self, qk: &QKey) -> Option<&QVal> {
        if self.current.query(qk).filter(|v| v.valid()).is_some() {
            return self.current.query(qk);
        }
        if let Some(local) = &self.local {
            if let Some(qv) = local.query(qk).copied().filter(|v| v.valid()) {
                if !self.current.copy(qk, &qv, local) {
                    return None;
                }
                return self.current.query(qk);
            }
        }
        if let Some(shared) = &self.shared {
            // Hold the lock across the probe and the copy-out so the
            // source entry cannot turn over mid-copy.
            let current = &mut self.current;
            let copied = shared.with(|tier| {
                tier.query(qk)
                    .copied()
                    .filter(|v| v.valid())
                    .map(|qv| current.copy(qk, &qv, tier))
            });
            return match copied {
                Some(true) => self.current.query(qk),
                Some(false) | None => None,
            };
        }
        None
    }

    /// Open a session for the seed `seq` (2-bit base codes, 4 = ambiguous).
    ///
    /// A cacheable seed already answered by the current-read tier returns
    /// `Hit` without opening a session. Otherwise the key is added to the
    /// current-read tier (uncacheable seeds route around the map entirely)
    /// and the caller is expected to stream `add_on_the_fly` calls before
    /// `finish_align`.
    pub fn begin_align(&mut self, seq: &[u8]) -> BeginAlign {
        debug_assert!(self.session_ok());
        self.qk = QKey::from_codes(seq);
        if self.qk.cacheable() {
            if let Some(qv) = self.current.query(&self.qk).copied() {
                if qv.valid() {
                    self.reset_read();
                    return BeginAlign::Hit(qv);
                }
                // An abandoned session left an unfinished payload behind;
                // fall through and rebuild it.
            }
            match self.current.add(&self.qk) {
                None => {
                    self.reset_read();
                    return BeginAlign::OutOfMemory;
                }
                Some((_, added)) => self.cacheable = added,
            }
        } else {
            self.cacheable = false;
        }
        self.qv.reset();
        self.in_session = true;
        BeginAlign::Miss
    }

    /// Record one reference substring (`rfseq`, 2-bit base codes) with its
    /// BWT range `[topf, botf)` for the seed being aligned.
    ///
    /// Once a call fails on pool exhaustion, the session stays failed:
    /// further calls return false without touching the tier, so the
    /// payload `finish_align` commits covers exactly the associations that
    /// landed before the exhaustion.
    pub fn add_on_the_fly(&mut self, rfseq: &[u8], topf: u32, botf: u32) -> bool {
        debug_assert!(self.aligning());
        debug_assert!(self.session_ok());
        if self.exhausted {
            return false;
        }
        let sak = SAKey::from_codes(rfseq);
        debug_assert!(sak.cacheable(), "reference substrings are always encodable");
        if !sak.cacheable() {
            return false;
        }
        if self.current.add_on_the_fly(&mut self.qv, &sak, topf, botf) {
            self.rangen += 1;
            self.eltsn += (botf - topf) as usize;
            true
        } else {
            self.exhausted = true;
            false
        }
    }

    /// Close the session: write the finished payload into the current-read
    /// tier and promote it once, to the nearest across-read tier present.
    /// Returns a copy of the final payload.
    pub fn finish_align(&mut self) -> QVal {
        if !self.in_session {
            debug_assert!(false, "finish_align without begin_align");
            return QVal::new();
        }
        if !self.qv.valid() {
            self.qv.init(0, 0, 0);
        }
        let qv = self.qv;
        if self.qk.cacheable() {
            debug_assert!(!self.cacheable || self.current.query(&self.qk).is_some());
            self.current.commit(&self.qk, &qv);
            // Promote to the nearest across-read tier and stop: promotion
            // into the shared tier is the job of whoever consolidates the
            // per-thread tier, which keeps writes on the contended mutex
            // rare.
            if let Some(local) = self.local.as_mut() {
                local.clear_copy(&self.qk, &qv, &self.current);
            } else if let Some(shared) = &self.shared {
                shared.clear_copy(&self.qk, &qv, &self.current);
            }
        }
        self.reset_read();
        qv
    }

    /// Done with the read: turn the current-read tier over and drop any
    /// session state.
    pub fn next_read(&mut self) {
        self.current.clear();
        self.reset_read();
        debug_assert!(!self.aligning());
    }

    /// True iff a session is open.
    pub fn aligning(&self) -> bool {
        self.in_session
    }

    /// Turn over every tier present.
    pub fn clear(&mut self) {
        self.current.clear();
        if let Some(local) = self.local.as_mut() {
            local.clear();
        }
        if let Some(shared) = &self.shared {
            shared.clear();
        }
        self.reset_read();
    }

    /// Materialize the current-read tier's records for `qk`.
    pub fn query_ex(&self, qk: &QKey, satups: &mut Vec<SATuple>) {
        self.current.query_ex(qk, satups);
    }

    /// Materialize the current-read tier's records for a payload.
    pub fn query_qval(&self, qv: &QVal, satups: &mut Vec<SATuple>) {
        self.current.query_qval(qv, satups);
    }

    /// Ranges recorded since the session opened.
    pub fn session_ranges(&self) -> usize {
        self.rangen
    }

    /// Suffix-array elements recorded since the session opened.
    pub fn session_elts(&self) -> usize {
        self.eltsn
    }

    /// The current-read tier.
    pub fn current_cache(&self) -> &AlignmentCache {
        &self.current
    }

    /// Mutable access to the current-read tier, e.g. for resolving rows
    /// reserved by `add_on_the_fly`.
    pub fn current_cache_mut(&mut self) -> &mut AlignmentCache {
        &mut self.current
    }

    /// The per-thread across-read tier, if wired.
    pub fn local_cache(&self) -> Option<&AlignmentCache> {
        self.local.as_ref()
    }

    /// The shared across-read tier, if wired.
    pub fn shared_cache(&self) -> Option<&Arc<SharedCache>> {
        self.shared.as_ref()
    }

    /// Forget the in-progress read.
    fn reset_read(&mut self) {
        self.cacheable = false;
        self.exhausted = false;
        self.rangen = 0;
        self.eltsn = 0;
        self.qv.reset();
        self.in_session = false;
    }

    /// Session-state sanity, the debug-build counterpart of the tier
    /// invariants.
    fn session_ok(&self) -> bool {
        debug_assert!(self.eltsn >= self.rangen);
        if !self.in_session {
            debug_assert_eq!(self.rangen, 0);
            debug_assert_eq!(self.eltsn, 0);
        }
        true
    }
}
