//! One stratum of the alignment subproblem cache.
//!
//! A cache tier associates read substrings (seeds) with the reference
//! substrings found near them, and reference substrings with their
//! suffix-array ranges. It is two linked multimaps over shared pool-backed
//! storage:
//!
//! 1. The query multimap: `QKey -> QVal`, where the payload names a run of
//!    reference keys in `qlist`.
//! 2. The suffix-array multimap: `SAKey -> SAVal`, where the payload names
//!    the BWT range top and a run of reference offsets in `salist`.
//!
//! All four containers draw from one [`PagePool`], so exhaustion has a
//! single meaning per tier and `clear` turns the whole tier over at once,
//! bumping a version counter that invalidates every outstanding index.

use rand::Rng;

use crate::key::{QKey, SAKey};
use crate::pbtree::PBTree;
use crate::plist::PagedList;
use crate::pool::PagePool;

/// Count sentinel marking an uninitialized payload.
const INVALID_COUNT: u32 = u32::MAX;

/// Placeholder stored in reserved `salist` rows until the aligner resolves
/// the actual reference offsets.
pub const OFF_UNRESOLVED: u32 = u32::MAX;

/// Payload of the query multimap: a run of reference keys in the tier's
/// `qlist`, plus the total suffix-array row count behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QVal {
    i: u32,      // index of the first reference key in qlist
    rangen: u32, // number of reference keys (= SA ranges)
    eltn: u32,   // total elements across those ranges
}

impl Default for QVal {
    fn default() -> Self {
        QVal {
            i: 0,
            rangen: INVALID_COUNT,
            eltn: INVALID_COUNT,
        }
    }
}

impl QVal {
    /// A fresh, invalid payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the first associated reference key in the tier's `qlist`.
    pub fn offset(&self) -> u32 {
        self.i
    }

    /// Number of reference substrings associated with the query key.
    pub fn num_ranges(&self) -> u32 {
        debug_assert!(self.valid());
        self.rangen
    }

    /// Total suffix-array elements across all associated ranges.
    pub fn num_elts(&self) -> u32 {
        debug_assert!(self.valid());
        self.eltn
    }

    /// True iff no reference substring is associated yet.
    pub fn is_empty(&self) -> bool {
        self.num_ranges() == 0
    }

    pub fn valid(&self) -> bool {
        self.rangen != INVALID_COUNT
    }

    pub fn reset(&mut self) {
        *self = QVal::default();
    }

    pub fn init(&mut self, i: u32, ranges: u32, elts: u32) {
        self.i = i;
        self.rangen = ranges;
        self.eltn = elts;
    }

    /// Tally one more range holding `num_elts` suffix-array elements.
    pub fn add_range(&mut self, num_elts: u32) {
        debug_assert!(self.valid());
        self.rangen += 1;
        self.eltn += num_elts;
    }
}

/// Payload of the suffix-array multimap: the BWT range top and a run of
/// reference offsets in the tier's `salist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SAVal {
    pub top: u32, // top row of the range in the BWT index
    pub i: u32,   // index of the first offset in salist
    pub len: u32, // range size
}

impl Default for SAVal {
    fn default() -> Self {
        SAVal {
            top: 0,
            i: 0,
            len: INVALID_COUNT,
        }
    }
}

impl SAVal {
    pub fn valid(&self) -> bool {
        self.len != INVALID_COUNT
    }

    pub fn init(&mut self, top: u32, i: u32, len: u32) {
        self.top = top;
        self.i = i;
        self.len = len;
    }
}

/// Index window into a tier's `salist`. Indices stay good until the owning
/// tier's next `clear`; holders must not retain a slice across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetSlice {
    pub start: u32,
    pub len: u32,
}

impl OffsetSlice {
    pub fn new(start: u32, len: u32) -> Self {
        OffsetSlice { start, len }
    }

    /// Narrow to the sub-window `[first, last)`.
    pub fn sub(&self, first: u32, last: u32) -> Self {
        debug_assert!(first < last && last <= self.len);
        OffsetSlice {
            start: self.start + first,
            len: last - first,
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Everything the cache knows about one reference substring: its key, the
/// top of its BWT range, and the window of resolved offsets in the owning
/// tier's `salist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SATuple {
    pub key: SAKey,
    pub top: u32,
    pub offs: OffsetSlice,
}

impl SATuple {
    pub fn new(key: SAKey, top: u32, offs: OffsetSlice) -> Self {
        SATuple { key, top, offs }
    }

    /// Derive a tuple covering rows `[first, last)` of `src`. The BWT top
    /// shifts along with the window.
    pub fn from_subrange(src: &SATuple, first: u32, last: u32) -> Self {
        SATuple {
            key: src.key,
            top: src.top + first,
            offs: src.offs.sub(first, last),
        }
    }

    /// Randomly narrow a list of tuples down to at most `max_rows` total
    /// rows, appending the result to `dst`.
    ///
    /// When the tuples together hold `total <= max_rows` rows this does
    /// nothing and returns false. Otherwise it draws a uniform starting
    /// row and keeps the circular window of exactly `max_rows` rows from
    /// there, walking the list at most twice (the wrap may split one
    /// source tuple into two output tuples, hence
    /// `dst.len() <= src.len() + 1`).
    pub fn random_narrow<R: Rng>(
        src: &[SATuple],
        dst: &mut Vec<SATuple>,
        rng: &mut R,
        max_rows: usize,
    ) -> bool {
        let total: usize = src.iter().map(|t| t.offs.len() as usize).sum();
        if total <= max_rows {
            return false;
        }
        let off = rng.gen_range(0..total);
        let mut sampled = 0usize;
        let mut prefix = 0usize;
        let mut on = false;
        'walk: for _ in 0..2 {
            for t in src {
                let size = t.offs.len() as usize;
                debug_assert!(size > 0, "empty tuple in random_narrow source");
                if !on {
                    // Does the sample start inside this tuple?
                    if off < prefix + size {
                        on = true;
                        let first = off - prefix;
                        let last = (first + max_rows).min(size);
                        dst.push(SATuple::from_subrange(t, first as u32, last as u32));
                        sampled += last - first;
                    }
                } else {
                    // In the middle or at the end of the sample window.
                    let last = (max_rows - sampled).min(size);
                    dst.push(SATuple::from_subrange(t, 0, last as u32));
                    sampled += last;
                }
                if sampled == max_rows {
                    break 'walk;
                }
                prefix += size;
            }
            // The first pass must have found the starting tuple.
            debug_assert!(on);
        }
        debug_assert!(!dst.is_empty());
        debug_assert!(dst.len() <= src.len() + 1);
        true
    }
}

/// One cache tier: two ordered multimaps over two paged lists, all drawing
/// from a single page pool.
///
/// Each aligner thread keeps a current-read tier that accumulates
/// subproblem results while one read is aligned; finished entries may be
/// copied up into an across-read tier (per-thread or process-shared).
/// Synchronization is external: a tier intended for sharing is wrapped in
/// [`crate::iface::SharedCache`], and the `shared` tag here only records
/// that intent.
pub struct AlignmentCache {
    pool: PagePool,
    qmap: PBTree<QKey, QVal>,     // query key -> run of reference keys
    qlist: PagedList<SAKey>,      // runs of reference keys
    samap: PBTree<SAKey, SAVal>,  // reference key -> SA range
    salist: PagedList<u32>,       // runs of reference offsets
    shared: bool,
    version: u32,
}

impl AlignmentCache {
    /// Create a tier with the given pool byte budget.
    pub fn new(bytes: u64, shared: bool) -> Self {
        AlignmentCache {
            pool: PagePool::new(bytes),
            qmap: PBTree::new(),
            qlist: PagedList::new(),
            samap: PBTree::new(),
            salist: PagedList::new(),
            shared,
            version: 0,
        }
    }

    /// Look up the payload for query key `k`.
    pub fn query(&self, k: &QKey) -> Option<&QVal> {
        self.qmap.lookup(k)
    }

    /// Look up `k` and, on a hit, materialize its reference substring
    /// records into `satups`.
    pub fn query_ex(&self, k: &QKey, satups: &mut Vec<SATuple>) {
        if let Some(qv) = self.qmap.lookup(k).copied() {
            self.query_qval(&qv, satups);
        }
    }

    /// Materialize one record per reference substring named by `qv`.
    pub fn query_qval(&self, qv: &QVal, satups: &mut Vec<SATuple>) {
        debug_assert!(qv.valid());
        let refi = qv.offset() as usize;
        let reff = refi + qv.num_ranges() as usize;
        for i in refi..reff {
            let sak = self.qlist.get(i);
            debug_assert!(
                i == refi || sak != self.qlist.get(i - 1),
                "consecutive duplicate reference keys in qlist"
            );
            let sav = match self.samap.lookup(&sak) {
                Some(s) if s.valid() => *s,
                _ => {
                    debug_assert!(false, "reference key missing or unset in samap");
                    continue;
                }
            };
            satups.push(SATuple::new(sak, sav.top, OffsetSlice::new(sav.i, sav.len)));
            if cfg!(debug_assertions) && i > refi && satups.len() >= 2 {
                let a = &satups[satups.len() - 1];
                let b = &satups[satups.len() - 2];
                debug_assert!(
                    a.key != b.key || a.top != b.top || a.offs != b.offs,
                    "consecutive identical tuples"
                );
            }
        }
    }

    /// True iff the tier holds nothing.
    pub fn is_empty(&self) -> bool {
        self.qmap.is_empty()
            && self.qlist.is_empty()
            && self.samap.is_empty()
            && self.salist.is_empty()
    }

    /// Insert query key `qk`, or find it if already present.
    ///
    /// Returns the payload slot (a fresh slot starts invalid, to be filled
    /// by `add_on_the_fly` or `commit`) and whether a new node was
    /// created. `None` means the pool is exhausted.
    pub fn add(&mut self, qk: &QKey) -> Option<(&mut QVal, bool)> {
        debug_assert!(qk.cacheable());
        self.qmap.add(&mut self.pool, *qk)
    }

    /// Record one reference substring discovered for the in-progress query.
    ///
    /// Appends `sak` to `qlist`; if `sak` has no recorded range yet,
    /// reserves `botf - topf` placeholder rows in `salist` for the aligner
    /// to resolve through [`AlignmentCache::sa_set`]. An invalid `qv` is
    /// initialized to point at the current end of `qlist` first; its
    /// counters tally the range only once every append has landed, so a
    /// failed call never leaves the payload counting entries that are not
    /// there.
    ///
    /// Returns false when any pool allocation is denied; the tier may then
    /// hold a partially appended suffix, which stays orphaned (and unset)
    /// until the tier turns over.
    pub fn add_on_the_fly(&mut self, qv: &mut QVal, sak: &SAKey, topf: u32, botf: u32) -> bool {
        debug_assert!(sak.cacheable());
        debug_assert!(botf > topf);
        if !qv.valid() {
            qv.init(self.qlist.len() as u32, 0, 0);
        }
        if !self.qlist.push(&mut self.pool, *sak) {
            return false;
        }
        let salist_start = self.salist.len() as u32;
        let have_rows = match self.samap.add(&mut self.pool, *sak) {
            None => return false,
            // A recorded range serves this query too; an unset leftover
            // from an aborted append is rebuilt below.
            Some((sav, _)) => sav.valid(),
        };
        if !have_rows {
            for _ in 0..(botf - topf) {
                if !self.salist.push(&mut self.pool, OFF_UNRESOLVED) {
                    return false;
                }
            }
            // Rows are all reserved; only now does the range go live.
            match self.samap.lookup_mut(sak) {
                Some(sav) => sav.init(topf, salist_start, botf - topf),
                None => debug_assert!(false, "reference key vanished mid-append"),
            }
        }
        qv.add_range(botf - topf);
        true
    }

    /// Deep-copy one query entry from `src` into this tier.
    ///
    /// A key already fully copied here wins: the call succeeds without
    /// changes. Returns false when the pool is exhausted mid-copy; the
    /// appended orphans stay until the tier turns over (`clear_copy`
    /// handles that), and the destination payloads stay unset, so a
    /// partial copy reads as a miss rather than a torn entry.
    pub fn copy(&mut self, qk: &QKey, qv: &QVal, src: &AlignmentCache) -> bool {
        debug_assert!(qk.cacheable());
        debug_assert!(qv.valid());
        let dst_offset = self.qlist.len() as u32;
        match self.qmap.add(&mut self.pool, *qk) {
            None => return false,
            // An unset leftover from an aborted copy is rebuilt.
            Some((slot, false)) if slot.valid() => return true,
            Some(_) => {}
        }
        let refi = qv.offset() as usize;
        let reff = refi + qv.num_ranges() as usize;
        for i in refi..reff {
            let sak = src.qlist.get(i);
            if !self.qlist.push(&mut self.pool, sak) {
                return false;
            }
            let src_sav = match src.samap.lookup(&sak) {
                Some(s) if s.valid() => *s,
                _ => {
                    debug_assert!(false, "reference key missing from source samap");
                    continue;
                }
            };
            let salist_start = self.salist.len() as u32;
            match self.samap.add(&mut self.pool, sak) {
                None => return false,
                // Fully copied rows already resident win; an unset
                // leftover is rebuilt.
                Some((sav, false)) if sav.valid() => continue,
                Some(_) => {}
            }
            for j in 0..src_sav.len as usize {
                let row = src.salist.get(src_sav.i as usize + j);
                if !self.salist.push(&mut self.pool, row) {
                    return false;
                }
            }
            // Rows are all in place; only now does the range go live.
            match self.samap.lookup_mut(&sak) {
                Some(sav) => sav.init(src_sav.top, salist_start, src_sav.len),
                None => debug_assert!(false, "reference key vanished mid-copy"),
            }
        }
        // Every append landed; publish the payload.
        match self.qmap.lookup_mut(qk) {
            Some(slot) => slot.init(dst_offset, qv.num_ranges(), qv.num_elts()),
            None => debug_assert!(false, "query key vanished mid-copy"),
        }
        true
    }

    /// Copy with turnover: on exhaustion, clear this tier and try once
    /// more. Returns true iff the clear happened. An entry that cannot fit
    /// even in an empty tier is logged and dropped; the caller proceeds
    /// without it.
    pub fn clear_copy(&mut self, qk: &QKey, qv: &QVal, src: &AlignmentCache) -> bool {
        if !self.copy(qk, qv, src) {
            self.clear();
            debug_assert!(self.is_empty());
            if !self.copy(qk, qv, src) {
                log::warn!(
                    "cache entry ({} ranges, {} elements) does not fit in an empty \
                     {}-page cache; increase the cache size",
                    qv.num_ranges(),
                    qv.num_elts(),
                    self.pool.max_pages()
                );
            }
            return true;
        }
        false
    }

    /// Overwrite the resident payload for `qk` with the finished `qv`.
    pub fn commit(&mut self, qk: &QKey, qv: &QVal) {
        debug_assert!(qk.cacheable());
        debug_assert!(qv.valid());
        match self.qmap.lookup_mut(qk) {
            Some(slot) => *slot = *qv,
            None => debug_assert!(false, "commit for a key that was never added"),
        }
    }

    /// Turn the tier over: drop every entry, return every pool page, and
    /// bump the version. Every outstanding index into this tier is invalid
    /// from here on.
    pub fn clear(&mut self) {
        self.pool.clear();
        self.qmap.clear();
        self.qlist.clear();
        self.samap.clear();
        self.salist.clear();
        self.version = self.version.wrapping_add(1);
    }

    /// Read one resolved (or still-reserved) suffix-array row.
    pub fn sa_get(&self, i: u32) -> u32 {
        self.salist.get(i as usize)
    }

    /// Resolve one reserved suffix-array row. The aligner calls this for
    /// each index inside a window reserved by `add_on_the_fly`.
    pub fn sa_set(&mut self, i: u32, off: u32) {
        self.salist.set(i as usize, off);
    }

    /// Number of keys in the query multimap.
    pub fn q_num_keys(&self) -> usize {
        self.qmap.len()
    }

    /// Number of keys in the suffix-array multimap.
    pub fn sa_num_keys(&self) -> usize {
        self.samap.len()
    }

    /// Number of reference keys across all runs in `qlist`.
    pub fn q_size(&self) -> usize {
        self.qlist.len()
    }

    /// Number of offset rows across all runs in `salist`.
    pub fn sa_size(&self) -> usize {
        self.salist.len()
    }

    /// Times this tier has turned over since construction.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// True iff this tier is intended for cross-thread use.
    pub fn shared(&self) -> bool {
        self.shared
    }

    /// Walk every resident entry and check the cross-container invariants:
    /// every valid `QVal` window is in bounds of `qlist` and every
    /// referenced key resolves in `samap`; every valid `SAVal` window is
    /// in bounds of `salist`. Unset payloads (leftovers of an aborted
    /// append, which every probe reads as a miss) are skipped. Test and
    /// debugging support; cost is proportional to the tier's contents.
    pub fn assert_consistent(&self) {
        self.qmap.for_each(|_, qv| {
            if !qv.valid() {
                return;
            }
            let refi = qv.offset() as usize;
            let reff = refi + qv.num_ranges() as usize;
            assert!(reff <= self.qlist.len());
            let mut elts = 0u32;
            for i in refi..reff {
                let sak = self.qlist.get(i);
                let sav = self
                    .samap
                    .lookup(&sak)
                    .expect("reference key missing from samap");
                assert!(sav.valid());
                elts += sav.len;
            }
            assert_eq!(elts, qv.num_elts());
        });
        self.samap.for_each(|_, sav| {
            if !sav.valid() {
                return;
            }
            let end = sav.i as usize + sav.len as usize;
            assert!(end <= self.salist.len());
        });
    }
}
