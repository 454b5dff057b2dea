//! Multi-tier cache of alignment subproblems for short-read seed alignment.
//!
//! During alignment the same question recurs: given a seed (a short read
//! substring), which reference substrings lie within a small edit distance,
//! and where does each one occur in the suffix-array index? For sorted or
//! grouped input, many reads share seeds, and recomputing those answers
//! dominates runtime. This crate turns the recomputation into lookup.
//!
//! The cache is organized in up to three tiers per thread:
//!
//! - **current**: per-read; built incrementally while one read aligns,
//!   turned over on `next_read`.
//! - **local**: per-thread, across reads; unsynchronized.
//! - **shared**: process-wide, across reads; behind a per-tier mutex.
//!
//! The aligner drives a session through [`AlignmentCacheIface`]:
//! `begin_align` probes the current tier, `add_on_the_fly` records each
//! discovered reference substring, and `finish_align` commits the entry
//! and promotes it once, to the nearest across-read tier. Memory per tier
//! comes from a fixed page budget; on exhaustion the tier turns over
//! wholesale rather than evicting piecemeal.

pub mod cache;
pub mod iface;
pub mod key;
pub mod pbtree;
pub mod plist;
pub mod pool;

pub use cache::{AlignmentCache, OFF_UNRESOLVED, OffsetSlice, QVal, SATuple, SAVal};
pub use iface::{AlignmentCacheIface, BeginAlign, SharedCache, Tier};
pub use key::{MAX_KEY_LEN, NT4_TABLE, QKey, SAKey, nt4_codes};
pub use pool::{CACHE_PAGE_SZ, PagePool};

/// Default byte budget for a current-read tier.
pub const DEFAULT_CURRENT_BYTES: u64 = 4 * 1024 * 1024;

/// Default byte budget for a per-thread across-read tier.
pub const DEFAULT_LOCAL_BYTES: u64 = 16 * 1024 * 1024;

/// Default byte budget for the shared across-read tier.
pub const DEFAULT_SHARED_BYTES: u64 = 64 * 1024 * 1024;
