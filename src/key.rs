//! 2-bit encoded sequence keys for the cache multimaps.
//!
//! Both maps key on a short DNA string packed two bits per base into a
//! `u64`, so keys compare and copy as plain integers. A sequence longer
//! than 32 bases, or one containing an ambiguous base, cannot be packed;
//! such keys carry a sentinel length and are routed around the maps by the
//! session layer.

/// ASCII nucleotide to 2-bit code: A/a=0, C/c=1, G/g=2, T/t=3, else 4.
pub const NT4_TABLE: [u8; 256] = [
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 0, 4, 1, 4, 4, 4, 2, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 0, 4, 1, 4, 4, 4, 2, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
];

/// Map an ASCII sequence to 2-bit base codes (4 = ambiguous).
pub fn nt4_codes(ascii: &[u8]) -> Vec<u8> {
    ascii.iter().map(|&c| NT4_TABLE[c as usize]).collect()
}

/// Length sentinel marking a key that cannot live in the maps.
const LEN_UNCACHEABLE: u32 = u32::MAX;

/// Longest sequence that fits in the 64-bit packing.
pub const MAX_KEY_LEN: usize = 32;

/// Key for the query multimap: a packed read substring and its length.
///
/// Packing walks the sequence left to right with `seq = (seq << 2) | code`,
/// so the rightmost base lands in the least-significant bit pair. Derived
/// ordering compares `seq` first, then `len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QKey {
    pub seq: u64,
    pub len: u32,
}

/// Key for the suffix-array multimap: a packed reference substring. Same
/// representation as `QKey`; the distinction is purely which map it keys.
pub type SAKey = QKey;

impl Default for QKey {
    fn default() -> Self {
        QKey {
            seq: 0,
            len: LEN_UNCACHEABLE,
        }
    }
}

impl QKey {
    /// Encode a sequence of 2-bit base codes (4 = ambiguous).
    ///
    /// Any code outside `{0, 1, 2, 3}` or a length beyond [`MAX_KEY_LEN`]
    /// yields an uncacheable key.
    pub fn from_codes(codes: &[u8]) -> Self {
        if codes.len() > MAX_KEY_LEN {
            return QKey::default();
        }
        let mut seq = 0u64;
        for &c in codes {
            if c > 3 {
                return QKey::default();
            }
            seq = (seq << 2) | c as u64;
        }
        QKey {
            seq,
            len: codes.len() as u32,
        }
    }

    /// True iff this key can live in a map.
    #[inline]
    pub fn cacheable(&self) -> bool {
        self.len != LEN_UNCACHEABLE
    }

    /// Reconstruct the base codes from the packed bits.
    pub fn to_codes(&self, out: &mut Vec<u8>) {
        debug_assert!(self.cacheable());
        out.clear();
        out.resize(self.len as usize, 0);
        let mut sq = self.seq;
        for i in (0..self.len as usize).rev() {
            out[i] = (sq & 3) as u8;
            sq >>= 2;
        }
    }
}
