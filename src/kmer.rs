use std::fmt;

pub static ALPHABET: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// A bit-packed nucleotide k-mer, two bits per base, most significant bits
/// holding the first base. Equality and hashing are bitwise, so two `Kmer`s
/// from different reads compare equal iff their sequences match.
///
/// The packing supports k up to 32 (64 bits / 2 bits per base).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Kmer(u64);

pub fn encode_base(base: u8) -> Option<u64> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

fn kmer_mask(k: usize) -> u64 {
    debug_assert!(k >= 1 && k <= 32);
    if k == 32 {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

impl Kmer {
    pub fn from_bits(bits: u64) -> Kmer {
        Kmer(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// Pack the first k bases of `seq`. Returns None on ambiguous bases or
    /// if `seq` is shorter than k.
    pub fn from_seq(seq: &[u8], k: usize) -> Option<Kmer> {
        if seq.len() < k {
            return None;
        }
        let mut bits = 0u64;
        for &b in &seq[..k] {
            bits = (bits << 2) | encode_base(b)?;
        }
        Some(Kmer(bits))
    }

    pub fn first_base(self, k: usize) -> u8 {
        ALPHABET[((self.0 >> (2 * (k - 1))) & 3) as usize]
    }

    pub fn last_base(self) -> u8 {
        ALPHABET[(self.0 & 3) as usize]
    }

    /// The k-mer obtained by dropping the first base and appending `base`.
    pub fn extend_right(self, base: u8, k: usize) -> Option<Kmer> {
        let code = encode_base(base)?;
        Some(Kmer(((self.0 << 2) | code) & kmer_mask(k)))
    }

    /// All four k-mers which could follow this one in a walk, i.e. those
    /// overlapping by k-1 bases on the right. For example ACGT -> CGTA,
    /// CGTC, CGTG, CGTT.
    pub fn next_candidates(self, k: usize) -> [Kmer; 4] {
        let stem = (self.0 << 2) & kmer_mask(k);
        [Kmer(stem), Kmer(stem | 1), Kmer(stem | 2), Kmer(stem | 3)]
    }

    /// All four k-mers which could precede this one, overlapping by k-1
    /// bases on the left.
    pub fn prev_candidates(self, k: usize) -> [Kmer; 4] {
        let stem = self.0 >> 2;
        let high = 2 * (k - 1);
        [
            Kmer(stem),
            Kmer(stem | (1 << high)),
            Kmer(stem | (2 << high)),
            Kmer(stem | (3 << high)),
        ]
    }

    pub fn decode(self, k: usize) -> String {
        let mut out = String::with_capacity(k);
        for i in (0..k).rev() {
            out.push(ALPHABET[((self.0 >> (2 * i)) & 3) as usize] as char);
        }
        out
    }
}

/// Wrapper tying a k-mer to its length for display in logs and exports.
pub struct KmerDisplay(pub Kmer, pub usize);

impl fmt::Display for KmerDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.decode(self.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_round_trip() {
        let kmer = Kmer::from_seq(b"ACGT", 4).unwrap();
        assert_eq!(kmer.decode(4), "ACGT");
        assert_eq!(kmer.first_base(4), b'A');
        assert_eq!(kmer.last_base(), b'T');

        let long = Kmer::from_seq(b"ACGTACGTACGTACGTACGTACGTACGTACGT", 32).unwrap();
        assert_eq!(long.decode(32), "ACGTACGTACGTACGTACGTACGTACGTACGT");
    }

    #[test]
    fn test_ambiguous_bases_rejected() {
        assert!(Kmer::from_seq(b"ACGN", 4).is_none());
        assert!(Kmer::from_seq(b"ACG", 4).is_none());
    }

    #[test]
    fn test_extend_right() {
        let kmer = Kmer::from_seq(b"ACGT", 4).unwrap();
        let next = kmer.extend_right(b'G', 4).unwrap();
        assert_eq!(next.decode(4), "CGTG");
    }

    #[test]
    fn test_candidates() {
        let kmer = Kmer::from_seq(b"ACGT", 4).unwrap();
        let next: Vec<String> = kmer.next_candidates(4).iter().map(|k| k.decode(4)).collect();
        assert_eq!(next, vec!["CGTA", "CGTC", "CGTG", "CGTT"]);
        let prev: Vec<String> = kmer.prev_candidates(4).iter().map(|k| k.decode(4)).collect();
        assert_eq!(prev, vec!["AACG", "CACG", "GACG", "TACG"]);
    }

    #[test]
    fn test_candidate_consistency() {
        let kmer = Kmer::from_seq(b"GATTACAG", 8).unwrap();
        for cand in kmer.next_candidates(8) {
            assert!(cand.prev_candidates(8).contains(&kmer));
        }
    }
}
