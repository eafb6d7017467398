use smallvec::SmallVec;

use crate::kmer::Kmer;

/// An auxiliary k-mer merged into a path node by upstream error correction.
/// It shares the position interval of the primary k-mer at `offset` and is
/// tracked so repeat detection and evidence lookup still see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollapsedKmer {
    pub offset: u32,
    pub kmer: Kmer,
}

/// A maximal linear run of consecutive k-mers sharing one support interval.
///
/// `first_start..=first_end` is the inclusive interval of genomic positions
/// at which the first k-mer can start; the k-mer at offset `o` then starts
/// in `first_start + o ..= first_end + o`. `weights` is parallel to `kmers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerPathNode {
    kmers: Vec<Kmer>,
    weights: Vec<u32>,
    first_start: u64,
    first_end: u64,
    reference: bool,
    collapsed: SmallVec<[CollapsedKmer; 2]>,
}

impl KmerPathNode {
    pub fn new(
        kmers: Vec<Kmer>,
        weights: Vec<u32>,
        first_start: u64,
        first_end: u64,
        reference: bool,
    ) -> KmerPathNode {
        assert!(!kmers.is_empty(), "path node must contain at least one k-mer");
        assert_eq!(kmers.len(), weights.len(), "weights must parallel kmers");
        assert!(first_start <= first_end, "inverted position interval");
        KmerPathNode {
            kmers,
            weights,
            first_start,
            first_end,
            reference,
            collapsed: SmallVec::new(),
        }
    }

    pub fn push_collapsed(&mut self, offset: u32, kmer: Kmer) {
        assert!((offset as usize) < self.kmers.len());
        self.collapsed.push(CollapsedKmer { offset, kmer });
    }

    pub fn len(&self) -> usize {
        self.kmers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kmers.is_empty()
    }

    pub fn kmers(&self) -> &[Kmer] {
        &self.kmers
    }

    pub fn kmer(&self, offset: usize) -> Kmer {
        self.kmers[offset]
    }

    pub fn first_kmer(&self) -> Kmer {
        self.kmers[0]
    }

    pub fn last_kmer(&self) -> Kmer {
        *self.kmers.last().unwrap()
    }

    pub fn weight(&self, offset: usize) -> u32 {
        self.weights[offset]
    }

    pub fn weight_total(&self) -> u64 {
        self.weights.iter().map(|&w| w as u64).sum()
    }

    pub fn min_weight(&self) -> u32 {
        *self.weights.iter().min().unwrap()
    }

    pub fn first_start(&self) -> u64 {
        self.first_start
    }

    pub fn first_end(&self) -> u64 {
        self.first_end
    }

    /// Earliest start of the last k-mer.
    pub fn last_start(&self) -> u64 {
        self.first_start + self.kmers.len() as u64 - 1
    }

    /// Latest start of the last k-mer.
    pub fn last_end(&self) -> u64 {
        self.first_end + self.kmers.len() as u64 - 1
    }

    pub fn is_reference(&self) -> bool {
        self.reference
    }

    pub fn collapsed(&self) -> &[CollapsedKmer] {
        &self.collapsed
    }

    /// Can `next` directly follow this node? True iff its first k-mer is a
    /// one-base extension of our last k-mer and the position intervals still
    /// overlap after the unit shift.
    pub fn can_precede(&self, next: &KmerPathNode, k: usize) -> bool {
        let extends = self
            .last_kmer()
            .next_candidates(k)
            .contains(&next.first_kmer());
        extends
            && next.first_start <= self.last_end() + 1
            && next.first_end >= self.last_start() + 1
    }

    pub fn subtract_weight(&mut self, offset: usize, amount: u32) {
        let w = &mut self.weights[offset];
        *w = w.saturating_sub(amount);
    }

    /// Consume this node and return the replacement nodes left after
    /// discarding every zero-weight offset. Contiguous surviving runs become
    /// independent nodes at their shifted positions; collapsed k-mers follow
    /// the offset they were merged into. An entirely drained node yields an
    /// empty vector.
    pub fn split_surviving(self) -> Vec<KmerPathNode> {
        let mut out = Vec::new();
        let mut run_start: Option<usize> = None;
        for offset in 0..=self.kmers.len() {
            let alive = offset < self.kmers.len() && self.weights[offset] > 0;
            match (run_start, alive) {
                (None, true) => run_start = Some(offset),
                (Some(start), false) => {
                    out.push(self.slice(start, offset));
                    run_start = None;
                }
                _ => {}
            }
        }
        out
    }

    fn slice(&self, start: usize, end: usize) -> KmerPathNode {
        let mut node = KmerPathNode {
            kmers: self.kmers[start..end].to_vec(),
            weights: self.weights[start..end].to_vec(),
            first_start: self.first_start + start as u64,
            first_end: self.first_end + start as u64,
            reference: self.reference,
            collapsed: SmallVec::new(),
        };
        for ck in &self.collapsed {
            let off = ck.offset as usize;
            if off >= start && off < end {
                node.collapsed.push(CollapsedKmer {
                    offset: (off - start) as u32,
                    kmer: ck.kmer,
                });
            }
        }
        node
    }
}

/// A path node restricted to a sub-interval of its first-k-mer positions.
/// A contig is an ordered sequence of subnodes whose concatenation forms a
/// connected path in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnode {
    pub node: NodeId,
    pub start_lo: u64,
    pub start_hi: u64,
}

/// Stable handle into the graph arena. Ids are allocation-ordered and never
/// reused, which keeps every id-based tie-break deterministic across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);
