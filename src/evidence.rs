use std::collections::BTreeSet;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::graph::PathGraph;
use crate::kmer::Kmer;
use crate::path_node::{KmerPathNode, Subnode};

/// One (k-mer, position-interval) cell contributed by an evidence item:
/// the k-mer occurs in the read's trace with its start somewhere in
/// `start..=end`, contributing `weight` units of support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerSupportNode {
    pub kmer: Kmer,
    pub start: u64,
    pub end: u64,
    pub weight: u32,
}

impl KmerSupportNode {
    pub fn overlaps(&self, lo: u64, hi: u64) -> bool {
        self.start <= hi && self.end >= lo
    }
}

/// A read (or read pair) contributing k-mer support to the graph: an opaque
/// upstream identifier, the ordered k-mer trace, and for discordant pairs
/// the interval in which the implied breakend lies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerEvidence {
    pub id: String,
    pub support: Vec<KmerSupportNode>,
    pub breakend: Option<(u64, u64)>,
}

impl KmerEvidence {
    pub fn new(id: impl Into<String>, support: Vec<KmerSupportNode>) -> KmerEvidence {
        KmerEvidence {
            id: id.into(),
            support,
            breakend: None,
        }
    }

    pub fn with_breakend(mut self, lo: u64, hi: u64) -> KmerEvidence {
        self.breakend = Some((lo, hi));
        self
    }

    pub fn total_weight(&self) -> u64 {
        self.support.iter().map(|c| c.weight as u64).sum()
    }
}

/// Many-to-many association between evidence items and the graph cells they
/// support. Registration order assigns each item a key used for
/// deterministic iteration everywhere a set of evidence is returned.
#[derive(Default)]
pub struct EvidenceTracker {
    items: FxHashMap<u64, KmerEvidence>,
    by_id: FxHashMap<String, u64>,
    by_kmer: FxHashMap<Kmer, SmallVec<[(u64, u32); 4]>>,
    next_key: u64,
    total_registered_weight: u64,
}

impl EvidenceTracker {
    pub fn new() -> EvidenceTracker {
        EvidenceTracker::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total support weight ever registered, for conservation checks.
    pub fn total_registered_weight(&self) -> u64 {
        self.total_registered_weight
    }

    pub fn register(&mut self, evidence: KmerEvidence) {
        assert!(
            !self.by_id.contains_key(&evidence.id),
            "evidence {} registered twice",
            evidence.id
        );
        let key = self.next_key;
        self.next_key += 1;
        self.total_registered_weight += evidence.total_weight();
        for (idx, cell) in evidence.support.iter().enumerate() {
            self.by_kmer
                .entry(cell.kmer)
                .or_default()
                .push((key, idx as u32));
        }
        self.by_id.insert(evidence.id.clone(), key);
        self.items.insert(key, evidence);
    }

    pub fn unregister(&mut self, id: &str) -> Option<KmerEvidence> {
        let key = self.by_id.remove(id)?;
        self.remove_key(key)
    }

    fn remove_key(&mut self, key: u64) -> Option<KmerEvidence> {
        let evidence = self.items.remove(&key)?;
        for cell in &evidence.support {
            if let Some(bucket) = self.by_kmer.get_mut(&cell.kmer) {
                bucket.retain(|(k, _)| *k != key);
                if bucket.is_empty() {
                    self.by_kmer.remove(&cell.kmer);
                }
            }
        }
        self.by_id.remove(&evidence.id);
        Some(evidence)
    }

    fn matching_keys<I>(&self, cells: I) -> BTreeSet<u64>
    where
        I: IntoIterator<Item = (Kmer, u64, u64)>,
    {
        let mut keys = BTreeSet::new();
        for (kmer, lo, hi) in cells {
            if let Some(bucket) = self.by_kmer.get(&kmer) {
                for &(key, idx) in bucket {
                    let cell = &self.items[&key].support[idx as usize];
                    if cell.overlaps(lo, hi) {
                        keys.insert(key);
                    }
                }
            }
        }
        keys
    }

    /// The evidence whose support cells intersect any of the given
    /// (k-mer, interval) cells, in registration order.
    pub fn support<I>(&self, cells: I) -> Vec<&KmerEvidence>
    where
        I: IntoIterator<Item = (Kmer, u64, u64)>,
    {
        self.matching_keys(cells)
            .into_iter()
            .map(|key| &self.items[&key])
            .collect()
    }

    /// `support` followed by removal of every matched item. Returns the
    /// removed evidence in registration order.
    pub fn untrack<I>(&mut self, cells: I) -> Vec<KmerEvidence>
    where
        I: IntoIterator<Item = (Kmer, u64, u64)>,
    {
        let keys = self.matching_keys(cells);
        keys.into_iter()
            .filter_map(|key| self.remove_key(key))
            .collect()
    }

    /// Support weight the tracker expects the graph to hold for `kmer`
    /// within the position interval. Debug-mode sanity check against node
    /// weights.
    pub fn expected_weight(&self, kmer: Kmer, lo: u64, hi: u64) -> u64 {
        let mut total = 0;
        if let Some(bucket) = self.by_kmer.get(&kmer) {
            for &(key, idx) in bucket {
                let cell = &self.items[&key].support[idx as usize];
                if cell.overlaps(lo, hi) {
                    total += cell.weight as u64;
                }
            }
        }
        total
    }

    /// Does the tracked support for this subnode match the node's recorded
    /// weights offset by offset?
    pub fn matches_expected(&self, graph: &PathGraph, subnode: &Subnode) -> bool {
        let node = graph.node(subnode.node);
        (0..node.len()).all(|off| {
            let lo = subnode.start_lo + off as u64;
            let hi = subnode.start_hi + off as u64;
            let mut expected = self.expected_weight(node.kmer(off), lo, hi);
            for ck in node.collapsed() {
                if ck.offset as usize == off {
                    expected += self.expected_weight(ck.kmer, lo, hi);
                }
            }
            expected == node.weight(off) as u64
        })
    }
}

/// Every (k-mer, interval) cell a whole node spans, primary and collapsed.
pub fn node_cells(node: &KmerPathNode) -> Vec<(Kmer, u64, u64)> {
    let mut cells = Vec::with_capacity(node.len() + node.collapsed().len());
    for off in 0..node.len() {
        cells.push((
            node.kmer(off),
            node.first_start() + off as u64,
            node.first_end() + off as u64,
        ));
    }
    for ck in node.collapsed() {
        cells.push((
            ck.kmer,
            node.first_start() + ck.offset as u64,
            node.first_end() + ck.offset as u64,
        ));
    }
    cells
}

/// The cells spanned by a contig's subnodes, restricted to the narrowed
/// position intervals.
pub fn contig_cells(graph: &PathGraph, subnodes: &[Subnode]) -> Vec<(Kmer, u64, u64)> {
    let mut cells = Vec::new();
    for sub in subnodes {
        let node = graph.node(sub.node);
        for off in 0..node.len() {
            cells.push((node.kmer(off), sub.start_lo + off as u64, sub.start_hi + off as u64));
        }
        for ck in node.collapsed() {
            cells.push((
                ck.kmer,
                sub.start_lo + ck.offset as u64,
                sub.start_hi + ck.offset as u64,
            ));
        }
    }
    cells
}
