use std::cmp::{Ordering, Reverse};
use std::collections::BTreeSet;

use fxhash::{FxHashMap, FxHashSet};
use tracing::error;

use crate::graph::PathGraph;
use crate::kmer::Kmer;
use crate::path_node::{NodeId, Subnode};

/// Additive score bonus for a path terminating at a reference node. Large
/// enough that reference-anchored paths dominate unanchored ones of any
/// realistic weight.
pub const ANCHORED_SCORE: u64 = 1 << 30;

/// Best known score-maximal prefix path ending at a node: the accumulated
/// non-reference weight, the node's first-k-mer interval as narrowed by the
/// path, the chosen predecessor, and the identity of the path origin for
/// tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoEntry {
    pub weight: u64,
    pub start_lo: u64,
    pub start_hi: u64,
    pub prev: Option<NodeId>,
    pub len_kmers: u32,
    pub path_first_start: u64,
    pub path_first_kmer: Kmer,
    pub start_anchored: bool,
}

type DirtyKey = (u64, Kmer, NodeId);

/// Ordered so the maximum element is the best candidate: score descending,
/// then earlier path start, shorter path, smaller first k-mer, smaller id.
type BestKey = (u64, Reverse<u64>, Reverse<u32>, Reverse<Kmer>, Reverse<NodeId>);

/// Memoized best-scoring-path frontier over the live graph.
///
/// One instance per anchor bonus: the anchored caller uses
/// [`ANCHORED_SCORE`], the unanchored caller a bonus of 1. Both observe the
/// same graph; every structural change must be reported through
/// [`add`](ContigCaller::add), [`touch`](ContigCaller::touch) and
/// [`remove`](ContigCaller::remove) so the memo never diverges from it.
///
/// Entries only ever improve in place; any event that could lower a path
/// score (weight reduction, node removal) first invalidates the affected
/// entries along their chosen-predecessor chains. Invalidated nodes queue
/// in a deterministic dirty set and are rebuilt lazily from surviving
/// predecessors on the next query, so the relaxation is a monotone ascent
/// and terminates even on cyclic adjacency, bounded by `max_path_kmers`.
pub struct ContigCaller {
    bonus: u64,
    max_path_kmers: u32,
    memo: FxHashMap<NodeId, MemoEntry>,
    dirty: BTreeSet<DirtyKey>,
    by_score: BTreeSet<BestKey>,
}

impl ContigCaller {
    pub fn new(bonus: u64, max_path_kmers: u32) -> ContigCaller {
        ContigCaller {
            bonus,
            max_path_kmers,
            memo: FxHashMap::default(),
            dirty: BTreeSet::new(),
            by_score: BTreeSet::new(),
        }
    }

    /// Build a caller already tracking every live node of `graph`.
    pub fn over(graph: &PathGraph, bonus: u64, max_path_kmers: u32) -> ContigCaller {
        let mut caller = ContigCaller::new(bonus, max_path_kmers);
        for id in graph.iter_ids() {
            caller.add(graph, id);
        }
        caller
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    pub fn iter_memo(&self) -> impl Iterator<Item = (NodeId, &MemoEntry)> {
        self.memo.iter().map(|(&id, e)| (id, e))
    }

    fn dirty_key(graph: &PathGraph, id: NodeId) -> DirtyKey {
        let node = graph.node(id);
        (node.first_start(), node.first_kmer(), id)
    }

    fn best_key(&self, graph: &PathGraph, id: NodeId, entry: &MemoEntry) -> BestKey {
        (
            self.selection_score(graph, id, entry),
            Reverse(entry.path_first_start),
            Reverse(entry.len_kmers),
            Reverse(entry.path_first_kmer),
            Reverse(id),
        )
    }

    /// Path score as used for best-contig selection: accumulated
    /// non-reference weight plus the bonus for each reference terminal end.
    fn selection_score(&self, graph: &PathGraph, id: NodeId, entry: &MemoEntry) -> u64 {
        let mut score = entry.weight;
        if entry.start_anchored {
            score += self.bonus;
        }
        if graph.node(id).is_reference() {
            score += self.bonus;
        }
        score
    }

    /// Register a newly inserted node. Its entry, and transitively those of
    /// its successors, are built on the next query.
    pub fn add(&mut self, graph: &PathGraph, id: NodeId) {
        self.dirty.insert(Self::dirty_key(graph, id));
    }

    /// Report an in-place weight reduction on a live node. Every memoized
    /// path running through it is invalidated and rebuilt lazily.
    pub fn touch(&mut self, graph: &PathGraph, id: NodeId) {
        self.invalidate(graph, id);
        self.dirty.insert(Self::dirty_key(graph, id));
    }

    /// Drop the given nodes from the memo, invalidating every memoized path
    /// traversing any of them. Must be called while the nodes are still in
    /// the graph, before the structural removal.
    pub fn remove(&mut self, graph: &PathGraph, removed: &[NodeId]) {
        let removed_set: FxHashSet<NodeId> = removed.iter().copied().collect();
        for &r in removed {
            self.invalidate(graph, r);
            // successors may have lost their best predecessor even when
            // their entries did not traverse r
            for &s in graph.next(r) {
                if !removed_set.contains(&s) {
                    self.dirty.insert(Self::dirty_key(graph, s));
                }
            }
            self.dirty.remove(&Self::dirty_key(graph, r));
        }
    }

    /// Remove the memo entry of `id` and, transitively, of every node whose
    /// memoized path passes through it (successors whose chosen predecessor
    /// link points back at the invalidated node).
    fn invalidate(&mut self, graph: &PathGraph, id: NodeId) {
        let Some(entry) = self.memo.remove(&id) else {
            return;
        };
        self.by_score.remove(&self.best_key(graph, id, &entry));
        let mut stack = vec![id];
        while let Some(r) = stack.pop() {
            for &s in graph.next(r) {
                let traverses = self.memo.get(&s).map_or(false, |e| e.prev == Some(r));
                if traverses {
                    let entry = self.memo.remove(&s).unwrap();
                    self.by_score.remove(&self.best_key(graph, s, &entry));
                    self.dirty.insert(Self::dirty_key(graph, s));
                    stack.push(s);
                }
            }
        }
    }

    /// Drain the dirty set in ascending position order. Each node's entry is
    /// recomputed from its predecessors' memos and kept only if better than
    /// the stored one; improvements cascade to successors. Paths are
    /// node-simple and capped at `max_path_kmers`, so the ascent terminates
    /// even on cyclic adjacency.
    fn process(&mut self, graph: &PathGraph) {
        while let Some(&key) = self.dirty.iter().next() {
            self.dirty.remove(&key);
            let id = key.2;
            if !graph.contains(id) {
                continue;
            }
            let candidate = self.compute_entry(graph, id);
            let improved = match self.memo.get(&id) {
                None => true,
                Some(old) => self.entry_cmp(&candidate, old) == Ordering::Greater,
            };
            if !improved {
                continue;
            }
            if let Some(old) = self.memo.get(&id) {
                self.by_score.remove(&self.best_key(graph, id, old));
            }
            if candidate.weight > 0 {
                let key = self.best_key(graph, id, &candidate);
                self.by_score.insert(key);
            }
            self.memo.insert(id, candidate);
            for &s in graph.next(id) {
                self.dirty.insert(Self::dirty_key(graph, s));
            }
        }
    }

    /// Does the memoized path ending at `from` already visit `needle`?
    /// Paths are node-simple: a node contributes to a path at most once, so
    /// prefix chains stay acyclic and traceback stays finite. The walk is
    /// capped defensively; an over-long chain counts as a hit.
    fn chain_contains(&self, from: NodeId, needle: NodeId) -> bool {
        let mut cur = Some(from);
        let mut steps = 0u32;
        while let Some(c) = cur {
            if c == needle {
                return true;
            }
            steps += 1;
            if steps > self.max_path_kmers {
                error!("memoized path chain exceeds the path length cap");
                return true;
            }
            cur = self.memo.get(&c).and_then(|e| e.prev);
        }
        false
    }

    fn compute_entry(&self, graph: &PathGraph, id: NodeId) -> MemoEntry {
        let node = graph.node(id);
        let own_weight = if node.is_reference() {
            0
        } else {
            node.weight_total()
        };
        // source path: the node opens its own path
        let mut best = MemoEntry {
            weight: own_weight,
            start_lo: node.first_start(),
            start_hi: node.first_end(),
            prev: None,
            len_kmers: node.len() as u32,
            path_first_start: node.first_start(),
            path_first_kmer: node.first_kmer(),
            start_anchored: node.is_reference(),
        };
        for &pid in graph.prev(id) {
            let Some(pe) = self.memo.get(&pid) else {
                continue;
            };
            if self.chain_contains(pid, id) {
                continue;
            }
            let shift = graph.node(pid).len() as u64;
            let lo = (pe.start_lo + shift).max(node.first_start());
            let hi = (pe.start_hi + shift).min(node.first_end());
            if lo > hi {
                continue;
            }
            let len = pe.len_kmers.saturating_add(node.len() as u32);
            if len > self.max_path_kmers {
                continue;
            }
            let candidate = MemoEntry {
                weight: pe.weight + own_weight,
                start_lo: lo,
                start_hi: hi,
                prev: Some(pid),
                len_kmers: len,
                path_first_start: pe.path_first_start,
                path_first_kmer: pe.path_first_kmer,
                start_anchored: pe.start_anchored,
            };
            if self.entry_cmp(&candidate, &best) == Ordering::Greater {
                best = candidate;
            }
        }
        best
    }

    /// Greater means `a` is the better prefix path for the same terminal
    /// node. The terminal-end bonus is identical for both and cancels out.
    fn entry_cmp(&self, a: &MemoEntry, b: &MemoEntry) -> Ordering {
        let a_score = a.weight + if a.start_anchored { self.bonus } else { 0 };
        let b_score = b.weight + if b.start_anchored { self.bonus } else { 0 };
        a_score
            .cmp(&b_score)
            .then(b.path_first_start.cmp(&a.path_first_start))
            .then(b.len_kmers.cmp(&a.len_kmers))
            .then(b.path_first_kmer.cmp(&a.path_first_kmer))
            .then(b.prev.cmp(&a.prev))
    }

    /// The current best contig, provided its final subnode's latest
    /// last-k-mer start is below `cutoff`, i.e. no pending input could still
    /// extend, merge into, or outscore it. Returns None when the global best
    /// is not yet finalised; the driver must then load more input.
    pub fn best_contig(&mut self, graph: &PathGraph, cutoff: u64) -> Option<Vec<Subnode>> {
        self.process(graph);
        let &(_, _, _, _, Reverse(id)) = self.by_score.iter().next_back()?;
        let entry = self.memo[&id];
        let last_end = entry.start_hi + graph.node(id).len() as u64 - 1;
        if last_end >= cutoff {
            return None;
        }
        Some(self.traceback(graph, id))
    }

    /// Materialize the memoized path ending at `id` into subnodes, narrowing
    /// each predecessor's interval backwards from the terminal node.
    fn traceback(&self, graph: &PathGraph, id: NodeId) -> Vec<Subnode> {
        let entry = &self.memo[&id];
        let mut subnodes = vec![Subnode {
            node: id,
            start_lo: entry.start_lo,
            start_hi: entry.start_hi,
        }];
        let mut cur = entry.prev;
        while let Some(pid) = cur {
            let pe = &self.memo[&pid];
            let shift = graph.node(pid).len() as u64;
            let succ = subnodes.last().unwrap();
            let lo = succ.start_lo.saturating_sub(shift).max(pe.start_lo);
            let hi = succ.start_hi.saturating_sub(shift).min(pe.start_hi);
            debug_assert!(lo <= hi, "path interval narrowed to nothing in traceback");
            subnodes.push(Subnode {
                node: pid,
                start_lo: lo,
                start_hi: hi,
            });
            cur = pe.prev;
        }
        subnodes.reverse();
        subnodes
    }

    /// Debug check: a freshly rebuilt caller over the same graph must agree
    /// with the memoized state about the best finalised candidate. Logged at
    /// error level on disagreement; fatal under debug assertions.
    pub fn sanity_check_frontier(&mut self, graph: &PathGraph, cutoff: u64) -> bool {
        let mut fresh = ContigCaller::over(graph, self.bonus, self.max_path_kmers);
        let ours = self.best_contig(graph, cutoff);
        let theirs = fresh.best_contig(graph, cutoff);
        let consistent = ours == theirs;
        if !consistent {
            error!(
                "memoized frontier disagrees with fresh recomputation at cutoff {}",
                cutoff
            );
            debug_assert!(consistent, "memoized frontier inconsistent");
        }
        consistent
    }
}
