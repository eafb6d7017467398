use std::collections::BTreeSet;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::kmer::Kmer;
use crate::path_node::{KmerPathNode, NodeId};

pub struct NodeEntry {
    pub node: KmerPathNode,
    pub prev: SmallVec<[NodeId; 4]>,
    pub next: SmallVec<[NodeId; 4]>,
}

/// Dual index of the live path nodes.
///
/// Nodes live in an arena of tombstoned slots addressed by `NodeId`; the
/// adjacency lists hold handles, never owning links, so cyclic adjacency
/// (repeats) cannot leak. A `BTreeSet` orders live nodes by
/// `(first_start, first_kmer, id)` for deterministic iteration, and a hash
/// bucket maps every primary and collapsed k-mer to its `(node, offset)`
/// cells for adjacency resolution and evidence lookup.
pub struct PathGraph {
    k: usize,
    slots: Vec<Option<NodeEntry>>,
    live: usize,
    by_position: BTreeSet<(u64, Kmer, NodeId)>,
    by_kmer: FxHashMap<Kmer, SmallVec<[(NodeId, u32); 4]>>,
    max_seen_first_start: u64,
    max_bucket: usize,
}

impl PathGraph {
    pub fn new(k: usize) -> PathGraph {
        assert!(k >= 2 && k <= 32, "k must be in 2..=32");
        PathGraph {
            k,
            slots: Vec::new(),
            live: 0,
            by_position: BTreeSet::new(),
            by_kmer: FxHashMap::default(),
            max_seen_first_start: 0,
            max_bucket: 0,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn size(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn max_bucket(&self) -> usize {
        self.max_bucket
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.0 as usize)
            .map_or(false, |slot| slot.is_some())
    }

    pub fn entry(&self, id: NodeId) -> &NodeEntry {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("access to removed graph node")
    }

    fn entry_mut(&mut self, id: NodeId) -> &mut NodeEntry {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("access to removed graph node")
    }

    pub fn node(&self, id: NodeId) -> &KmerPathNode {
        &self.entry(id).node
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut KmerPathNode {
        &mut self.entry_mut(id).node
    }

    pub fn prev(&self, id: NodeId) -> &[NodeId] {
        &self.entry(id).prev
    }

    pub fn next(&self, id: NodeId) -> &[NodeId] {
        &self.entry(id).next
    }

    /// Admit a node from the position-ordered input stream. Panics if the
    /// stream went backwards or the node is already present; both indicate
    /// an upstream bug.
    pub fn insert(&mut self, node: KmerPathNode) -> NodeId {
        assert!(
            node.first_start() >= self.max_seen_first_start,
            "path node stream out of order: {} after {}",
            node.first_start(),
            self.max_seen_first_start
        );
        self.assert_not_present(&node);
        self.max_seen_first_start = node.first_start();
        self.admit(node)
    }

    /// Re-admit a split survivor at its (possibly already passed) position.
    pub fn reinsert(&mut self, node: KmerPathNode) -> NodeId {
        self.admit(node)
    }

    fn assert_not_present(&self, node: &KmerPathNode) {
        if let Some(bucket) = self.by_kmer.get(&node.first_kmer()) {
            for &(oid, off) in bucket {
                if off != 0 {
                    continue;
                }
                let other = &self.entry(oid).node;
                assert!(
                    other.first_kmer() != node.first_kmer()
                        || node.first_start() > other.first_end()
                        || node.first_end() < other.first_start(),
                    "duplicate path node insertion at {}",
                    node.first_start()
                );
            }
        }
    }

    fn admit(&mut self, node: KmerPathNode) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        for (off, &km) in node.kmers().iter().enumerate() {
            self.index_kmer(km, id, off as u32);
        }
        for ck in node.collapsed() {
            self.index_kmer(ck.kmer, id, ck.offset);
        }
        self.by_position
            .insert((node.first_start(), node.first_kmer(), id));
        self.slots.push(Some(NodeEntry {
            node,
            prev: SmallVec::new(),
            next: SmallVec::new(),
        }));
        self.live += 1;

        let (prevs, nexts) = self.resolve_adjacency(id);
        for &p in &prevs {
            self.entry_mut(p).next.push(id);
            self.entry_mut(p).next.sort();
        }
        for &n in &nexts {
            self.entry_mut(n).prev.push(id);
            self.entry_mut(n).prev.sort();
        }
        let entry = self.entry_mut(id);
        entry.prev = prevs;
        entry.next.extend_from_slice(&nexts);
        entry.next.sort();
        entry.next.dedup();
        entry.prev.sort();
        entry.prev.dedup();
        id
    }

    fn index_kmer(&mut self, kmer: Kmer, id: NodeId, offset: u32) {
        let bucket = self.by_kmer.entry(kmer).or_default();
        bucket.push((id, offset));
        if bucket.len() > self.max_bucket {
            self.max_bucket = bucket.len();
        }
    }

    /// Predecessors and successors of `id` among the live nodes, resolved
    /// from terminal k-mers. Only primary terminal k-mers form edges;
    /// collapsed bucket entries are skipped.
    fn resolve_adjacency(&self, id: NodeId) -> (SmallVec<[NodeId; 4]>, SmallVec<[NodeId; 4]>) {
        let node = &self.entry(id).node;
        let mut prevs: SmallVec<[NodeId; 4]> = SmallVec::new();
        for cand in node.first_kmer().prev_candidates(self.k) {
            if let Some(bucket) = self.by_kmer.get(&cand) {
                for &(oid, off) in bucket {
                    let other = &self.entry(oid).node;
                    if off as usize + 1 == other.len()
                        && other.kmer(off as usize) == cand
                        && other.can_precede(node, self.k)
                    {
                        prevs.push(oid);
                    }
                }
            }
        }
        let mut nexts: SmallVec<[NodeId; 4]> = SmallVec::new();
        for cand in node.last_kmer().next_candidates(self.k) {
            if let Some(bucket) = self.by_kmer.get(&cand) {
                for &(oid, off) in bucket {
                    let other = &self.entry(oid).node;
                    if off == 0
                        && other.first_kmer() == cand
                        && node.can_precede(other, self.k)
                    {
                        nexts.push(oid);
                    }
                }
            }
        }
        prevs.sort();
        prevs.dedup();
        nexts.sort();
        nexts.dedup();
        (prevs, nexts)
    }

    pub fn remove(&mut self, id: NodeId) -> KmerPathNode {
        let entry = self.slots[id.0 as usize]
            .take()
            .expect("remove of dead graph node");
        self.live -= 1;
        self.by_position
            .remove(&(entry.node.first_start(), entry.node.first_kmer(), id));
        for &km in entry.node.kmers() {
            self.unindex_kmer(km, id);
        }
        for ck in entry.node.collapsed() {
            self.unindex_kmer(ck.kmer, id);
        }
        for &p in &entry.prev {
            if p != id {
                self.entry_mut(p).next.retain(|x| *x != id);
            }
        }
        for &n in &entry.next {
            if n != id {
                self.entry_mut(n).prev.retain(|x| *x != id);
            }
        }
        entry.node
    }

    fn unindex_kmer(&mut self, kmer: Kmer, id: NodeId) {
        if let Some(bucket) = self.by_kmer.get_mut(&kmer) {
            bucket.retain(|(oid, _)| *oid != id);
            if bucket.is_empty() {
                self.by_kmer.remove(&kmer);
            }
        }
    }

    /// All live `(node, offset)` cells whose k-mer (primary or collapsed)
    /// equals `kmer`, in deterministic id order.
    pub fn lookup_by_kmer(&self, kmer: Kmer) -> Vec<(NodeId, u32)> {
        let mut cells: Vec<(NodeId, u32)> = self
            .by_kmer
            .get(&kmer)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default();
        cells.sort();
        cells
    }

    /// Live node ids ordered by `(first_start, first_kmer, id)`.
    pub fn iter_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.by_position.iter().map(|&(_, _, id)| id)
    }

    pub fn range_by_first_start(
        &self,
        from: u64,
        to: u64,
    ) -> impl Iterator<Item = NodeId> + '_ {
        self.by_position
            .range(
                (from, Kmer::from_bits(0), NodeId(0))
                    ..=(to, Kmer::from_bits(u64::MAX), NodeId(u32::MAX)),
            )
            .map(|&(_, _, id)| id)
    }

    pub fn first(&self) -> Option<NodeId> {
        self.by_position.iter().next().map(|&(_, _, id)| id)
    }
}
