use std::iter::Peekable;

use tracing::{debug, error, warn};

use crate::caller::{ContigCaller, ANCHORED_SCORE};
use crate::config::AssemblerConfig;
use crate::evidence::{contig_cells, node_cells, EvidenceTracker, KmerEvidence};
use crate::export::Exporter;
use crate::extension::{extend_anchors, repeat_fix, RepeatFix};
use crate::graph::PathGraph;
use crate::path_node::{KmerPathNode, NodeId, Subnode};
use crate::record::{build_record, AssemblyRecord};

/// How far (in multiples of `max_evidence_distance`) the leftmost live node
/// may lag the input frontier before the orphan sweep runs.
pub const ORPHAN_EVIDENCE_MULTIPLE: u64 = 128;

/// Advancements without a finalised anchored path before misassembly
/// detection engages.
pub const ADVANCEMENT_TRIGGER: u32 = 2;

/// One item of the input stream: a path node, plus the evidence items whose
/// first supported node this is. Nodes must arrive in non-decreasing
/// `first_start` order with weights already aggregated.
pub struct PathNodeInput {
    pub node: KmerPathNode,
    pub evidence: Vec<KmerEvidence>,
}

impl PathNodeInput {
    pub fn bare(node: KmerPathNode) -> PathNodeInput {
        PathNodeInput {
            node,
            evidence: Vec::new(),
        }
    }
}

/// Read-only monitoring counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub active_nodes: usize,
    pub max_kmer_bucket: usize,
    pub consumed_input: u64,
    pub input_frontier: u64,
    pub contigs_called: u64,
}

enum Step {
    Emitted(AssemblyRecord),
    Skip,
    Done,
}

/// The streaming assembly driver: admits path nodes into the graph, keeps
/// the memoized callers in sync, and yields assembled contigs lazily in
/// non-decreasing order of their called position.
///
/// Single-threaded and cooperatively driven: all work happens inside
/// [`Iterator::next`] pulls, and dropping the iterator releases the graph,
/// the memoization tables and the evidence tracker.
pub struct Assembler<I: Iterator<Item = PathNodeInput>> {
    config: AssemblerConfig,
    input: Peekable<I>,
    graph: PathGraph,
    tracker: EvidenceTracker,
    anchored: ContigCaller,
    unanchored: Option<ContigCaller>,
    exporter: Option<Exporter>,
    frontier: u64,
    consumed: u64,
    contigs_called: u64,
    advancements_without_contig: u32,
    done: bool,
}

impl<I: Iterator<Item = PathNodeInput>> Assembler<I> {
    pub fn new<T>(config: AssemblerConfig, input: T) -> Assembler<I>
    where
        T: IntoIterator<Item = PathNodeInput, IntoIter = I>,
    {
        let exporter = config.export_dir.clone().map(Exporter::new);
        let graph = PathGraph::new(config.k);
        let anchored = ContigCaller::new(ANCHORED_SCORE, config.max_path_kmers());
        Assembler {
            input: input.into_iter().peekable(),
            graph,
            tracker: EvidenceTracker::new(),
            anchored,
            unanchored: None,
            exporter,
            frontier: 0,
            consumed: 0,
            contigs_called: 0,
            advancements_without_contig: 0,
            done: false,
            config,
        }
    }

    pub fn stats(&self) -> AssemblyStats {
        AssemblyStats {
            active_nodes: self.graph.size(),
            max_kmer_bucket: self.graph.max_bucket(),
            consumed_input: self.consumed,
            input_frontier: self.frontier,
            contigs_called: self.contigs_called,
        }
    }

    pub fn graph(&self) -> &PathGraph {
        &self.graph
    }

    pub fn tracker(&self) -> &EvidenceTracker {
        &self.tracker
    }

    /// Positions strictly below this can no longer be touched by pending
    /// input; paths ending below it are finalised.
    fn cutoff(&mut self) -> u64 {
        match self.input.peek() {
            Some(item) => {
                self.frontier = item.node.first_start();
                self.frontier
                    .saturating_sub(self.config.max_evidence_distance)
            }
            None => {
                self.frontier = u64::MAX;
                u64::MAX
            }
        }
    }

    fn step(&mut self) -> Step {
        if self.done {
            return Step::Done;
        }
        let cutoff = self.cutoff();
        if let Some(contig) = self.anchored.best_contig(&self.graph, cutoff) {
            self.advancements_without_contig = 0;
            self.unanchored = None;
            return self.call_contig(contig);
        }
        if self.input.peek().is_none() {
            self.finish();
            self.done = true;
            return Step::Done;
        }
        self.advance();
        Step::Skip
    }

    /// Load the next input batch: every node within
    /// `max_evidence_distance + 1` of the next pending position.
    fn advance(&mut self) {
        let next_pos = self
            .input
            .peek()
            .map(|item| item.node.first_start())
            .expect("advance called with exhausted input");
        self.load_until(next_pos + self.config.max_evidence_distance + 1);
        self.advancements_without_contig += 1;
        self.remove_orphans();
        if self.advancements_without_contig >= ADVANCEMENT_TRIGGER {
            self.suppress_misassemblies();
        }
    }

    fn load_until(&mut self, limit: u64) {
        while let Some(item) = self.input.peek() {
            if item.node.first_start() > limit {
                break;
            }
            let item = self.input.next().unwrap();
            let id = self.graph.insert(item.node);
            self.anchored.add(&self.graph, id);
            if let Some(un) = self.unanchored.as_mut() {
                un.add(&self.graph, id);
            }
            for ev in item.evidence {
                self.tracker.register(ev);
            }
            self.consumed += 1;
        }
        self.frontier = self
            .input
            .peek()
            .map(|item| item.node.first_start())
            .unwrap_or(u64::MAX);
    }

    fn call_contig(&mut self, contig: Vec<Subnode>) -> Step {
        let fixed = match repeat_fix(&self.graph, &self.tracker, &contig) {
            RepeatFix::Clean => contig,
            RepeatFix::Corrected(corrected) => {
                debug!(
                    "{}: repeat correction trimmed contig at {} to {} subnodes",
                    self.config.contig_name,
                    contig[0].start_lo,
                    corrected.len()
                );
                corrected
            }
            RepeatFix::Emptied => {
                debug!(
                    "{}: contig at {} emptied by repeat correction",
                    self.config.contig_name, contig[0].start_lo
                );
                self.consume_contig(&contig);
                return Step::Skip;
            }
        };

        let k = self.config.k as u64;
        let contig_kmers: u64 = fixed
            .iter()
            .map(|s| self.graph.node(s.node).len() as u64)
            .sum();
        let target = (contig_kmers + k - 1).max(self.config.max_anchor_length);

        // make sure everything the forward anchor could reach is loaded
        let last = *fixed.last().unwrap();
        let last_end = last.start_hi + self.graph.node(last.node).len() as u64 - 1;
        self.load_until(last_end + target + self.config.max_evidence_distance);

        let extended = extend_anchors(&self.graph, &fixed, target);

        let core: Vec<Subnode> = fixed
            .iter()
            .copied()
            .filter(|s| !self.graph.node(s.node).is_reference())
            .collect();
        let record = {
            let support = self.tracker.support(contig_cells(&self.graph, &core));
            build_record(
                &self.graph,
                &extended,
                &support,
                self.config.k,
                self.config.reference_index,
                format!("{}_{}", self.config.contig_name, self.contigs_called),
            )
        };
        if let Some(exporter) = &self.exporter {
            exporter.export_memo(&self.graph, &self.anchored, self.contigs_called);
            exporter.export_graph(&self.graph, self.contigs_called);
        }
        let called_start = fixed[0].start_lo;
        self.consume_contig(&fixed);
        match record {
            Some(mut record) => {
                // order outputs by the called contig, not the anchor flank
                record.first_start = called_start;
                self.contigs_called += 1;
                Step::Emitted(record)
            }
            None => Step::Skip,
        }
    }

    /// Untrack the evidence supporting the non-reference part of a called
    /// contig and subtract its support cells from the graph, splitting any
    /// node drained to zero. Falls back to direct node removal when no
    /// evidence is recoverable, so a call always makes progress.
    fn consume_contig(&mut self, subnodes: &[Subnode]) {
        let core: Vec<Subnode> = subnodes
            .iter()
            .copied()
            .filter(|s| !self.graph.node(s.node).is_reference())
            .collect();
        if core.is_empty() {
            return;
        }
        if cfg!(debug_assertions) {
            for sub in &core {
                if !self.tracker.matches_expected(&self.graph, sub) {
                    debug!(
                        "{}: tracked support does not match node weights at {}",
                        self.config.contig_name, sub.start_lo
                    );
                }
            }
        }
        let removed = self.tracker.untrack(contig_cells(&self.graph, &core));
        if removed.is_empty() {
            error!(
                "{}: contig at {} has no recoverable evidence; removing its nodes directly",
                self.config.contig_name, core[0].start_lo
            );
            let mut ids: Vec<NodeId> = core.iter().map(|s| s.node).collect();
            ids.sort();
            ids.dedup();
            self.drop_nodes(&ids);
            return;
        }

        let mut touched: Vec<NodeId> = Vec::new();
        for ev in &removed {
            for cell in &ev.support {
                let hit = self
                    .graph
                    .lookup_by_kmer(cell.kmer)
                    .into_iter()
                    .find(|&(nid, off)| {
                        let node = self.graph.node(nid);
                        cell.overlaps(
                            node.first_start() + off as u64,
                            node.first_end() + off as u64,
                        )
                    });
                match hit {
                    Some((nid, off)) => {
                        self.graph
                            .node_mut(nid)
                            .subtract_weight(off as usize, cell.weight);
                        touched.push(nid);
                    }
                    None => debug!(
                        "{}: support cell at {} has no covering node",
                        self.config.contig_name, cell.start
                    ),
                }
            }
        }
        touched.sort();
        touched.dedup();
        for &nid in &touched {
            self.anchored.touch(&self.graph, nid);
            if let Some(un) = self.unanchored.as_mut() {
                un.touch(&self.graph, nid);
            }
        }
        let drained: Vec<NodeId> = touched
            .into_iter()
            .filter(|&nid| self.graph.node(nid).min_weight() == 0)
            .collect();
        for nid in drained {
            self.split_node(nid);
        }
    }

    /// Replace a node containing drained offsets by its surviving slices.
    fn split_node(&mut self, nid: NodeId) {
        self.anchored.remove(&self.graph, &[nid]);
        if let Some(un) = self.unanchored.as_mut() {
            un.remove(&self.graph, &[nid]);
        }
        let node = self.graph.remove(nid);
        for part in node.split_surviving() {
            let id = self.graph.reinsert(part);
            self.anchored.add(&self.graph, id);
            if let Some(un) = self.unanchored.as_mut() {
                un.add(&self.graph, id);
            }
        }
    }

    fn drop_nodes(&mut self, ids: &[NodeId]) {
        self.anchored.remove(&self.graph, ids);
        if let Some(un) = self.unanchored.as_mut() {
            un.remove(&self.graph, ids);
        }
        for &id in ids {
            self.graph.remove(id);
        }
    }

    /// Sweep out reference-only clusters that lag so far behind the frontier
    /// that no pending input could ever connect to them.
    fn remove_orphans(&mut self) {
        let d = self.config.max_evidence_distance;
        let Some(first) = self.graph.first() else {
            return;
        };
        let lag_bound = self
            .graph
            .node(first)
            .first_start()
            .saturating_add(ORPHAN_EVIDENCE_MULTIPLE.saturating_mul(d));
        if lag_bound >= self.frontier {
            return;
        }

        let ids: Vec<NodeId> = self.graph.iter_ids().collect();
        let mut to_remove: Vec<NodeId> = Vec::new();
        let mut cluster: Vec<NodeId> = Vec::new();
        let mut cluster_end = 0u64;
        let mut all_reference = true;
        let mut flush = |cluster: &mut Vec<NodeId>,
                         cluster_end: u64,
                         all_reference: bool,
                         to_remove: &mut Vec<NodeId>| {
            if all_reference && cluster_end.saturating_add(d) < self.frontier {
                to_remove.append(cluster);
            } else {
                cluster.clear();
            }
        };
        for id in ids {
            let node = self.graph.node(id);
            let (start, end, reference) =
                (node.first_start(), node.last_end(), node.is_reference());
            if !cluster.is_empty() && start > cluster_end.saturating_add(d) {
                flush(&mut cluster, cluster_end, all_reference, &mut to_remove);
                cluster_end = 0;
                all_reference = true;
            }
            cluster.push(id);
            cluster_end = cluster_end.max(end);
            all_reference &= reference;
        }
        flush(&mut cluster, cluster_end, all_reference, &mut to_remove);

        if to_remove.is_empty() {
            return;
        }
        debug!(
            "{}: removing {} orphaned reference nodes",
            self.config.contig_name,
            to_remove.len()
        );
        for &id in &to_remove {
            let cells = node_cells(self.graph.node(id));
            let _ = self.tracker.untrack(cells);
        }
        self.drop_nodes(&to_remove);
    }

    /// Pathological tangles produce arbitrarily long best contigs. Ask the
    /// unanchored caller for its best contig regardless of finalisation and
    /// remove its evidence wholesale while it stays oversized; the change is
    /// too large to memoize incrementally, so both callers are rebuilt.
    fn suppress_misassemblies(&mut self) {
        let threshold = self.config.misassembly_length();
        loop {
            if self.unanchored.is_none() {
                self.unanchored = Some(ContigCaller::over(
                    &self.graph,
                    1,
                    self.config.max_path_kmers(),
                ));
            }
            let best = self
                .unanchored
                .as_mut()
                .unwrap()
                .best_contig(&self.graph, u64::MAX);
            let Some(contig) = best else {
                break;
            };
            let kmers: u64 = contig
                .iter()
                .map(|s| self.graph.node(s.node).len() as u64)
                .sum();
            let bases = kmers + self.config.k as u64 - 1;
            if bases <= threshold {
                break;
            }
            warn!(
                "{}: suppressing misassembled contig of {} bases at {}",
                self.config.contig_name, bases, contig[0].start_lo
            );
            self.consume_contig(&contig);
            self.anchored = ContigCaller::over(
                &self.graph,
                ANCHORED_SCORE,
                self.config.max_path_kmers(),
            );
            self.unanchored = Some(ContigCaller::over(
                &self.graph,
                1,
                self.config.max_path_kmers(),
            ));
        }
    }

    fn finish(&mut self) {
        let leftover = self
            .graph
            .iter_ids()
            .filter(|&id| !self.graph.node(id).is_reference())
            .count();
        if leftover > 0 {
            error!(
                "{}: input exhausted with {} non-reference nodes left unassembled",
                self.config.contig_name, leftover
            );
        }
    }
}

impl<I: Iterator<Item = PathNodeInput>> Iterator for Assembler<I> {
    type Item = AssemblyRecord;

    fn next(&mut self) -> Option<AssemblyRecord> {
        loop {
            match self.step() {
                Step::Emitted(record) => return Some(record),
                Step::Skip => continue,
                Step::Done => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::KmerSupportNode;
    use crate::kmer::Kmer;

    fn config() -> AssemblerConfig {
        AssemblerConfig {
            k: 4,
            max_evidence_distance: 10,
            max_anchor_length: 20,
            reference_index: 0,
            max_expected_breakend_length_multiple: 2.0,
            max_concordant_fragment_size: 50,
            contig_name: "test".into(),
            export_dir: None,
        }
    }

    fn node(seq: &str, start: u64, reference: bool, weight: u32) -> KmerPathNode {
        let kmers: Vec<Kmer> = seq
            .as_bytes()
            .windows(4)
            .map(|w| Kmer::from_seq(w, 4).unwrap())
            .collect();
        let weights = vec![weight; kmers.len()];
        KmerPathNode::new(kmers, weights, start, start, reference)
    }

    /// Evidence covering every k-mer of `seq` starting at `start`, with one
    /// unit of weight per cell.
    fn read_evidence(id: &str, seq: &str, start: u64) -> KmerEvidence {
        let support = seq
            .as_bytes()
            .windows(4)
            .enumerate()
            .map(|(i, w)| KmerSupportNode {
                kmer: Kmer::from_seq(w, 4).unwrap(),
                start: start + i as u64,
                end: start + i as u64,
                weight: 1,
            })
            .collect();
        KmerEvidence::new(id, support)
    }

    #[test]
    fn test_single_unanchored_contig() {
        let input = vec![PathNodeInput {
            node: node("TTGACCT", 100, false, 1),
            evidence: vec![read_evidence("r1", "TTGACCT", 100)],
        }];
        let mut asm = Assembler::new(config(), input);
        let rec = asm.next().expect("one contig");
        assert_eq!(rec.sequence, b"TTGACCT");
        assert_eq!(rec.evidence_ids, vec!["r1"]);
        assert!(asm.next().is_none());
        let stats = asm.stats();
        assert_eq!(stats.contigs_called, 1);
        assert_eq!(stats.consumed_input, 1);
        assert!(asm.tracker().is_empty());
        assert!(asm.graph().is_empty());
    }

    #[test]
    fn test_contig_consumption_drains_weight() {
        // two reads over the same node; the contig consumes both
        let input = vec![PathNodeInput {
            node: node("TTGACCT", 100, false, 2),
            evidence: vec![
                read_evidence("r1", "TTGACCT", 100),
                read_evidence("r2", "TTGACCT", 100),
            ],
        }];
        let mut asm = Assembler::new(config(), input);
        let rec = asm.next().expect("one contig");
        assert_eq!(rec.evidence_ids, vec!["r1", "r2"]);
        assert!(asm.next().is_none());
        assert_eq!(asm.graph().size(), 0);
        assert_eq!(asm.tracker().len(), 0);
    }

    #[test]
    fn test_outputs_are_position_ordered() {
        let mut input = Vec::new();
        for (i, start) in [100u64, 400, 700].iter().enumerate() {
            input.push(PathNodeInput {
                node: node("TTGACCT", *start, false, 1),
                evidence: vec![read_evidence(&format!("r{i}"), "TTGACCT", *start)],
            });
        }
        let asm = Assembler::new(config(), input);
        let starts: Vec<u64> = asm.map(|r| r.first_start).collect();
        assert_eq!(starts, vec![100, 400, 700]);
    }

    #[test]
    fn test_split_after_partial_consumption() {
        // one long node; a second, separate branch keeps the graph alive so
        // we can observe the split of the first
        let shared = node("TTGACCTGG", 100, false, 1);
        let mut partial = read_evidence("r1", "GACCT", 102);
        partial.support.iter_mut().for_each(|c| c.weight = 1);
        let input = vec![PathNodeInput {
            node: shared,
            evidence: vec![partial],
        }];
        let mut asm = Assembler::new(config(), input);
        // the contig covers the whole node but only the middle cells have
        // evidence; consumption drains the middle and splits off survivors
        let rec = asm.next().expect("one contig");
        assert_eq!(rec.sequence, b"TTGACCTGG");
        // survivors at both sides still hold unconsumed weight
        assert!(asm.stats().active_nodes >= 1);
    }
}
