use gcollections::ops::Bounded;
use interval::interval_set::*;

use crate::evidence::KmerEvidence;
use crate::graph::PathGraph;
use crate::kmer::Kmer;
use crate::path_node::Subnode;

/// A reference anchor pinning one end of an assembly to a genomic position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub reference_index: u32,
    pub position: u64,
    pub anchor_bases: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakendKind {
    /// No reference support on either side; the breakend position is only
    /// known as an interval inferred from the contributing evidence.
    Unanchored { interval: (u64, u64) },
    /// Reference support on exactly one side. `at_start` is true when the
    /// anchor precedes the breakend sequence.
    SingleAnchor { anchor: Anchor, at_start: bool },
    /// Reference support on both sides: a candidate structural variant.
    Breakpoint { left: Anchor, right: Anchor },
}

/// A fully assembled candidate contig, ready for downstream variant calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRecord {
    pub name: String,
    pub reference_index: u32,
    pub first_start: u64,
    pub sequence: Vec<u8>,
    pub quality: Vec<u8>,
    pub kind: BreakendKind,
    pub evidence_ids: Vec<String>,
    pub total_weight: u64,
}

impl AssemblyRecord {
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            BreakendKind::Unanchored { .. } => "unanchored",
            BreakendKind::SingleAnchor { .. } => "single_anchor",
            BreakendKind::Breakpoint { .. } => "breakpoint",
        }
    }
}

struct FlatKmer {
    kmer: Kmer,
    weight: u32,
    reference: bool,
    start_lo: u64,
}

fn flatten(graph: &PathGraph, subnodes: &[Subnode]) -> Vec<FlatKmer> {
    let mut flat = Vec::new();
    for sub in subnodes {
        let node = graph.node(sub.node);
        for off in 0..node.len() {
            flat.push(FlatKmer {
                kmer: node.kmer(off),
                weight: node.weight(off),
                reference: node.is_reference(),
                start_lo: sub.start_lo + off as u64,
            });
        }
    }
    flat
}

/// Phred-scale quality from a k-mer weight, logarithmic in the support.
pub fn weight_to_phred(weight: u32) -> u8 {
    (6 * (weight as u64 + 1).ilog2()).min(40) as u8
}

/// Assemble the output record for an extended contig path. Returns None when
/// the contig has no breakend sequence left between its anchors, or consists
/// of reference k-mers only; such contigs are dropped, never emitted
/// partially.
pub fn build_record(
    graph: &PathGraph,
    subnodes: &[Subnode],
    support: &[&KmerEvidence],
    k: usize,
    reference_index: u32,
    name: String,
) -> Option<AssemblyRecord> {
    let flat = flatten(graph, subnodes);
    let n = flat.len();
    debug_assert!(n > 0);
    let leading_ref = flat.iter().take_while(|f| f.reference).count();
    if leading_ref == n {
        return None;
    }
    let trailing_ref = flat.iter().rev().take_while(|f| f.reference).count();

    let seq_len = k + n - 1;
    let mut sequence = Vec::with_capacity(seq_len);
    sequence.extend_from_slice(flat[0].kmer.decode(k).as_bytes());
    for f in &flat[1..] {
        sequence.push(f.kmer.last_base());
    }
    let mut quality = Vec::with_capacity(seq_len);
    for i in 0..seq_len {
        let j = i.saturating_sub(k - 1).min(n - 1);
        quality.push(33 + weight_to_phred(flat[j].weight));
    }

    let left = (leading_ref > 0).then(|| Anchor {
        reference_index,
        position: flat[leading_ref - 1].start_lo + k as u64 - 1,
        anchor_bases: leading_ref as u64 + k as u64 - 1,
    });
    let right = (trailing_ref > 0).then(|| Anchor {
        reference_index,
        position: flat[n - trailing_ref].start_lo,
        anchor_bases: trailing_ref as u64 + k as u64 - 1,
    });

    let kind = match (left, right) {
        (Some(left), Some(right)) => {
            if left.anchor_bases + right.anchor_bases >= seq_len as u64 {
                // anchors cover the whole contig: no breakend sequence
                return None;
            }
            BreakendKind::Breakpoint { left, right }
        }
        (Some(anchor), None) => BreakendKind::SingleAnchor {
            anchor,
            at_start: true,
        },
        (None, Some(anchor)) => BreakendKind::SingleAnchor {
            anchor,
            at_start: false,
        },
        (None, None) => {
            let interval = breakend_interval(support).unwrap_or_else(|| {
                // no pair evidence carries a breakend estimate; fall back to
                // the assembled footprint itself
                (flat[0].start_lo, flat[n - 1].start_lo + k as u64 - 1)
            });
            BreakendKind::Unanchored { interval }
        }
    };

    let total_weight = flat
        .iter()
        .filter(|f| !f.reference)
        .map(|f| f.weight as u64)
        .sum();
    Some(AssemblyRecord {
        name,
        reference_index,
        first_start: subnodes[0].start_lo,
        sequence,
        quality,
        kind,
        evidence_ids: support.iter().map(|e| e.id.clone()).collect(),
        total_weight,
    })
}

/// The approximate breakend interval of an unanchored assembly: union the
/// per-evidence intervals into connected components and return the component
/// carrying the greatest summed evidence weight, leftmost on ties.
fn breakend_interval(support: &[&KmerEvidence]) -> Option<(u64, u64)> {
    let pairs: Vec<(usize, usize)> = support
        .iter()
        .filter_map(|e| e.breakend)
        .map(|(lo, hi)| (lo as usize, hi as usize))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    let components = pairs.to_interval_set();
    let mut best: Option<((u64, u64), u64)> = None;
    for component in components {
        let lo = component.lower() as u64;
        let hi = component.upper() as u64;
        let weight: u64 = support
            .iter()
            .filter(|e| {
                e.breakend
                    .map_or(false, |(blo, bhi)| blo <= hi && bhi >= lo)
            })
            .map(|e| e.total_weight())
            .sum();
        if best.map_or(true, |(_, bw)| weight > bw) {
            best = Some(((lo, hi), weight));
        }
    }
    best.map(|(iv, _)| iv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::KmerSupportNode;
    use crate::path_node::KmerPathNode;

    fn node(seq: &str, start: u64, end: u64, reference: bool, weight: u32) -> KmerPathNode {
        let kmers: Vec<Kmer> = seq
            .as_bytes()
            .windows(4)
            .map(|w| Kmer::from_seq(w, 4).unwrap())
            .collect();
        let weights = vec![weight; kmers.len()];
        KmerPathNode::new(kmers, weights, start, end, reference)
    }

    fn evidence(id: &str, breakend: Option<(u64, u64)>, weight: u32) -> KmerEvidence {
        let mut ev = KmerEvidence::new(
            id,
            vec![KmerSupportNode {
                kmer: Kmer::from_seq(b"ACGT", 4).unwrap(),
                start: 0,
                end: 10,
                weight,
            }],
        );
        ev.breakend = breakend;
        ev
    }

    #[test]
    fn test_weight_to_phred_is_logarithmic() {
        assert_eq!(weight_to_phred(0), 0);
        assert_eq!(weight_to_phred(1), 6);
        assert_eq!(weight_to_phred(3), 12);
        assert_eq!(weight_to_phred(7), 18);
        assert!(weight_to_phred(u32::MAX) <= 40);
    }

    #[test]
    fn test_single_anchor_record() {
        let mut g = PathGraph::new(4);
        let anchor = g.insert(node("TAAAAC", 8, 8, true, 2));
        let core = g.insert(node("AACGT", 11, 11, false, 3));
        let path = vec![
            Subnode {
                node: anchor,
                start_lo: 8,
                start_hi: 8,
            },
            Subnode {
                node: core,
                start_lo: 11,
                start_hi: 11,
            },
        ];
        let rec = build_record(&g, &path, &[], 4, 7, "asm_0".into()).unwrap();
        assert_eq!(rec.sequence, b"TAAAACGT");
        assert_eq!(rec.quality.len(), rec.sequence.len());
        assert_eq!(rec.reference_index, 7);
        match rec.kind {
            BreakendKind::SingleAnchor { anchor, at_start } => {
                assert!(at_start);
                // three reference k-mers ending at start 10: last base 13
                assert_eq!(anchor.position, 13);
                assert_eq!(anchor.anchor_bases, 6);
            }
            other => panic!("expected single anchor, got {:?}", other),
        }
    }

    #[test]
    fn test_unanchored_record_uses_evidence_breakends() {
        let mut g = PathGraph::new(4);
        let core = g.insert(node("TTGACCT", 100, 101, false, 2));
        let path = vec![Subnode {
            node: core,
            start_lo: 100,
            start_hi: 101,
        }];
        let heavy_a = evidence("a", Some((200, 203)), 2);
        let heavy_b = evidence("b", Some((202, 205)), 2);
        let light = evidence("c", Some((900, 905)), 1);
        let support = vec![&heavy_a, &heavy_b, &light];
        let rec = build_record(&g, &path, &support, 4, 0, "asm_0".into()).unwrap();
        match rec.kind {
            BreakendKind::Unanchored { interval } => assert_eq!(interval, (200, 205)),
            other => panic!("expected unanchored, got {:?}", other),
        }
        assert_eq!(rec.evidence_ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fully_anchored_contig_is_dropped() {
        let mut g = PathGraph::new(4);
        let a = g.insert(node("TAAAAC", 8, 8, true, 2));
        let b = g.insert(node("AACGT", 11, 11, false, 1));
        let c = g.insert(node("CGTGG", 13, 13, true, 2));
        let path = vec![
            Subnode {
                node: a,
                start_lo: 8,
                start_hi: 8,
            },
            Subnode {
                node: b,
                start_lo: 11,
                start_hi: 11,
            },
            Subnode {
                node: c,
                start_lo: 13,
                start_hi: 13,
            },
        ];
        // anchors: 3+3 ref k-mers -> 6+6 bases vs 10 sequence bases
        assert!(build_record(&g, &path, &[], 4, 0, "asm_0".into()).is_none());
    }

    #[test]
    fn test_all_reference_path_is_dropped() {
        let mut g = PathGraph::new(4);
        let a = g.insert(node("TAAAAC", 8, 8, true, 2));
        let path = vec![Subnode {
            node: a,
            start_lo: 8,
            start_hi: 8,
        }];
        assert!(build_record(&g, &path, &[], 4, 0, "asm_0".into()).is_none());
    }
}
