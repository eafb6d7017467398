use fxhash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};

use crate::evidence::{contig_cells, EvidenceTracker};
use crate::graph::PathGraph;
use crate::kmer::Kmer;
use crate::path_node::{NodeId, Subnode};

/// Outcome of the repeat-k-mer check on a called contig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeatFix {
    /// No k-mer is revisited; the contig stands as called.
    Clean,
    /// The contig was truncated to the dominant side of the first repeat.
    Corrected(Vec<Subnode>),
    /// No side of the repeat retains any supporting evidence.
    Emptied,
}

/// Greedily extend a called contig at both ends with reference-supported
/// flanks, walking path-node adjacency through reference nodes only and
/// preferring next hops with the higher total weight (ties to the earlier
/// first start, then the smaller id), until `target_bases` extra bases have
/// been gathered on that side or no hop remains. Nodes already on the path
/// are never revisited.
pub fn extend_anchors(graph: &PathGraph, contig: &[Subnode], target_bases: u64) -> Vec<Subnode> {
    let mut path: Vec<Subnode> = contig.to_vec();
    let mut visited: FxHashSet<NodeId> = contig.iter().map(|s| s.node).collect();

    let mut gained = 0u64;
    while gained < target_bases {
        let last = *path.last().unwrap();
        let shift = graph.node(last.node).len() as u64;
        let hop = best_hop(graph, &visited, graph.next(last.node), |cand| {
            let node = graph.node(cand);
            let lo = (last.start_lo + shift).max(node.first_start());
            let hi = (last.start_hi + shift).min(node.first_end());
            (lo <= hi).then_some((lo, hi))
        });
        let Some(hop) = hop else {
            break;
        };
        visited.insert(hop.node);
        gained += graph.node(hop.node).len() as u64;
        path.push(hop);
    }

    let mut gained = 0u64;
    while gained < target_bases {
        let first = path[0];
        let hop = best_hop(graph, &visited, graph.prev(first.node), |cand| {
            let node = graph.node(cand);
            let shift = node.len() as u64;
            let lo = first.start_lo.saturating_sub(shift).max(node.first_start());
            let hi = first.start_hi.checked_sub(shift)?.min(node.first_end());
            (lo <= hi).then_some((lo, hi))
        });
        let Some(hop) = hop else {
            break;
        };
        visited.insert(hop.node);
        gained += graph.node(hop.node).len() as u64;
        path.insert(0, hop);
    }
    path
}

fn best_hop<F>(
    graph: &PathGraph,
    visited: &FxHashSet<NodeId>,
    candidates: &[NodeId],
    restrict: F,
) -> Option<Subnode>
where
    F: Fn(NodeId) -> Option<(u64, u64)>,
{
    let mut best: Option<((u64, u64, NodeId), Subnode)> = None;
    for &cand in candidates {
        if visited.contains(&cand) || !graph.node(cand).is_reference() {
            continue;
        }
        let Some((lo, hi)) = restrict(cand) else {
            continue;
        };
        let node = graph.node(cand);
        let rank = (node.weight_total(), node.first_start(), cand);
        let better = match &best {
            None => true,
            Some(((w, fs, id), _)) => {
                rank.0 > *w
                    || (rank.0 == *w && (rank.1 < *fs || (rank.1 == *fs && rank.2 < *id)))
            }
        };
        if better {
            best = Some((
                rank,
                Subnode {
                    node: cand,
                    start_lo: lo,
                    start_hi: hi,
                },
            ));
        }
    }
    best.map(|(_, sub)| sub)
}

/// Check whether the contig revisits any k-mer, primary or collapsed. If it
/// does, split at the second occurrence, weigh each side by its supporting
/// evidence and keep the heavier side (the prefix on ties).
pub fn repeat_fix(
    graph: &PathGraph,
    tracker: &EvidenceTracker,
    contig: &[Subnode],
) -> RepeatFix {
    let mut seen: FxHashMap<Kmer, usize> = FxHashMap::default();
    let mut repeat: Option<(usize, usize)> = None;
    'outer: for (idx, sub) in contig.iter().enumerate() {
        let node = graph.node(sub.node);
        for off in 0..node.len() {
            let mut kms: SmallVec<[Kmer; 4]> = smallvec![node.kmer(off)];
            for ck in node.collapsed() {
                if ck.offset as usize == off {
                    kms.push(ck.kmer);
                }
            }
            for km in kms {
                if let Some(&i1) = seen.get(&km) {
                    repeat = Some((i1, idx));
                    break 'outer;
                }
                seen.insert(km, idx);
            }
        }
    }
    let Some((i1, i2)) = repeat else {
        return RepeatFix::Clean;
    };
    let (prefix, suffix): (&[Subnode], &[Subnode]) = if i2 > i1 {
        (&contig[..i2], &contig[i2..])
    } else {
        // the repeat sits inside a single node; keep it whole on one side
        (&contig[..=i1], &contig[i1 + 1..])
    };
    let side_weight = |side: &[Subnode]| -> u64 {
        if side.is_empty() {
            return 0;
        }
        tracker
            .support(contig_cells(graph, side))
            .iter()
            .map(|e| e.total_weight())
            .sum()
    };
    let prefix_weight = side_weight(prefix);
    let suffix_weight = side_weight(suffix);
    if prefix_weight == 0 && suffix_weight == 0 {
        return RepeatFix::Emptied;
    }
    let winner = if prefix_weight >= suffix_weight {
        prefix
    } else {
        suffix
    };
    if winner.len() == contig.len() {
        return RepeatFix::Clean;
    }
    RepeatFix::Corrected(winner.to_vec())
}
