//! End-to-end driver scenarios: anchored and unanchored breakends, a full
//! breakpoint, misassembly suppression, orphan sweeping and repeat
//! correction, plus the cross-cutting output properties.

use breakweave::record::BreakendKind;
use breakweave::{
    Assembler, AssemblerConfig, AssemblyRecord, Kmer, KmerEvidence, KmerPathNode, KmerSupportNode,
    PathNodeInput,
};

const K: usize = 4;

fn config() -> AssemblerConfig {
    AssemblerConfig {
        k: K,
        max_evidence_distance: 10,
        max_anchor_length: 20,
        reference_index: 0,
        max_expected_breakend_length_multiple: 2.0,
        max_concordant_fragment_size: 50,
        contig_name: "asm".into(),
        export_dir: None,
    }
}

fn node(seq: &str, start: u64, reference: bool, weight: u32) -> KmerPathNode {
    let kmers: Vec<Kmer> = seq
        .as_bytes()
        .windows(K)
        .map(|w| Kmer::from_seq(w, K).unwrap())
        .collect();
    let weights = vec![weight; kmers.len()];
    KmerPathNode::new(kmers, weights, start, start, reference)
}

/// A read whose trace covers every k-mer of `seq` from `start` on, one unit
/// of weight per cell.
fn read(id: &str, seq: &str, start: u64) -> KmerEvidence {
    let support = seq
        .as_bytes()
        .windows(K)
        .enumerate()
        .map(|(i, w)| KmerSupportNode {
            kmer: Kmer::from_seq(w, K).unwrap(),
            start: start + i as u64,
            end: start + i as u64,
            weight: 1,
        })
        .collect();
    KmerEvidence::new(id, support)
}

fn run(input: Vec<PathNodeInput>) -> Vec<AssemblyRecord> {
    Assembler::new(config(), input).collect()
}

#[test]
fn single_anchored_breakend_forward() {
    let input = vec![
        PathNodeInput::bare(node("TAAAAC", 8, true, 0)),
        PathNodeInput {
            node: node("AACGTGG", 11, false, 2),
            evidence: vec![read("r1", "AACGTGG", 11), read("r2", "AACGTGG", 11)],
        },
    ];
    let records = run(input);
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.sequence, b"TAAAACGTGG");
    assert_eq!(rec.evidence_ids, vec!["r1", "r2"]);
    match rec.kind {
        BreakendKind::SingleAnchor { anchor, at_start } => {
            assert!(at_start);
            assert_eq!(anchor.reference_index, 0);
            assert_eq!(anchor.position, 13);
            assert_eq!(anchor.anchor_bases, 6);
        }
        ref other => panic!("expected a single anchor, got {:?}", other),
    }
}

#[test]
fn unanchored_breakend_from_pair_evidence() {
    let input = vec![
        PathNodeInput {
            node: node("TTGAC", 100, false, 2),
            evidence: vec![
                read("pair1", "TTGACCT", 100).with_breakend(200, 203),
                read("pair2", "TTGACCT", 100).with_breakend(202, 205),
            ],
        },
        PathNodeInput::bare(node("GACCT", 102, false, 2)),
    ];
    let records = run(input);
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.sequence, b"TTGACCT");
    match rec.kind {
        BreakendKind::Unanchored { interval } => assert_eq!(interval, (200, 205)),
        ref other => panic!("expected unanchored, got {:?}", other),
    }
    assert_eq!(rec.evidence_ids, vec!["pair1", "pair2"]);
}

#[test]
fn breakpoint_with_both_anchors() {
    let input = vec![
        PathNodeInput::bare(node("AAAC", 10, true, 0)),
        PathNodeInput {
            node: node("AACGTCA", 11, false, 2),
            evidence: vec![read("r1", "AACGTCA", 11), read("r2", "AACGTCA", 11)],
        },
        PathNodeInput::bare(node("TCAT", 15, true, 0)),
    ];
    let records = run(input);
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.sequence, b"AAACGTCAT");
    match rec.kind {
        BreakendKind::Breakpoint { left, right } => {
            assert_eq!(left.position, 13);
            assert_eq!(left.anchor_bases, 4);
            assert_eq!(right.position, 15);
            assert_eq!(right.anchor_bases, 4);
        }
        ref other => panic!("expected a breakpoint, got {:?}", other),
    }
}

/// A long connected non-reference chain that never finalises: misassembly
/// detection must remove it wholesale and the region produces no output.
#[test]
fn misassembly_suppression_emits_nothing() {
    let mut config = config();
    config.max_expected_breakend_length_multiple = 1.0;
    config.max_concordant_fragment_size = 10;

    let seq: String = "TTGACCTGGAATCCGG".repeat(4);
    let kmer_count = seq.len() - K + 1;
    let node_count = kmer_count / K;
    let mut input = Vec::new();
    for i in 0..node_count {
        let chunk = &seq[i * K..i * K + 2 * K - 1];
        input.push(PathNodeInput {
            node: node(chunk, 100 + (i * K) as u64, false, 1),
            evidence: vec![read(&format!("tangle{i}"), chunk, 100 + (i * K) as u64)],
        });
    }

    let mut asm = Assembler::new(config, input);
    assert!(asm.next().is_none());
    let stats = asm.stats();
    assert_eq!(stats.contigs_called, 0);
    assert!(asm.tracker().is_empty(), "tangle evidence must be untracked");
    assert!(asm.graph().is_empty());
}

/// A reference-only island far behind the frontier is swept without output.
#[test]
fn orphaned_reference_island_is_removed() {
    let mut config = config();
    config.max_evidence_distance = 2;

    let input = vec![
        PathNodeInput::bare(node("TAAAAC", 10, true, 0)),
        PathNodeInput {
            node: node("TTGACCT", 400, false, 1),
            evidence: vec![read("r1", "TTGACCT", 400)],
        },
    ];
    let mut asm = Assembler::new(config, input);
    let records: Vec<AssemblyRecord> = asm.by_ref().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].first_start, 400);
    match records[0].kind {
        BreakendKind::Unanchored { .. } => {}
        ref other => panic!("the island must not anchor anything, got {:?}", other),
    }
    assert!(asm.graph().is_empty(), "island nodes must have been swept");
}

/// A contig revisiting a k-mer is split at the repeat; the heavier evidence
/// partition survives and is emitted alone.
#[test]
fn repeat_kmer_split_keeps_dominant_partition() {
    let input = vec![
        PathNodeInput {
            node: node("TTGACC", 100, false, 1),
            evidence: vec![read("prefix-read", "TTGACC", 100)],
        },
        PathNodeInput {
            // TGAC occurs again at offset 3: a chimeric join
            node: node("ACCTGACG", 103, false, 1),
            evidence: vec![
                read("suffix-read-1", "ACCTGA", 103),
                read("suffix-read-2", "TGACG", 106),
            ],
        },
    ];
    let records = run(input);
    assert_eq!(records.len(), 2);
    // the dominant (suffix) partition is emitted first, alone
    assert_eq!(records[0].sequence, b"ACCTGACG");
    assert_eq!(
        records[0].evidence_ids,
        vec!["suffix-read-1", "suffix-read-2"]
    );
    // the prefix partition survives as its own later contig
    assert_eq!(records[1].sequence, b"TTGACC");
    assert_eq!(records[1].evidence_ids, vec!["prefix-read"]);
}

#[test]
fn outputs_are_monotone_and_partition_evidence() {
    let mut input = Vec::new();
    let mut expected_ids = Vec::new();
    for i in 0..5u64 {
        let start = 100 + i * 300;
        let id = format!("read{i}");
        input.push(PathNodeInput {
            node: node("TTGACCT", start, false, 1),
            evidence: vec![read(&id, "TTGACCT", start)],
        });
        expected_ids.push(id);
    }
    let records = run(input);
    assert_eq!(records.len(), 5);
    for pair in records.windows(2) {
        assert!(pair[0].first_start <= pair[1].first_start);
    }
    // each evidence item supports exactly one emitted contig
    let mut seen = std::collections::HashSet::new();
    for rec in &records {
        for id in &rec.evidence_ids {
            assert!(seen.insert(id.clone()), "evidence {id} emitted twice");
        }
    }
    assert_eq!(seen.len(), expected_ids.len());
}

#[test]
fn weight_is_conserved() {
    let input = vec![
        PathNodeInput {
            node: node("TTGAC", 100, false, 2),
            evidence: vec![
                read("pair1", "TTGACCT", 100),
                read("pair2", "TTGACCT", 100),
            ],
        },
        PathNodeInput::bare(node("GACCT", 102, false, 2)),
    ];
    let mut asm = Assembler::new(config(), input);
    let emitted: u64 = asm.by_ref().map(|r| r.total_weight).sum();
    let registered = asm.tracker().total_registered_weight();
    assert_eq!(registered, 8);
    assert_eq!(emitted, registered, "no weight may vanish or be minted");
    assert!(asm.graph().is_empty());
}

#[test]
fn reruns_are_byte_identical() {
    let build = || {
        vec![
            PathNodeInput::bare(node("TAAAAC", 8, true, 0)),
            PathNodeInput {
                node: node("AACGTGG", 11, false, 2),
                evidence: vec![read("r1", "AACGTGG", 11), read("r2", "AACGTGG", 11)],
            },
            PathNodeInput {
                node: node("TTGACCT", 500, false, 1),
                evidence: vec![read("r3", "TTGACCT", 500)],
            },
        ]
    };
    let first = run(build());
    let second = run(build());
    assert_eq!(first, second);
}

/// The memoized caller must agree with fresh recomputation across a random
/// schedule of insertions, weight reductions and removals.
#[test]
fn randomized_caller_consistency() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use breakweave::{ContigCaller, PathGraph};

    let mut rng = StdRng::seed_from_u64(0xb5ea4);
    let seq: String = "TTGACCTGGAATCCGG".repeat(8);
    for _ in 0..10 {
        let mut graph = PathGraph::new(K);
        let mut caller = ContigCaller::new(1, 256);
        let mut live = Vec::new();
        let node_count = (seq.len() - K + 1) / K;
        for i in 0..node_count {
            let chunk = &seq[i * K..i * K + 2 * K - 1];
            let weight = rng.gen_range(1..5);
            let id = graph.insert(node(chunk, 100 + (i * K) as u64, false, weight));
            caller.add(&graph, id);
            live.push(id);

            if rng.gen_bool(0.3) && !live.is_empty() {
                let victim = live.remove(rng.gen_range(0..live.len()));
                caller.remove(&graph, &[victim]);
                graph.remove(victim);
            } else if rng.gen_bool(0.3) {
                let target = live[rng.gen_range(0..live.len())];
                let offsets = graph.node(target).len();
                for off in 0..offsets {
                    graph.node_mut(target).subtract_weight(off, 1);
                }
                if graph.node(target).min_weight() == 0 {
                    caller.remove(&graph, &[target]);
                    let removed = graph.remove(target);
                    live.retain(|&x| x != target);
                    for part in removed.split_surviving() {
                        let id = graph.reinsert(part);
                        caller.add(&graph, id);
                        live.push(id);
                    }
                } else {
                    caller.touch(&graph, target);
                }
            }
            assert!(caller.sanity_check_frontier(&graph, u64::MAX));
        }
    }
}
