//! Positional de Bruijn graph assembly of structural-variant breakends.
//!
//! The crate consumes a position-ordered stream of compressed k-mer path
//! nodes (with their supporting read evidence) and lazily emits
//! maximum-weight non-reference contigs, each annotated with reference
//! anchors or an inferred breakend interval and the evidence that built it.
//!
//! The pieces compose as follows: [`graph::PathGraph`] indexes the live
//! nodes, [`evidence::EvidenceTracker`] ties reads to the cells they
//! support, [`caller::ContigCaller`] maintains the memoized best-path
//! frontier, and [`assembler::Assembler`] drives them all from an input
//! iterator to an output iterator.

pub mod assembler;
pub mod caller;
pub mod config;
pub mod evidence;
pub mod export;
pub mod extension;
pub mod graph;
pub mod kmer;
pub mod path_node;
pub mod record;

pub use assembler::{
    Assembler, AssemblyStats, PathNodeInput, ADVANCEMENT_TRIGGER, ORPHAN_EVIDENCE_MULTIPLE,
};
pub use caller::{ContigCaller, ANCHORED_SCORE};
pub use config::AssemblerConfig;
pub use evidence::{EvidenceTracker, KmerEvidence, KmerSupportNode};
pub use graph::PathGraph;
pub use kmer::Kmer;
pub use path_node::{KmerPathNode, NodeId, Subnode};
pub use record::{Anchor, AssemblyRecord, BreakendKind};
