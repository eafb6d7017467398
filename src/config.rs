use std::path::PathBuf;

/// Assembly parameters. All fields are required by the driver; the optional
/// export directory only enables diagnostic side-outputs and never changes
/// the emitted assemblies.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// k-mer length, 2..=32.
    pub k: usize,
    /// Read length plus the concordant fragment size spread: the width of
    /// the sliding window within which pending input can still interact
    /// with a loaded node.
    pub max_evidence_distance: u64,
    /// Upper bound on bases gathered per side during anchor extension.
    pub max_anchor_length: u64,
    /// Chromosome being assembled; tagged on every output record.
    pub reference_index: u32,
    /// A best unanchored contig longer than this multiple of
    /// `max_concordant_fragment_size` is treated as a misassembly.
    pub max_expected_breakend_length_multiple: f64,
    pub max_concordant_fragment_size: u64,
    /// Name prefix for emitted contigs, also used in log messages.
    pub contig_name: String,
    /// When set, memoization tables and graph snapshots are written here as
    /// contigs are called.
    pub export_dir: Option<PathBuf>,
}

impl AssemblerConfig {
    /// Contig base length above which the misassembly check fires.
    pub fn misassembly_length(&self) -> u64 {
        (self.max_expected_breakend_length_multiple * self.max_concordant_fragment_size as f64)
            .ceil() as u64
    }

    /// Hard cap on memoized path length, in k-mers. Set above the
    /// misassembly threshold so tangled regions saturate rather than grow
    /// without bound, while detection still sees an oversized contig.
    pub fn max_path_kmers(&self) -> u32 {
        (2.0 * self.max_expected_breakend_length_multiple
            * self.max_concordant_fragment_size as f64)
            .ceil()
            .max(64.0) as u32
    }
}
