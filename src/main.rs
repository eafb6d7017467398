use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bio::io::fastq;
use clap::Parser;
use flate2::read::MultiGzDecoder;
use tracing::{info, Level};

use breakweave::record::BreakendKind;
use breakweave::{
    Assembler, AssemblerConfig, Kmer, KmerEvidence, KmerPathNode, KmerSupportNode, PathNodeInput,
};

/// Assemble structural-variant contigs from a serialized path-node stream.
///
/// The input is line oriented, optionally gzipped. `N` lines declare path
/// nodes in non-decreasing first-start order; `E` lines attach evidence to
/// the most recent node:
///
///   N <first_start> <first_end> <R|V> <sequence> <w1,w2,...>
///   E <id> <breakend_lo-breakend_hi|.> <KMER@start-end:weight;...>
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path node stream (plain text, or gzipped if the name ends in .gz)
    input: PathBuf,

    /// Assembled contigs are written here as FASTQ
    #[arg(short, long)]
    output: PathBuf,

    /// Optional per-contig summary table (CSV)
    #[arg(long)]
    summary: Option<PathBuf>,

    /// k-mer length used by the producer of the node stream
    #[arg(long, default_value_t = 25)]
    k: usize,

    /// Read length plus fragment size spread
    #[arg(long, default_value_t = 500)]
    max_evidence_distance: u64,

    /// Upper bound on anchor extension bases
    #[arg(long, default_value_t = 300)]
    max_anchor_length: u64,

    /// Chromosome index tagged on every output record
    #[arg(long, default_value_t = 0)]
    reference_index: u32,

    /// Misassembly trigger threshold, as a multiple of the fragment size
    #[arg(long, default_value_t = 1.5)]
    max_expected_breakend_length_multiple: f64,

    #[arg(long, default_value_t = 600)]
    max_concordant_fragment_size: u64,

    /// Name prefix for emitted contigs
    #[arg(long, default_value = "asm")]
    contig_name: String,

    /// Write memoization tables and graph snapshots here as contigs are
    /// called
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// be quiet (warnings and errors only)
    #[arg(short, long)]
    quiet: bool,
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map_or(false, |ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn parse_node(fields: &[&str], k: usize, line_no: usize) -> Result<KmerPathNode> {
    if fields.len() != 5 {
        bail!("line {line_no}: expected 5 fields on an N line, got {}", fields.len());
    }
    let first_start: u64 = fields[0]
        .parse()
        .with_context(|| format!("line {line_no}: first_start"))?;
    let first_end: u64 = fields[1]
        .parse()
        .with_context(|| format!("line {line_no}: first_end"))?;
    let reference = match fields[2] {
        "R" => true,
        "V" => false,
        other => bail!("line {line_no}: expected R or V, got {other}"),
    };
    let seq = fields[3].as_bytes();
    if seq.len() < k {
        bail!("line {line_no}: sequence shorter than k");
    }
    let kmers: Vec<Kmer> = seq
        .windows(k)
        .map(|w| {
            Kmer::from_seq(w, k)
                .with_context(|| format!("line {line_no}: ambiguous base in node sequence"))
        })
        .collect::<Result<_>>()?;
    let weights: Vec<u32> = fields[4]
        .split(',')
        .map(|w| w.parse().with_context(|| format!("line {line_no}: weight")))
        .collect::<Result<_>>()?;
    if weights.len() != kmers.len() {
        bail!(
            "line {line_no}: {} weights for {} k-mers",
            weights.len(),
            kmers.len()
        );
    }
    Ok(KmerPathNode::new(
        kmers,
        weights,
        first_start,
        first_end,
        reference,
    ))
}

fn parse_evidence(fields: &[&str], k: usize, line_no: usize) -> Result<KmerEvidence> {
    if fields.len() != 3 {
        bail!("line {line_no}: expected 3 fields on an E line, got {}", fields.len());
    }
    let id = fields[0].to_string();
    let breakend = if fields[1] == "." {
        None
    } else {
        let (lo, hi) = fields[1]
            .split_once('-')
            .with_context(|| format!("line {line_no}: breakend interval"))?;
        Some((
            lo.parse().with_context(|| format!("line {line_no}: breakend lo"))?,
            hi.parse().with_context(|| format!("line {line_no}: breakend hi"))?,
        ))
    };
    let mut support = Vec::new();
    for cell in fields[2].split(';') {
        let (kmer_seq, rest) = cell
            .split_once('@')
            .with_context(|| format!("line {line_no}: support cell {cell}"))?;
        let (span, weight) = rest
            .split_once(':')
            .with_context(|| format!("line {line_no}: support cell {cell}"))?;
        let (lo, hi) = span
            .split_once('-')
            .with_context(|| format!("line {line_no}: support cell span {span}"))?;
        support.push(KmerSupportNode {
            kmer: Kmer::from_seq(kmer_seq.as_bytes(), k)
                .with_context(|| format!("line {line_no}: support cell k-mer {kmer_seq}"))?,
            start: lo.parse().with_context(|| format!("line {line_no}: cell start"))?,
            end: hi.parse().with_context(|| format!("line {line_no}: cell end"))?,
            weight: weight
                .parse()
                .with_context(|| format!("line {line_no}: cell weight"))?,
        });
    }
    let mut evidence = KmerEvidence::new(id, support);
    evidence.breakend = breakend;
    Ok(evidence)
}

fn parse_input(reader: Box<dyn BufRead>, k: usize) -> Result<Vec<PathNodeInput>> {
    let mut inputs: Vec<PathNodeInput> = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields[0] {
            "N" => inputs.push(PathNodeInput::bare(parse_node(&fields[1..], k, line_no)?)),
            "E" => {
                let evidence = parse_evidence(&fields[1..], k, line_no)?;
                inputs
                    .last_mut()
                    .with_context(|| format!("line {line_no}: evidence before any node"))?
                    .evidence
                    .push(evidence);
            }
            other => bail!("line {line_no}: unknown record type {other}"),
        }
    }
    Ok(inputs)
}

fn anchor_summary(kind: &BreakendKind) -> (String, String) {
    match kind {
        BreakendKind::Unanchored { interval } => {
            (String::new(), format!("{}-{}", interval.0, interval.1))
        }
        BreakendKind::SingleAnchor { anchor, at_start } => (
            format!(
                "{}:{}({}bp,{})",
                anchor.reference_index,
                anchor.position,
                anchor.anchor_bases,
                if *at_start { "start" } else { "end" }
            ),
            String::new(),
        ),
        BreakendKind::Breakpoint { left, right } => (
            format!(
                "{}:{}({}bp)..{}:{}({}bp)",
                left.reference_index,
                left.position,
                left.anchor_bases,
                right.reference_index,
                right.position,
                right.anchor_bases
            ),
            String::new(),
        ),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.quiet { Level::WARN } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let config = AssemblerConfig {
        k: cli.k,
        max_evidence_distance: cli.max_evidence_distance,
        max_anchor_length: cli.max_anchor_length,
        reference_index: cli.reference_index,
        max_expected_breakend_length_multiple: cli.max_expected_breakend_length_multiple,
        max_concordant_fragment_size: cli.max_concordant_fragment_size,
        contig_name: cli.contig_name.clone(),
        export_dir: cli.export_dir.clone(),
    };

    let inputs = parse_input(open_input(&cli.input)?, cli.k)?;
    info!("loaded {} path nodes from {}", inputs.len(), cli.input.display());

    let output = File::create(&cli.output)
        .with_context(|| format!("creating {}", cli.output.display()))?;
    let mut fastq_writer = fastq::Writer::new(output);
    let mut summary_writer = match &cli.summary {
        Some(path) => {
            let mut writer = csv::Writer::from_path(path)?;
            writer.write_record([
                "name",
                "kind",
                "first_start",
                "reference_index",
                "length",
                "anchors",
                "breakend",
                "evidence_count",
                "total_weight",
            ])?;
            Some(writer)
        }
        None => None,
    };

    let mut asm = Assembler::new(config, inputs);
    let mut emitted = 0u64;
    while let Some(record) = asm.next() {
        let (anchors, breakend) = anchor_summary(&record.kind);
        fastq_writer.write(
            &record.name,
            Some(record.kind_label()),
            &record.sequence,
            &record.quality,
        )?;
        if let Some(writer) = summary_writer.as_mut() {
            writer.write_record(&[
                record.name.clone(),
                record.kind_label().to_string(),
                record.first_start.to_string(),
                record.reference_index.to_string(),
                record.sequence.len().to_string(),
                anchors,
                breakend,
                record.evidence_ids.len().to_string(),
                record.total_weight.to_string(),
            ])?;
        }
        emitted += 1;
    }
    if let Some(mut writer) = summary_writer {
        writer.flush()?;
    }

    let stats = asm.stats();
    info!(
        "emitted {emitted} contigs ({} nodes consumed, max bucket {}, {} nodes left live)",
        stats.consumed_input, stats.max_kmer_bucket, stats.active_nodes
    );
    Ok(())
}
