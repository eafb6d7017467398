use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use crate::caller::ContigCaller;
use crate::graph::PathGraph;
use crate::kmer::KmerDisplay;

/// Writes diagnostic snapshots as contigs are called: the memoization table
/// as CSV and the live graph in GFA. Every failure is logged at debug level
/// and swallowed; exports never affect the output stream.
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    pub fn new(dir: PathBuf) -> Exporter {
        Exporter { dir }
    }

    pub fn export_memo(&self, graph: &PathGraph, caller: &ContigCaller, index: u64) {
        let path = self.dir.join(format!("memo-{index}.csv"));
        if let Err(e) = self.try_export_memo(graph, caller, &path) {
            debug!("memo export to {} failed: {e:#}", path.display());
        }
    }

    fn try_export_memo(
        &self,
        graph: &PathGraph,
        caller: &ContigCaller,
        path: &PathBuf,
    ) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record([
            "node",
            "first_kmer",
            "weight",
            "start_lo",
            "start_hi",
            "len_kmers",
            "prev",
            "path_first_start",
            "start_anchored",
        ])?;
        let mut rows: Vec<_> = caller.iter_memo().collect();
        rows.sort_by_key(|(id, _)| *id);
        for (id, entry) in rows {
            let node = graph.node(id);
            writer.write_record(&[
                id.0.to_string(),
                KmerDisplay(node.first_kmer(), graph.k()).to_string(),
                entry.weight.to_string(),
                entry.start_lo.to_string(),
                entry.start_hi.to_string(),
                entry.len_kmers.to_string(),
                entry.prev.map(|p| p.0.to_string()).unwrap_or_default(),
                entry.path_first_start.to_string(),
                entry.start_anchored.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn export_graph(&self, graph: &PathGraph, index: u64) {
        let path = self.dir.join(format!("graph-{index}.gfa"));
        if let Err(e) = self.try_export_graph(graph, &path) {
            debug!("graph export to {} failed: {e:#}", path.display());
        }
    }

    fn try_export_graph(&self, graph: &PathGraph, path: &PathBuf) -> Result<()> {
        let k = graph.k();
        let mut out = File::create(path)?;
        writeln!(out, "H\tVN:Z:1.0\tKM:i:{k}")?;
        for id in graph.iter_ids() {
            let node = graph.node(id);
            let mut seq = node.first_kmer().decode(k);
            for off in 1..node.len() {
                seq.push(node.kmer(off).last_base() as char);
            }
            writeln!(
                out,
                "S\t{}\t{}\tDP:i:{}\tSP:i:{}\tRF:i:{}",
                id.0,
                seq,
                node.weight_total(),
                node.first_start(),
                node.is_reference() as u8
            )?;
        }
        for id in graph.iter_ids() {
            for &next in graph.next(id) {
                writeln!(out, "L\t{}\t+\t{}\t+\t{}M", id.0, next.0, k - 1)?;
            }
        }
        Ok(())
    }
}
