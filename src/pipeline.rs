//! tag → classify → reconcile → rewrite → persist.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::driver::RewriteDriver;
use crate::error::{RemapError, Result, Stage};
use crate::pairs::PairTable;
use crate::parser::{parse_endpoints, parse_pairs};
use crate::reconcile::reconcile;
use crate::stage::Workspace;
use crate::target::TargetSpec;
use crate::tools::{Inspector, RewriteTool, TaggedCapture, Tagger};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory receiving `<base>_rewritten.pcap` and `<base>_pairs.json`.
    pub output_dir: PathBuf,
    pub dump_pairs: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { output_dir: PathBuf::from("."), dump_pairs: true }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub pairs_dump: Option<PathBuf>,
    pub lines_parsed: usize,
    pub lines_discarded: usize,
    pub duplicate_pairs: usize,
    pub unique_pairs: usize,
    pub server_addresses: usize,
    pub client_addresses: usize,
    pub rewrite_invocations: usize,
    /// IP endpoints in the capture that no rule rewrites. `None` when the
    /// endpoint listing could not be taken.
    pub uncovered_endpoints: Option<usize>,
}

/// `<output_dir>/<stem>_rewritten.pcap` and `<output_dir>/<stem>_pairs.json`.
pub fn output_paths(capture: &Path, output_dir: &Path) -> (PathBuf, PathBuf) {
    let base = capture.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "capture".into());
    (
        output_dir.join(format!("{}_rewritten.pcap", base)),
        output_dir.join(format!("{}_pairs.json", base)),
    )
}

pub struct Pipeline<'a> {
    tagger: &'a dyn Tagger,
    inspector: &'a dyn Inspector,
    rewriter: &'a dyn RewriteTool,
}

impl<'a> Pipeline<'a> {
    pub fn new(tagger: &'a dyn Tagger, inspector: &'a dyn Inspector, rewriter: &'a dyn RewriteTool) -> Self {
        Self { tagger, inspector, rewriter }
    }

    /// Run the whole pipeline. Any failure aborts it; outputs appear only
    /// after every step has succeeded, and scratch files are always removed.
    pub fn run(&self, capture: &Path, spec: &TargetSpec, opts: &RunOptions) -> Result<RunSummary> {
        if !capture.is_file() {
            return Err(RemapError::CaptureNotFound(capture.to_path_buf()));
        }
        fs::create_dir_all(&opts.output_dir)?;
        let (output, dump) = output_paths(capture, &opts.output_dir);
        let ws = Workspace::create_in(&opts.output_dir)?;

        info!("Tagging flow direction in {:?}", capture);
        let tagged = TaggedCapture { capture: capture.to_path_buf(), cache: ws.cache_path() };
        self.tagger.tag(&tagged.capture, &tagged.cache).map_err(|e| RemapError::tool(Stage::Tagging, e))?;

        info!("Identifying client/server pairs");
        let text = self.inspector.inspect(&tagged).map_err(|e| RemapError::tool(Stage::Inspection, e))?;
        let mut candidates = parse_pairs(&text);
        let table = reconcile(candidates.by_ref(), spec)?;
        if candidates.discarded() > 0 {
            warn!("Skipped {} malformed classification lines", candidates.discarded());
        }
        if table.is_empty() {
            warn!("No client/server pairs found; only destination MACs will be rewritten");
        }
        let uncovered_endpoints = self.uncovered_endpoints(&tagged, &table);

        let final_stage = RewriteDriver::new(self.rewriter, &ws).run(&table, &tagged, spec)?;
        let rewrite_invocations = final_stage.step();

        // A rewritten capture is never published without its pair dump.
        let pairs_dump = if opts.dump_pairs {
            let staged = ws.pairs_path();
            table.save(&staged)?;
            fs::rename(&staged, &dump)?;
            Some(dump)
        } else {
            None
        };
        if let Err(e) = final_stage.promote(&output) {
            if let Some(d) = &pairs_dump {
                if let Err(rm) = fs::remove_file(d) {
                    warn!("Could not remove pair dump {:?}: {}", d, rm);
                }
            }
            return Err(e);
        }
        info!("Rewritten pcap file saved to: {:?}", output);
        if let Some(d) = &pairs_dump {
            info!("Server-client pairs saved to: {:?}", d);
        }

        let servers: HashSet<_> = table.iter().map(|r| r.source.server_ip).collect();
        let clients: HashSet<_> = table.iter().map(|r| r.source.client_ip).collect();
        Ok(RunSummary {
            input: capture.to_path_buf(),
            output,
            pairs_dump,
            lines_parsed: candidates.parsed(),
            lines_discarded: candidates.discarded(),
            duplicate_pairs: candidates.parsed() - table.len(),
            unique_pairs: table.len(),
            server_addresses: servers.len(),
            client_addresses: clients.len(),
            rewrite_invocations,
            uncovered_endpoints,
        })
    }

    /// Count IP endpoints of the capture that appear in no rule. Those hosts
    /// keep their addresses, typically because the flow filter never matched
    /// their traffic. A failed listing is only logged.
    fn uncovered_endpoints(&self, tagged: &TaggedCapture, table: &PairTable) -> Option<usize> {
        let text = match self.inspector.endpoints(tagged) {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not list capture endpoints: {}", e);
                return None;
            }
        };
        let covered: HashSet<_> = table.iter()
            .flat_map(|r| [r.source.server_ip, r.source.client_ip])
            .collect();
        let uncovered = parse_endpoints(&text).into_iter().filter(|a| !covered.contains(a)).count();
        if uncovered > 0 {
            warn!("{} IP endpoints match no client/server pair and will keep their addresses", uncovered);
        }
        Some(uncovered)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
