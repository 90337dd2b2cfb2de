//! Applies a pair table to a capture, one rewrite-tool invocation per rule
//! followed by a single destination-MAC pass.
//!
//! The run is a fold over the rules: each step reads the previous stage and
//! writes a new one, and the previous stage is deleted once its successor
//! exists. A rule's targets lie outside every observed address (checked when
//! the table is built), so a field rewritten by one step can never match a
//! later step.

use std::fs;

use tracing::{info, warn};

use crate::error::{RemapError, Result, Stage};
use crate::pairs::PairTable;
use crate::stage::{CaptureStage, Workspace};
use crate::target::TargetSpec;
use crate::tools::{RewriteOp, RewriteTool, TaggedCapture};

pub struct RewriteDriver<'a> {
    tool: &'a dyn RewriteTool,
    workspace: &'a Workspace,
}

impl<'a> RewriteDriver<'a> {
    pub fn new(tool: &'a dyn RewriteTool, workspace: &'a Workspace) -> Self {
        Self { tool, workspace }
    }

    /// Run every rule, then the MAC pass. On failure nothing the driver
    /// created is left behind and the error names the failing step.
    pub fn run(&self, table: &PairTable, tagged: &TaggedCapture, spec: &TargetSpec) -> Result<CaptureStage> {
        let initial = CaptureStage::initial(&tagged.capture);
        let rewritten = table.iter().enumerate().try_fold(initial, |stage, (i, rule)| {
            info!("Rewriting pair {}/{}: {}", i + 1, table.len(), rule.source);
            self.step(stage, &RewriteOp::for_rule(rule), Stage::Rewrite { rule: i })
        })?;

        let macs = RewriteOp::DestMacs {
            client_to_server: spec.client_mac,
            server_to_client: spec.server_mac,
            cache: tagged.cache.clone(),
        };
        self.step(rewritten, &macs, Stage::MacRewrite)
    }

    fn step(&self, prev: CaptureStage, op: &RewriteOp, stage: Stage) -> Result<CaptureStage> {
        let next_step = prev.step() + 1;
        let out = self.workspace.stage_path(next_step);
        if let Err(e) = self.tool.rewrite(prev.path(), &out, op) {
            warn!("{} failed, discarding intermediate captures", stage);
            // Cleanup problems are logged; the tool error is what gets reported.
            if out.exists() {
                if let Err(rm) = fs::remove_file(&out) {
                    warn!("Could not remove partial output {:?}: {}", out, rm);
                }
            }
            let prev_path = prev.path().to_path_buf();
            if let Err(rm) = prev.discard() {
                warn!("Could not remove intermediate capture {:?}: {}", prev_path, rm);
            }
            return Err(RemapError::tool(stage, e));
        }
        prev.discard()?;
        Ok(CaptureStage::derived(out, next_step))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_pairs;
    use crate::reconcile::reconcile;
    use crate::error::ToolError;
    use crate::testutil::{read_capture, write_capture, FakeRewrite, Pkt};
    use std::path::Path;

    fn spec() -> TargetSpec {
        TargetSpec::parse("10.1.2.0/24", "00:11:22:33:44:55", "10.1.1.0/24", "aa:bb:cc:dd:ee:ff").unwrap()
    }

    fn pcap_files(dir: &Path) -> Vec<String> {
        let mut v: Vec<String> = fs::read_dir(dir).unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".pcap"))
            .collect();
        v.sort();
        v
    }

    struct Fixture {
        dir: tempfile::TempDir,
        ws: Workspace,
        tagged: TaggedCapture,
    }

    fn fixture(pkts: &[Pkt]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cap.pcap");
        write_capture(&input, pkts);
        let ws = Workspace::create_in(dir.path()).unwrap();
        let cache = ws.cache_path();
        fs::write(&cache, b"tags").unwrap();
        Fixture { dir, ws, tagged: TaggedCapture { capture: input, cache } }
    }

    // Three flows: two share a server, and 10.0.0.9 is a client of both servers.
    fn flows() -> Vec<Pkt> {
        vec![
            Pkt::c2s("10.0.0.9", "10.0.0.5"), Pkt::s2c("10.0.0.5", "10.0.0.9"),
            Pkt::c2s("10.0.0.10", "10.0.0.5"), Pkt::s2c("10.0.0.5", "10.0.0.10"),
            Pkt::c2s("10.0.0.9", "10.0.0.6"), Pkt::s2c("10.0.0.6", "10.0.0.9"),
            Pkt::c2s("10.0.0.9", "10.0.0.5"),
        ]
    }

    #[test]
    fn every_field_rewritten_at_most_once() {
        let fx = fixture(&flows());
        let table = reconcile(
            parse_pairs("10.0.0.5,10.0.0.9\n10.0.0.5,10.0.0.10\n10.0.0.6,10.0.0.9\n"),
            &spec(),
        ).unwrap();
        let tool = FakeRewrite::default();
        let out = RewriteDriver::new(&tool, &fx.ws).run(&table, &fx.tagged, &spec()).unwrap();

        let pkts = read_capture(out.path());
        assert_eq!(pkts.len(), 7);
        for p in &pkts {
            assert_eq!(p.src_rewrites, 1, "{p:?}");
            assert_eq!(p.dst_rewrites, 1, "{p:?}");
        }
        assert_eq!((pkts[0].src.as_str(), pkts[0].dst.as_str()), ("10.1.1.1", "10.1.2.1"));
        assert_eq!((pkts[3].src.as_str(), pkts[3].dst.as_str()), ("10.1.2.1", "10.1.1.2"));
        assert_eq!((pkts[4].src.as_str(), pkts[4].dst.as_str()), ("10.1.1.1", "10.1.2.2"));
        assert_eq!(tool.calls(), 4);
    }

    #[test]
    fn macs_follow_direction() {
        let fx = fixture(&flows());
        let table = reconcile(parse_pairs("10.0.0.5 10.0.0.9\n"), &spec()).unwrap();
        let out = RewriteDriver::new(&FakeRewrite::default(), &fx.ws).run(&table, &fx.tagged, &spec()).unwrap();
        let pkts = read_capture(out.path());
        assert_eq!(pkts[0].dmac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(pkts[1].dmac, "00:11:22:33:44:55");
    }

    #[test]
    fn intermediates_removed_and_input_kept() {
        let fx = fixture(&flows());
        let table = reconcile(parse_pairs("10.0.0.5,10.0.0.9\n10.0.0.6,10.0.0.9\n"), &spec()).unwrap();
        let out = RewriteDriver::new(&FakeRewrite::default(), &fx.ws).run(&table, &fx.tagged, &spec()).unwrap();
        assert_eq!(out.step(), 3);
        assert_eq!(pcap_files(fx.ws.path()), vec!["stage-0003.pcap"]);
        assert!(fx.tagged.capture.exists());
    }

    #[test]
    fn empty_table_still_rewrites_macs() {
        let fx = fixture(&flows());
        let tool = FakeRewrite::default();
        let out = RewriteDriver::new(&tool, &fx.ws).run(&PairTable::new(), &fx.tagged, &spec()).unwrap();
        assert_eq!(tool.calls(), 1);
        assert_eq!(read_capture(out.path())[0].src, "10.0.0.9");
    }

    #[test]
    fn failure_reports_rule_and_cleans_up() {
        let fx = fixture(&flows());
        let table = reconcile(
            parse_pairs("10.0.0.5,10.0.0.9\n10.0.0.5,10.0.0.10\n10.0.0.6,10.0.0.9\n"),
            &spec(),
        ).unwrap();
        let tool = FakeRewrite::failing_at(1);
        let err = RewriteDriver::new(&tool, &fx.ws).run(&table, &fx.tagged, &spec()).unwrap_err();
        assert!(matches!(err, RemapError::ToolFailed { stage: Stage::Rewrite { rule: 1 }, .. }), "{err:?}");
        assert!(pcap_files(fx.ws.path()).is_empty());
        assert!(fx.tagged.capture.exists());
        assert_eq!(pcap_files(fx.dir.path()), vec!["cap.pcap"]);
    }

    #[test]
    fn mac_failure_is_reported_as_such() {
        let fx = fixture(&flows());
        let table = reconcile(parse_pairs("10.0.0.5,10.0.0.9\n"), &spec()).unwrap();
        let err = RewriteDriver::new(&FakeRewrite::failing_at(1), &fx.ws).run(&table, &fx.tagged, &spec()).unwrap_err();
        assert!(matches!(err, RemapError::ToolFailed { stage: Stage::MacRewrite, .. }));
        assert!(pcap_files(fx.ws.path()).is_empty());
    }

    /// Leaves a non-empty directory where its output should go, then fails.
    struct LitteringRewrite;

    impl RewriteTool for LitteringRewrite {
        fn rewrite(&self, _input: &Path, output: &Path, _op: &RewriteOp) -> std::result::Result<(), ToolError> {
            fs::create_dir_all(output.join("debris")).unwrap();
            Err(ToolError::Exit { tool: "littering".into(), status: "exit status: 2".into(), stderr: String::new() })
        }
    }

    #[test]
    fn cleanup_error_does_not_mask_tool_failure() {
        let fx = fixture(&flows());
        let table = reconcile(parse_pairs("10.0.0.5,10.0.0.9\n"), &spec()).unwrap();
        let err = RewriteDriver::new(&LitteringRewrite, &fx.ws).run(&table, &fx.tagged, &spec()).unwrap_err();
        assert!(matches!(err, RemapError::ToolFailed { stage: Stage::Rewrite { rule: 0 }, .. }), "{err:?}");
        assert!(fx.tagged.capture.exists());
    }

    #[test]
    fn mac_pass_idempotent() {
        let fx = fixture(&flows());
        let tool = FakeRewrite::default();
        let op = RewriteOp::DestMacs {
            client_to_server: spec().client_mac,
            server_to_client: spec().server_mac,
            cache: fx.tagged.cache.clone(),
        };
        let once = fx.ws.stage_path(1);
        let twice = fx.ws.stage_path(2);
        tool.rewrite(&fx.tagged.capture, &once, &op).unwrap();
        tool.rewrite(&once, &twice, &op).unwrap();
        assert_eq!(fs::read(&once).unwrap(), fs::read(&twice).unwrap());
    }
}
