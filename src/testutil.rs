//! In-process stand-ins for the external tools, working on a one-packet-per-line
//! text capture: `dir src dst dmac src_rewrites dst_rewrites`.

use std::cell::Cell;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

use crate::error::ToolError;
use crate::tools::{Inspector, RewriteOp, RewriteTool, TaggedCapture, Tagger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkt {
    pub dir: String,
    pub src: String,
    pub dst: String,
    pub dmac: String,
    pub src_rewrites: u32,
    pub dst_rewrites: u32,
}

impl Pkt {
    fn new(dir: &str, src: &str, dst: &str) -> Self {
        Pkt {
            dir: dir.into(), src: src.into(), dst: dst.into(),
            dmac: "00:00:00:00:00:00".into(), src_rewrites: 0, dst_rewrites: 0,
        }
    }

    pub fn c2s(src: &str, dst: &str) -> Self { Self::new("c2s", src, dst) }

    pub fn s2c(src: &str, dst: &str) -> Self { Self::new("s2c", src, dst) }
}

pub fn write_capture(path: &Path, pkts: &[Pkt]) {
    let text: String = pkts.iter()
        .map(|p| format!("{} {} {} {} {} {}\n", p.dir, p.src, p.dst, p.dmac, p.src_rewrites, p.dst_rewrites))
        .collect();
    fs::write(path, text).unwrap();
}

pub fn read_capture(path: &Path) -> Vec<Pkt> {
    fs::read_to_string(path).unwrap()
        .lines()
        .map(|l| {
            let f: Vec<&str> = l.split(' ').collect();
            Pkt {
                dir: f[0].into(), src: f[1].into(), dst: f[2].into(), dmac: f[3].into(),
                src_rewrites: f[4].parse().unwrap(), dst_rewrites: f[5].parse().unwrap(),
            }
        })
        .collect()
}

fn lookup(maps: &[(IpAddr, IpAddr)], addr: &str) -> Option<String> {
    let addr: IpAddr = addr.parse().ok()?;
    maps.iter().find(|(from, _)| *from == addr).map(|(_, to)| to.to_string())
}

fn injected(tool: &str) -> ToolError {
    ToolError::Exit { tool: tool.into(), status: "exit status: 1".into(), stderr: "injected failure".into() }
}

/// pnat-style rewriter. `failing_at(n)` makes the n-th call (zero-based) fail
/// without writing output.
#[derive(Default)]
pub struct FakeRewrite {
    fail_at: Option<usize>,
    calls: Cell<usize>,
}

impl FakeRewrite {
    pub fn failing_at(call: usize) -> Self {
        FakeRewrite { fail_at: Some(call), calls: Cell::new(0) }
    }

    pub fn calls(&self) -> usize { self.calls.get() }
}

impl RewriteTool for FakeRewrite {
    fn rewrite(&self, input: &Path, output: &Path, op: &RewriteOp) -> Result<(), ToolError> {
        let n = self.calls.get();
        self.calls.set(n + 1);
        if self.fail_at == Some(n) { return Err(injected("fake-rewrite")); }

        let mut pkts = read_capture(input);
        match op {
            RewriteOp::Addresses(maps) => {
                for p in &mut pkts {
                    if let Some(to) = lookup(maps, &p.src) { p.src = to; p.src_rewrites += 1; }
                    if let Some(to) = lookup(maps, &p.dst) { p.dst = to; p.dst_rewrites += 1; }
                }
            }
            RewriteOp::DestMacs { client_to_server, server_to_client, cache } => {
                if !cache.exists() { return Err(injected("fake-rewrite: missing cache")); }
                for p in &mut pkts {
                    p.dmac = if p.dir == "c2s" { client_to_server.to_string() } else { server_to_client.to_string() };
                }
            }
        }
        write_capture(output, &pkts);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTagger {
    pub fail: bool,
}

impl Tagger for FakeTagger {
    fn tag(&self, _capture: &Path, cache: &Path) -> Result<(), ToolError> {
        if self.fail { return Err(injected("fake-tagger")); }
        fs::write(cache, b"tags").unwrap();
        Ok(())
    }
}

pub struct FakeInspector {
    pub output: String,
    /// Endpoint listing; `None` makes the listing fail.
    pub endpoints: Option<String>,
    pub fail: bool,
}

impl FakeInspector {
    pub fn new(output: &str) -> Self {
        FakeInspector { output: output.into(), endpoints: Some(String::new()), fail: false }
    }

    pub fn with_endpoints(output: &str, endpoints: &str) -> Self {
        FakeInspector { endpoints: Some(endpoints.into()), ..Self::new(output) }
    }
}

impl Inspector for FakeInspector {
    fn inspect(&self, tagged: &TaggedCapture) -> Result<String, ToolError> {
        if self.fail || !tagged.cache.exists() { return Err(injected("fake-inspector")); }
        Ok(self.output.clone())
    }

    fn endpoints(&self, tagged: &TaggedCapture) -> Result<String, ToolError> {
        if !tagged.capture.exists() { return Err(injected("fake-inspector")); }
        self.endpoints.clone().ok_or_else(|| injected("fake-inspector"))
    }
}
