//! External collaborators: tcpprep tags packet direction, tshark lists the
//! flows, tcprewrite mutates headers. Each sits behind a trait so the
//! pipeline can run against fakes.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::ValueEnum;
use tracing::debug;

use crate::error::ToolError;
use crate::pairs::RewriteRule;
use crate::target::MacAddr;

/// Display filter matching the opening packet of each TCP conversation, sent
/// from client to server.
pub const DEFAULT_FLOW_FILTER: &str = "tcp.flags.syn == 1 && tcp.flags.ack == 0";

/// A capture plus the direction tags computed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedCapture {
    pub capture: PathBuf,
    pub cache: PathBuf,
}

/// One rewrite-tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOp {
    /// Replace each `from` address with its `to` wherever it appears as
    /// source or destination.
    Addresses(Vec<(IpAddr, IpAddr)>),
    /// Set the destination MAC of every packet according to its tagged direction.
    DestMacs {
        client_to_server: MacAddr,
        server_to_client: MacAddr,
        cache: PathBuf,
    },
}

impl RewriteOp {
    pub fn for_rule(rule: &RewriteRule) -> Self {
        RewriteOp::Addresses(vec![
            (rule.source.server_ip, rule.target_server_ip),
            (rule.source.client_ip, rule.target_client_ip),
        ])
    }
}

pub trait Tagger {
    fn tag(&self, capture: &Path, cache: &Path) -> Result<(), ToolError>;
}

pub trait Inspector {
    /// Raw `server client` lines, one per observed flow opening.
    fn inspect(&self, tagged: &TaggedCapture) -> Result<String, ToolError>;

    /// Raw `src dst` lines for every IP packet, used to spot hosts the flow
    /// filter never matched.
    fn endpoints(&self, tagged: &TaggedCapture) -> Result<String, ToolError>;
}

pub trait RewriteTool {
    fn rewrite(&self, input: &Path, output: &Path, op: &RewriteOp) -> Result<(), ToolError>;
}

// ─── Process plumbing ─────────────────────────────────────────────────────────

fn run(program: &str, args: &[String]) -> Result<String, ToolError> {
    debug!("Running: {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ToolError::Spawn { tool: program.to_string(), source })?;
    if !output.status.success() {
        return Err(ToolError::Exit {
            tool: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

// ─── tcpprep ──────────────────────────────────────────────────────────────────

/// tcpprep `-a` auto-detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AutoMode {
    /// First host seen sending is the client.
    #[default]
    First,
    Bridge,
    Router,
    Client,
    Server,
}

impl AutoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoMode::First => "first",
            AutoMode::Bridge => "bridge",
            AutoMode::Router => "router",
            AutoMode::Client => "client",
            AutoMode::Server => "server",
        }
    }
}

pub struct Tcpprep {
    pub program: String,
    pub mode: AutoMode,
}

pub fn tcpprep_args(capture: &Path, cache: &Path, mode: AutoMode) -> Vec<String> {
    vec![
        "-i".into(), path_arg(capture),
        "-o".into(), path_arg(cache),
        "-a".into(), mode.as_str().into(),
    ]
}

impl Tagger for Tcpprep {
    fn tag(&self, capture: &Path, cache: &Path) -> Result<(), ToolError> {
        run(&self.program, &tcpprep_args(capture, cache, self.mode)).map(|_| ())
    }
}

// ─── tshark ───────────────────────────────────────────────────────────────────

pub struct Tshark {
    pub program: String,
    pub flow_filter: String,
}

/// Display filter matching every IPv4 or IPv6 packet.
pub const ENDPOINT_FILTER: &str = "ip or ipv6";

fn field_args(capture: &Path, fields: &[&str], filter: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-r".into(), path_arg(capture),
        "-T".into(), "fields".into(),
        "-E".into(), "separator=,".into(),
    ];
    for field in fields {
        args.push("-e".into());
        args.push((*field).into());
    }
    args.push("-Y".into());
    args.push(filter.into());
    args
}

/// Prints `ip.dst,ip.src,ipv6.dst,ipv6.src` of each flow-opening packet,
/// i.e. `server,client` in whichever family pair the packet carries.
pub fn tshark_args(capture: &Path, flow_filter: &str) -> Vec<String> {
    field_args(capture, &["ip.dst", "ip.src", "ipv6.dst", "ipv6.src"], flow_filter)
}

/// Prints `ip.src,ip.dst,ipv6.src,ipv6.dst` of every IP packet.
pub fn endpoint_args(capture: &Path) -> Vec<String> {
    field_args(capture, &["ip.src", "ip.dst", "ipv6.src", "ipv6.dst"], ENDPOINT_FILTER)
}

impl Inspector for Tshark {
    fn inspect(&self, tagged: &TaggedCapture) -> Result<String, ToolError> {
        run(&self.program, &tshark_args(&tagged.capture, &self.flow_filter))
    }

    fn endpoints(&self, tagged: &TaggedCapture) -> Result<String, ToolError> {
        run(&self.program, &endpoint_args(&tagged.capture))
    }
}

// ─── tcprewrite ───────────────────────────────────────────────────────────────

pub struct Tcprewrite {
    pub program: String,
}

fn host_cidr(addr: &IpAddr) -> String {
    match addr {
        IpAddr::V4(a) => format!("{}/32", a),
        IpAddr::V6(a) => format!("[{}]/128", a),
    }
}

pub fn pnat_arg(mappings: &[(IpAddr, IpAddr)]) -> String {
    let list = mappings.iter()
        .map(|(from, to)| format!("{}:{}", host_cidr(from), host_cidr(to)))
        .collect::<Vec<_>>()
        .join(",");
    format!("--pnat={}", list)
}

pub fn tcprewrite_args(input: &Path, output: &Path, op: &RewriteOp) -> Vec<String> {
    let mut args = vec![
        "--infile".into(), path_arg(input),
        "--outfile".into(), path_arg(output),
        "--skipbroadcast".into(),
    ];
    match op {
        RewriteOp::Addresses(mappings) => {
            args.push("--fixcsum".into());
            args.push(pnat_arg(mappings));
        }
        RewriteOp::DestMacs { client_to_server, server_to_client, cache } => {
            args.push("--cachefile".into());
            args.push(path_arg(cache));
            args.push(format!("--enet-dmac={},{}", client_to_server, server_to_client));
        }
    }
    args
}

impl RewriteTool for Tcprewrite {
    fn rewrite(&self, input: &Path, output: &Path, op: &RewriteOp) -> Result<(), ToolError> {
        run(&self.program, &tcprewrite_args(input, output, op)).map(|_| ())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
