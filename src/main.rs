use anyhow::{Context, Result};
use capremap::error::RemapError;
use capremap::pipeline::{Pipeline, RunOptions, RunSummary};
use capremap::target::TargetSpec;
use capremap::tools::{AutoMode, Tcpprep, Tcprewrite, Tshark, DEFAULT_FLOW_FILTER};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Rewrite a pcap so its client/server conversations replay against new subnets through a new router, using tcpprep, tshark and tcprewrite.")]
struct Args {
    /// Input .pcap file
    pcap_file: PathBuf,

    /// New server subnet (e.g. 192.168.1.0/24)
    #[arg(long, alias = "server_subnet")]
    server_subnet: Option<String>,

    /// Destination MAC for server->client packets (e.g. 00:11:22:33:44:55)
    #[arg(long, alias = "server_mac")]
    server_mac: Option<String>,

    /// New client subnet (e.g. 10.0.0.0/24)
    #[arg(long, alias = "client_subnet")]
    client_subnet: Option<String>,

    /// Destination MAC for client->server packets (e.g. AA:BB:CC:DD:EE:FF)
    #[arg(long, alias = "client_mac")]
    client_mac: Option<String>,

    /// tcpprep auto-detection mode used to tag packet direction
    #[arg(long, value_enum, default_value_t = AutoMode::First)]
    auto: AutoMode,

    /// tshark display filter selecting one client->server packet per conversation
    #[arg(long, default_value = DEFAULT_FLOW_FILTER)]
    flow_filter: String,

    /// Directory for the rewritten capture and the pairs dump
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Do not write the <capture>_pairs.json debug dump
    #[arg(long, default_value_t = false)]
    no_pairs_dump: bool,

    #[arg(long, default_value = "tcpprep")]
    tcpprep: String,

    #[arg(long, default_value = "tshark")]
    tshark: String,

    #[arg(long, default_value = "tcprewrite")]
    tcprewrite: String,

    /// Print the run summary as JSON to stdout
    #[arg(long, default_value_t = false)]
    report: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

// ─── Prompting ────────────────────────────────────────────────────────────────

fn prompt(question: &str) -> Result<String> {
    let mut out = io::stdout();
    write!(out, "{}: ", question)?;
    out.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("Cannot read answer from stdin")?;
    Ok(line.trim().to_string())
}

fn value_or_prompt(value: Option<String>, question: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None => prompt(question),
    }
}

/// CLI failure line: `<what> failed (<error class>): <detail>`.
fn failure(what: &str, e: RemapError) -> anyhow::Error {
    anyhow::anyhow!("{} failed ({}): {}", what, e.kind(), e)
}

fn resolve_targets(args: &Args) -> Result<TargetSpec> {
    let server_subnet = value_or_prompt(args.server_subnet.clone(), "Enter the new server subnet (e.g., 192.168.1.0/24)")?;
    let server_mac = value_or_prompt(args.server_mac.clone(), "Enter the destination MAC address for server->client packets (e.g., 00:11:22:33:44:55)")?;
    let client_subnet = value_or_prompt(args.client_subnet.clone(), "Enter the new client subnet (e.g., 10.0.0.0/24)")?;
    let client_mac = value_or_prompt(args.client_mac.clone(), "Enter the destination MAC address for client->server packets (e.g., AA:BB:CC:DD:EE:FF)")?;
    TargetSpec::parse(&server_subnet, &server_mac, &client_subnet, &client_mac)
        .map_err(|e| failure("target validation", e))
}

// ─── Summary ──────────────────────────────────────────────────────────────────

fn print_summary(s: &RunSummary) {
    println!("=== Rewrite Summary ===");
    println!("Input:                       {}", s.input.display());
    println!("Classification lines parsed: {}", s.lines_parsed);
    println!("Malformed lines skipped:     {}", s.lines_discarded);
    println!("Duplicate pairs dropped:     {}", s.duplicate_pairs);
    println!("Client/server pairs:         {}", s.unique_pairs);
    println!("Distinct servers:            {}", s.server_addresses);
    println!("Distinct clients:            {}", s.client_addresses);
    println!("tcprewrite invocations:      {}", s.rewrite_invocations);
    match s.uncovered_endpoints {
        Some(n) => println!("Endpoints left unrewritten:  {}", n),
        None => println!("Endpoints left unrewritten:  unknown"),
    }
    println!("─────────────────────────────────────────");
    println!("Rewritten pcap:              {}", s.output.display());
    if let Some(ref dump) = s.pairs_dump {
        println!("Pairs dump:                  {}", dump.display());
    }
}

// ─── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(log_level).with_target(false).with_writer(std::io::stderr).init();

    let spec = resolve_targets(&args)?;
    info!(
        "Targets: servers {} (dmac {}), clients {} (dmac {})",
        spec.server_subnet, spec.server_mac, spec.client_subnet, spec.client_mac
    );

    let tagger = Tcpprep { program: args.tcpprep.clone(), mode: args.auto };
    let inspector = Tshark { program: args.tshark.clone(), flow_filter: args.flow_filter.clone() };
    let rewriter = Tcprewrite { program: args.tcprewrite.clone() };
    let opts = RunOptions { output_dir: args.output_dir.clone(), dump_pairs: !args.no_pairs_dump };

    let summary = Pipeline::new(&tagger, &inspector, &rewriter)
        .run(&args.pcap_file, &spec, &opts)
        .map_err(|e| failure("rewriting", e))
        .with_context(|| format!("Cannot rewrite {:?}", args.pcap_file))?;

    if args.report {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
