use anyhow::{Context, Result};
use capremap::pairs::PairTable;
use clap::Parser;
use std::path::PathBuf;

/// Print a pairs dump written by `capremap`.
#[derive(Parser, Debug)]
#[command(author, version, about = "View the client/server pairs dump written by capremap.")]
struct Args {
    /// Path to the <capture>_pairs.json file
    pairs_file: PathBuf,

    /// Print the raw JSON instead of the formatted listing
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn render(table: &PairTable) -> String {
    let mut out = String::new();
    for (i, rule) in table.iter().enumerate() {
        out.push_str(&format!("Pair #{}: {}\n", i, rule.source));
        out.push_str(&format!("  server: {} -> {}\n", rule.source.server_ip, rule.target_server_ip));
        out.push_str(&format!("  client: {} -> {}\n", rule.source.client_ip, rule.target_client_ip));
        out.push_str(&format!("  dmac client->server: {}\n", rule.client_to_server_dmac));
        out.push_str(&format!("  dmac server->client: {}\n", rule.server_to_client_dmac));
    }
    out.push_str(&format!("{} pairs\n", table.len()));
    out
}

fn main() -> Result<()> {
    let args = Args::parse();
    let table = PairTable::load(&args.pairs_file)
        .with_context(|| format!("Error loading pairs file {:?}", args.pairs_file))?;
    if args.json {
        println!("{}", table.to_json()?);
    } else {
        print!("{}", render(&table));
    }
    Ok(())
}
