//! Observed address pairs and the rewrite plan built from them.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;
use std::slice;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::target::MacAddr;

/// One classified flow. Roles are already decided, so the tuple is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressPair {
    pub server_ip: IpAddr,
    pub client_ip: IpAddr,
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server {} / client {}", self.server_ip, self.client_ip)
    }
}

/// Replacement values for one observed pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub source: AddressPair,
    pub target_server_ip: IpAddr,
    pub target_client_ip: IpAddr,
    /// Written as destination MAC on client->server packets.
    pub client_to_server_dmac: MacAddr,
    /// Written as destination MAC on server->client packets.
    pub server_to_client_dmac: MacAddr,
}

/// Rewrite plan in discovery order, at most one rule per source pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairTable {
    rules: Vec<RewriteRule>,
}

impl PairTable {
    pub fn new() -> Self { Self::default() }

    /// Append `rule` unless its source pair is already present.
    pub(crate) fn insert(&mut self, rule: RewriteRule) -> bool {
        if self.get(&rule.source).is_some() { return false; }
        self.rules.push(rule);
        true
    }

    pub fn get(&self, source: &AddressPair) -> Option<&RewriteRule> {
        self.rules.iter().find(|r| r.source == *source)
    }

    pub fn rules(&self) -> &[RewriteRule] { &self.rules }

    pub fn iter(&self) -> slice::Iter<'_, RewriteRule> { self.rules.iter() }

    pub fn len(&self) -> usize { self.rules.len() }

    pub fn is_empty(&self) -> bool { self.rules.is_empty() }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the table as pretty JSON for the `capremap-pairs` viewer.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let table: PairTable = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        let mut seen = HashSet::new();
        for rule in &table.rules {
            if !seen.insert(rule.source) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("duplicate pair in {}: {}", path.display(), rule.source),
                ).into());
            }
        }
        Ok(table)
    }
}

impl<'a> IntoIterator for &'a PairTable {
    type Item = &'a RewriteRule;
    type IntoIter = slice::Iter<'a, RewriteRule>;

    fn into_iter(self) -> Self::IntoIter { self.rules.iter() }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
