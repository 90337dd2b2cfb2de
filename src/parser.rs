//! Best-effort decoding of classification output.
//!
//! The inspection tool prints one `server_ip client_ip` record per line. In
//! its comma-separated field mode it prints `v4_server,v4_client,v6_server,
//! v6_client`, with one family pair left empty. Under load it also emits truncated, garbled, or multi-valued records. All
//! of that tolerance lives here: a line is either a well-formed pair or it is
//! dropped, and a dropped line never stops the lines after it.

use std::collections::HashSet;
use std::net::IpAddr;
use std::str::Lines;

use tracing::debug;

use crate::pairs::AddressPair;

/// The two address fields of a record, if it has exactly one filled pair.
fn address_fields(line: &str) -> Option<(&str, &str)> {
    if !line.contains(',') {
        let mut fields = line.split_whitespace();
        let pair = (fields.next()?, fields.next()?);
        return if fields.next().is_none() { Some(pair) } else { None };
    }
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    match fields.as_slice() {
        [a, b] if !a.is_empty() && !b.is_empty() => Some((*a, *b)),
        [a, b, c, d] => match (a.is_empty() && b.is_empty(), c.is_empty() && d.is_empty()) {
            (false, true) if !a.is_empty() && !b.is_empty() => Some((*a, *b)),
            (true, false) if !c.is_empty() && !d.is_empty() => Some((*c, *d)),
            _ => None,
        },
        _ => None,
    }
}

/// Decode one record. `None` means the line is noise.
pub fn parse_line(line: &str) -> Option<AddressPair> {
    let (server, client) = address_fields(line)?;
    let server: IpAddr = server.parse().ok()?;
    let client: IpAddr = client.parse().ok()?;
    if server.is_ipv4() != client.is_ipv4() || server == client { return None; }
    Some(AddressPair { server_ip: server, client_ip: client })
}

/// Lazy iterator over the well-formed pairs in a block of tool output, in
/// input order and without deduplication.
pub struct PairLines<'a> {
    lines: Lines<'a>,
    line_no: usize,
    parsed: usize,
    discarded: usize,
}

pub fn parse_pairs(text: &str) -> PairLines<'_> {
    PairLines { lines: text.lines(), line_no: 0, parsed: 0, discarded: 0 }
}

impl PairLines<'_> {
    /// Pairs yielded so far.
    pub fn parsed(&self) -> usize { self.parsed }

    /// Non-blank lines dropped as noise so far.
    pub fn discarded(&self) -> usize { self.discarded }
}

impl Iterator for PairLines<'_> {
    type Item = AddressPair;

    fn next(&mut self) -> Option<AddressPair> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            if line.trim().is_empty() { continue; }
            match parse_line(line) {
                Some(pair) => {
                    self.parsed += 1;
                    return Some(pair);
                }
                None => {
                    self.discarded += 1;
                    debug!("Skipping malformed classification line {}: {:?}", self.line_no, line);
                }
            }
        }
        None
    }
}

/// Distinct addresses in `src dst` endpoint output, in first-seen order.
/// Unparseable fields are skipped.
pub fn parse_endpoints(text: &str) -> Vec<IpAddr> {
    let mut seen = HashSet::new();
    text.lines()
        .flat_map(|line| line.split(|c: char| c == ',' || c.is_whitespace()))
        .filter_map(|f| f.trim().parse::<IpAddr>().ok())
        .filter(|a| seen.insert(*a))
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
