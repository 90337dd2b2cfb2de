//! Turns the raw candidate stream into a deduplicated rewrite plan with
//! deterministic target addresses.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use tracing::{debug, info};

use crate::error::{RemapError, Result, Side};
use crate::pairs::{AddressPair, PairTable, RewriteRule};
use crate::target::TargetSpec;

/// Build the pair table for `candidates`.
///
/// Duplicate pairs are dropped (first occurrence wins). Each distinct server
/// address is then given the next free host of the server subnet in
/// first-seen order, and clients likewise from the client subnet.
///
/// Fails without producing a table if an observed address is already inside
/// a target subnet or has the wrong address family, if a side has more
/// distinct addresses than its subnet has hosts, or if an address is a server
/// in one pair and a client in another. Substitution is keyed on the address
/// alone, so such an address cannot take both a server and a client target.
pub fn reconcile<I>(candidates: I, spec: &TargetSpec) -> Result<PairTable>
where
    I: IntoIterator<Item = AddressPair>,
{
    let mut seen = HashSet::new();
    let mut total = 0usize;
    let unique: Vec<AddressPair> = candidates
        .into_iter()
        .inspect(|_| total += 1)
        .filter(|p| seen.insert(*p))
        .collect();
    debug!("{} candidates, {} unique pairs", total, unique.len());

    let servers = distinct(unique.iter().map(|p| p.server_ip));
    let clients = distinct(unique.iter().map(|p| p.client_ip));

    for (side, addrs) in [(Side::Server, &servers), (Side::Client, &clients)] {
        check_addresses(side, addrs, spec)?;
    }
    for (side, addrs) in [(Side::Server, &servers), (Side::Client, &clients)] {
        let available = spec.subnet(side).capacity();
        if addrs.len() as u128 > available {
            return Err(RemapError::SubnetExhausted { side, available, needed: addrs.len() });
        }
    }
    let server_set: HashSet<IpAddr> = servers.iter().copied().collect();
    if let Some(addr) = clients.iter().find(|a| server_set.contains(a)) {
        return Err(RemapError::RoleConflict { addr: *addr });
    }

    let mut targets: HashMap<IpAddr, IpAddr> = HashMap::with_capacity(servers.len() + clients.len());
    for (side, addrs) in [(Side::Server, &servers), (Side::Client, &clients)] {
        targets.extend(addrs.iter().copied().zip(spec.subnet(side).hosts()));
    }

    let mut table = PairTable::new();
    for pair in unique {
        table.insert(RewriteRule {
            source: pair,
            target_server_ip: targets[&pair.server_ip],
            target_client_ip: targets[&pair.client_ip],
            client_to_server_dmac: spec.client_mac,
            server_to_client_dmac: spec.server_mac,
        });
    }

    info!(
        "Identified {} client/server pairs ({} servers, {} clients)",
        table.len(), servers.len(), clients.len()
    );
    Ok(table)
}

/// Distinct addresses in first-seen order.
fn distinct(addrs: impl Iterator<Item = IpAddr>) -> Vec<IpAddr> {
    let mut seen = HashSet::new();
    addrs.filter(|a| seen.insert(*a)).collect()
}

fn check_addresses(side: Side, addrs: &[IpAddr], spec: &TargetSpec) -> Result<()> {
    let own = spec.subnet(side);
    for addr in addrs {
        if addr.is_ipv6() != own.is_ipv6() {
            return Err(RemapError::FamilyMismatch { side, addr: *addr, subnet: own.to_string() });
        }
        for target in [&spec.server_subnet, &spec.client_subnet] {
            if target.contains(addr) {
                return Err(RemapError::TargetOverlap { side, addr: *addr, subnet: target.to_string() });
            }
        }
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
