//! Role assignment over distinct physical nodes.
//!
//! Transfers only make sense between distinct nodes, so ranks are first
//! deduplicated by mesh coordinate (first rank per coordinate wins, in rank
//! order, so every rank computes the identical list). Roles are then fixed
//! positions in that list: first is the source, last the destination, the
//! middle one or two the proxies.

use crate::error::{Error, Result};
use crate::topology::ProcIdentity;

/// Minimum distinct nodes needed to separate source, proxies, destination.
pub const MIN_DISTINCT_NODES: usize = 4;

/// Role of a rank in the transfer, assigned once and carried in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Proxy,
    Destination,
    /// Takes part in barriers and reductions only.
    Idle,
}

/// Ranks selected for each role, plus the distinct-node list they came from.
#[derive(Debug, Clone)]
pub struct RolePlan {
    pub source: usize,
    pub dest: usize,
    /// Proxy ranks in upstream-share order; empty for a direct route.
    pub proxies: Vec<usize>,
    pub distinct: Vec<ProcIdentity>,
}

/// Deduplicate identities by mesh coordinate, first-seen-by-rank-order wins.
///
/// Deliberately quadratic over the distinct-node count; that count is small
/// relative to total ranks.
pub fn distinct_nodes(all: &[ProcIdentity]) -> Vec<ProcIdentity> {
    let mut distinct: Vec<ProcIdentity> = Vec::new();
    for identity in all {
        if !distinct.iter().any(|d| d.coord == identity.coord) {
            distinct.push(*identity);
        }
    }
    distinct
}

/// Select role ranks from the distinct-node list.
///
/// With `k` distinct nodes: index 0 is the source, `k-1` the destination,
/// `k/2` the single proxy, and `k/2-1`, `k/2` the proxy pair.
///
/// # Errors
/// `InsufficientTopology` if fewer than [`MIN_DISTINCT_NODES`] distinct
/// nodes exist; the job cannot meaningfully separate the roles and must
/// abort.
pub fn plan_roles(all: &[ProcIdentity], num_proxies: usize) -> Result<RolePlan> {
    assert!(num_proxies <= 2, "at most two proxies are supported");
    let distinct = distinct_nodes(all);
    let k = distinct.len();
    if k < MIN_DISTINCT_NODES {
        return Err(Error::InsufficientTopology {
            found: k,
            required: MIN_DISTINCT_NODES,
        });
    }
    let proxies = match num_proxies {
        0 => Vec::new(),
        1 => vec![distinct[k / 2].rank as usize],
        _ => vec![
            distinct[k / 2 - 1].rank as usize,
            distinct[k / 2].rank as usize,
        ],
    };
    Ok(RolePlan {
        source: distinct[0].rank as usize,
        dest: distinct[k - 1].rank as usize,
        proxies,
        distinct,
    })
}

impl RolePlan {
    pub fn role_of(&self, rank: usize) -> Role {
        if rank == self.source {
            Role::Source
        } else if rank == self.dest {
            Role::Destination
        } else if self.proxies.contains(&rank) {
            Role::Proxy
        } else {
            Role::Idle
        }
    }
}
