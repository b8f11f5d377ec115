//! Consistency level arithmetic.
//!
//! [`block_for`] answers "how many replies does this level need". Datacenter
//! aware levels need more than a count, so the coordinator works with an
//! [`AckPolicy`]: one or more groups of endpoints, each with its own
//! requirement, that must all be met.

use crate::error::ProxyError;
use crate::topology::ReplicationStrategy;
use ringstore_common::{ConsistencyLevel, Endpoint};

/// Majority of `rf` replicas.
pub fn quorum_for(rf: usize) -> usize {
    rf / 2 + 1
}

/// Replies `cl` needs for a keyspace replicated with `strategy`.
pub fn block_for(cl: ConsistencyLevel, strategy: &ReplicationStrategy, local_dc: &str) -> usize {
    match cl {
        ConsistencyLevel::Any | ConsistencyLevel::One | ConsistencyLevel::LocalOne => 1,
        ConsistencyLevel::Two => 2,
        ConsistencyLevel::Three => 3,
        ConsistencyLevel::Quorum => quorum_for(strategy.total_rf()),
        ConsistencyLevel::All => strategy.total_rf(),
        ConsistencyLevel::LocalQuorum => quorum_for(strategy.dc_rf(local_dc)),
        ConsistencyLevel::EachQuorum => match strategy.datacenters() {
            Some(dcs) => dcs
                .into_iter()
                .map(|dc| quorum_for(strategy.dc_rf(dc)))
                .sum(),
            None => quorum_for(strategy.total_rf()),
        },
    }
}

/// Whether `live` endpoints (with their datacenters) can satisfy `cl`.
pub fn is_sufficient_live_nodes(
    cl: ConsistencyLevel,
    strategy: &ReplicationStrategy,
    local_dc: &str,
    live: &[(Endpoint, String)],
) -> bool {
    AckPolicy::for_level(cl, strategy, local_dc, &[])
        .is_satisfied(live.iter().map(|(_, dc)| dc.as_str()))
}

/// A set of endpoints that must contribute `required` replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckGroup {
    /// `None` counts every endpoint; `Some(dc)` only endpoints in `dc`.
    pub dc: Option<String>,
    pub required: usize,
}

impl AckGroup {
    fn counts(&self, dc: &str) -> bool {
        self.dc.as_deref().map_or(true, |d| d == dc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPolicy {
    groups: Vec<AckGroup>,
}

impl AckPolicy {
    /// Requirements for `cl`, raised by one for each pending endpoint in the
    /// group it falls into.
    pub fn for_level(
        cl: ConsistencyLevel,
        strategy: &ReplicationStrategy,
        local_dc: &str,
        pending: &[(Endpoint, String)],
    ) -> Self {
        let mut groups = match cl {
            ConsistencyLevel::LocalOne | ConsistencyLevel::LocalQuorum => vec![AckGroup {
                dc: Some(local_dc.to_string()),
                required: block_for(cl, strategy, local_dc),
            }],
            ConsistencyLevel::EachQuorum => match strategy.datacenters() {
                Some(dcs) => dcs
                    .into_iter()
                    .map(|dc| AckGroup {
                        dc: Some(dc.to_string()),
                        required: quorum_for(strategy.dc_rf(dc)),
                    })
                    .collect(),
                None => vec![AckGroup {
                    dc: None,
                    required: block_for(cl, strategy, local_dc),
                }],
            },
            _ => vec![AckGroup {
                dc: None,
                required: block_for(cl, strategy, local_dc),
            }],
        };

        for (_, dc) in pending {
            if let Some(group) = groups.iter_mut().find(|g| g.counts(dc)) {
                group.required += 1;
            }
        }
        Self { groups }
    }

    /// `required` replies from any endpoints.
    pub fn total(required: usize) -> Self {
        Self {
            groups: vec![AckGroup { dc: None, required }],
        }
    }

    pub fn groups(&self) -> &[AckGroup] {
        &self.groups
    }

    /// Total replies required across groups.
    pub fn block_for(&self) -> usize {
        self.groups.iter().map(|g| g.required).sum()
    }

    /// Whether a reply from an endpoint in `dc` counts towards any group.
    pub fn counts(&self, dc: &str) -> bool {
        self.groups.iter().any(|g| g.counts(dc))
    }

    fn tally<'a>(&self, dcs: impl IntoIterator<Item = &'a str>) -> Vec<usize> {
        let mut counts = vec![0; self.groups.len()];
        for dc in dcs {
            for (count, group) in counts.iter_mut().zip(&self.groups) {
                if group.counts(dc) {
                    *count += 1;
                }
            }
        }
        counts
    }

    /// Whether replies from endpoints in `dcs` meet every group.
    pub fn is_satisfied<'a>(&self, dcs: impl IntoIterator<Item = &'a str>) -> bool {
        self.tally(dcs)
            .iter()
            .zip(&self.groups)
            .all(|(count, group)| *count >= group.required)
    }

    /// Fail with `Unavailable` naming the first group `live` cannot meet.
    pub fn assure_sufficient(
        &self,
        cl: ConsistencyLevel,
        live: &[(Endpoint, String)],
    ) -> Result<(), ProxyError> {
        let counts = self.tally(live.iter().map(|(_, dc)| dc.as_str()));
        for (alive, group) in counts.into_iter().zip(&self.groups) {
            if alive < group.required {
                return Err(ProxyError::Unavailable {
                    cl,
                    required: group.required,
                    alive,
                });
            }
        }
        Ok(())
    }

    /// The fewest endpoints, nearest first, that together meet every group.
    /// `sorted` must already be in proximity order.
    pub fn filter_for_query(&self, sorted: &[(Endpoint, String)]) -> Vec<Endpoint> {
        let mut needed: Vec<usize> = self.groups.iter().map(|g| g.required).collect();
        let mut chosen = Vec::new();
        for (ep, dc) in sorted {
            if needed.iter().all(|n| *n == 0) {
                break;
            }
            let useful = needed
                .iter()
                .zip(&self.groups)
                .any(|(n, g)| *n > 0 && g.counts(dc));
            if !useful {
                continue;
            }
            for (n, g) in needed.iter_mut().zip(&self.groups) {
                if g.counts(dc) {
                    *n = n.saturating_sub(1);
                }
            }
            chosen.push(*ep);
        }
        chosen
    }
}
