use metroo_core::{AgentId, Cidr, DomainPattern, RouteKey};
use metroo_link::payload::{RouteAdv, RouteAdvEntry};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// One installed route. `path` runs from the next hop to the origin and never
/// contains the local agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub origin: AgentId,
    pub next_hop: AgentId,
    pub path: Vec<AgentId>,
    pub metric: u16,
    pub learned_at: Instant,
    pub ttl: Duration,
}

impl RouteEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.learned_at) >= self.ttl
    }

    /// Total order for best-route selection: smaller metric, then shorter
    /// path, then lower next-hop id. The id tie-break keeps simultaneous
    /// equal advertisements from flapping.
    fn rank(&self) -> (u16, usize, AgentId) {
        (self.metric, self.path.len(), self.next_hop)
    }
}

/// Serializable view of a route for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSnapshot {
    pub key: String,
    pub origin: String,
    pub next_hop: String,
    pub metric: u16,
    pub hop_count: usize,
    pub path_ids: Vec<String>,
    pub expires_in_secs: u64,
}

/// Where a destination leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// This agent's own exit configuration covers the destination.
    LocalExit,
    Remote { origin: AgentId, next_hop: AgentId },
}

impl Resolution {
    pub fn origin(&self, local: AgentId) -> AgentId {
        match self {
            Resolution::LocalExit => local,
            Resolution::Remote { origin, .. } => *origin,
        }
    }
}

/// Result of applying one advertisement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AdvOutcome {
    pub installed: usize,
    pub refreshed: usize,
    pub rejected_loops: usize,
    pub rejected_hops: usize,
}

struct Tables {
    agents: HashMap<AgentId, RouteEntry>,
    cidrs: HashMap<Cidr, RouteEntry>,
    domains: HashMap<DomainPattern, RouteEntry>,
}

pub struct Router {
    local_id: AgentId,
    max_hops: u8,
    route_ttl: Duration,
    local_cidrs: Vec<Cidr>,
    local_domains: Vec<DomainPattern>,
    tables: RwLock<Tables>,
}

impl Router {
    pub fn new(local_id: AgentId, max_hops: u8, route_ttl: Duration) -> Self {
        Self {
            local_id,
            max_hops,
            route_ttl,
            local_cidrs: Vec::new(),
            local_domains: Vec::new(),
            tables: RwLock::new(Tables {
                agents: HashMap::new(),
                cidrs: HashMap::new(),
                domains: HashMap::new(),
            }),
        }
    }

    /// Install this agent's own exit reachability, advertised with metric 0.
    pub fn set_local_exit(&mut self, cidrs: Vec<Cidr>, domains: Vec<DomainPattern>) {
        self.local_cidrs = cidrs;
        self.local_domains = domains;
    }

    pub fn local_id(&self) -> AgentId {
        self.local_id
    }

    pub fn route_count(&self) -> usize {
        let t = self.tables.read();
        t.agents.len() + t.cidrs.len() + t.domains.len()
    }

    /// Agents this router can currently address (always includes self).
    pub fn known_agents(&self) -> Vec<AgentId> {
        let t = self.tables.read();
        let mut ids: Vec<AgentId> = t.agents.keys().copied().collect();
        ids.push(self.local_id);
        ids.sort();
        ids.dedup();
        ids
    }

    /// Apply one received advertisement from adjacent peer `from`.
    pub fn apply_adv(&self, from: AgentId, adv: &RouteAdv) -> AdvOutcome {
        let now = Instant::now();
        let mut outcome = AdvOutcome::default();
        let mut tables = self.tables.write();
        for entry in &adv.entries {
            // Never learn a route to ourselves or our own reachability.
            if self.is_self_originated(&entry.key) {
                continue;
            }
            // Loop prevention: reject anything that already went through us.
            if entry.path.contains(&self.local_id) {
                outcome.rejected_loops += 1;
                trace!(key = %entry.key, "rejected looping advertisement");
                continue;
            }
            let mut path = Vec::with_capacity(entry.path.len() + 1);
            path.push(from);
            path.extend_from_slice(&entry.path);
            if path.len() > self.max_hops as usize {
                outcome.rejected_hops += 1;
                continue;
            }
            let candidate = RouteEntry {
                origin: *path.last().unwrap_or(&from),
                next_hop: from,
                path,
                metric: entry.metric,
                learned_at: now,
                ttl: Duration::from_secs(entry.ttl_secs as u64),
            };
            match &entry.key {
                RouteKey::Agent(id) => Self::upsert_entry(
                    tables.agents.entry(*id),
                    candidate,
                    from,
                    now,
                    &entry.key,
                    &mut outcome,
                ),
                RouteKey::Cidr(c) => Self::upsert_entry(
                    tables.cidrs.entry(*c),
                    candidate,
                    from,
                    now,
                    &entry.key,
                    &mut outcome,
                ),
                RouteKey::Domain(d) => Self::upsert_entry(
                    tables.domains.entry(d.clone()),
                    candidate,
                    from,
                    now,
                    &entry.key,
                    &mut outcome,
                ),
            }
        }
        outcome
    }

    fn upsert_entry<K>(
        slot: std::collections::hash_map::Entry<'_, K, RouteEntry>,
        candidate: RouteEntry,
        from: AgentId,
        now: Instant,
        key: &RouteKey,
        outcome: &mut AdvOutcome,
    ) {
        match slot {
            std::collections::hash_map::Entry::Vacant(v) => {
                debug!(key = %key, next_hop = %from.short(), metric = candidate.metric, "route installed");
                v.insert(candidate);
                outcome.installed += 1;
            }
            std::collections::hash_map::Entry::Occupied(mut o) => {
                let existing = o.get();
                if existing.next_hop == from {
                    // The neighbour's current view always refreshes.
                    o.insert(candidate);
                    outcome.refreshed += 1;
                } else if candidate.rank() < existing.rank() || existing.is_expired(now) {
                    debug!(key = %key, next_hop = %from.short(), metric = candidate.metric, "route replaced");
                    o.insert(candidate);
                    outcome.installed += 1;
                }
            }
        }
    }

    fn is_self_originated(&self, key: &RouteKey) -> bool {
        match key {
            RouteKey::Agent(id) => *id == self.local_id,
            RouteKey::Cidr(c) => self.local_cidrs.contains(c),
            RouteKey::Domain(d) => self.local_domains.contains(d),
        }
    }

    /// Explicit withdrawal: removes the named keys learned from `from` only.
    pub fn apply_withdraw(&self, from: AgentId, keys: &[RouteKey]) -> usize {
        let mut tables = self.tables.write();
        let mut removed = 0;
        for key in keys {
            let gone = match key {
                RouteKey::Agent(id) => match tables.agents.get(id) {
                    Some(e) if e.next_hop == from => tables.agents.remove(id).is_some(),
                    _ => false,
                },
                RouteKey::Cidr(c) => match tables.cidrs.get(c) {
                    Some(e) if e.next_hop == from => tables.cidrs.remove(c).is_some(),
                    _ => false,
                },
                RouteKey::Domain(d) => match tables.domains.get(d) {
                    Some(e) if e.next_hop == from => tables.domains.remove(d).is_some(),
                    _ => false,
                },
            };
            if gone {
                debug!(key = %key, from = %from.short(), "route withdrawn");
                removed += 1;
            }
        }
        removed
    }

    /// Drop every route whose next hop is the vanished peer. Returns the keys
    /// so the caller can flood a withdrawal.
    pub fn peer_down(&self, peer: AgentId) -> Vec<RouteKey> {
        let mut tables = self.tables.write();
        let mut withdrawn = Vec::new();
        tables.agents.retain(|id, e| {
            if e.next_hop == peer {
                withdrawn.push(RouteKey::Agent(*id));
                false
            } else {
                true
            }
        });
        tables.cidrs.retain(|c, e| {
            if e.next_hop == peer {
                withdrawn.push(RouteKey::Cidr(*c));
                false
            } else {
                true
            }
        });
        tables.domains.retain(|d, e| {
            if e.next_hop == peer {
                withdrawn.push(RouteKey::Domain(d.clone()));
                false
            } else {
                true
            }
        });
        if !withdrawn.is_empty() {
            debug!(peer = %peer.short(), count = withdrawn.len(), "withdrew routes for dead peer");
        }
        withdrawn
    }

    /// Remove everything past its TTL.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tables = self.tables.write();
        let before =
            tables.agents.len() + tables.cidrs.len() + tables.domains.len();
        tables.agents.retain(|_, e| !e.is_expired(now));
        tables.cidrs.retain(|_, e| !e.is_expired(now));
        tables.domains.retain(|_, e| !e.is_expired(now));
        before - (tables.agents.len() + tables.cidrs.len() + tables.domains.len())
    }

    /// Next hop for agent-addressed traffic.
    pub fn next_hop_for_agent(&self, dest: AgentId) -> Option<AgentId> {
        self.tables.read().agents.get(&dest).map(|e| e.next_hop)
    }

    pub fn agent_route(&self, dest: AgentId) -> Option<RouteEntry> {
        self.tables.read().agents.get(&dest).cloned()
    }

    /// Resolve a destination IP: local exit first on a longest-prefix tie,
    /// `0.0.0.0/0` (or `::/0`) as the legal fallback.
    pub fn resolve_ip(&self, ip: IpAddr) -> Option<Resolution> {
        let mut best: Option<(u8, Resolution)> = None;
        for cidr in &self.local_cidrs {
            if cidr.contains(ip) {
                consider(&mut best, cidr.prefix(), true, Resolution::LocalExit);
            }
        }
        let tables = self.tables.read();
        for (cidr, entry) in &tables.cidrs {
            if cidr.contains(ip) {
                consider(
                    &mut best,
                    cidr.prefix(),
                    false,
                    Resolution::Remote {
                        origin: entry.origin,
                        next_hop: entry.next_hop,
                    },
                );
            }
        }
        best.map(|(_, r)| r)
    }

    /// The `0.0.0.0/0` / `::/0` fallback, if anyone advertises (or locally
    /// configures) one. Hostnames with no domain route go here, since names
    /// only resolve to addresses at the exit.
    pub fn default_route(&self) -> Option<Resolution> {
        if self.local_cidrs.iter().any(|c| c.is_default()) {
            return Some(Resolution::LocalExit);
        }
        let tables = self.tables.read();
        tables
            .cidrs
            .iter()
            .filter(|(c, _)| c.is_default())
            .min_by_key(|(c, e)| (!c.is_ipv4(), e.metric, e.path.len(), e.next_hop))
            .map(|(_, e)| Resolution::Remote {
                origin: e.origin,
                next_hop: e.next_hop,
            })
    }

    /// Resolve a domain: exact match beats wildcards, longer wildcard
    /// suffixes beat shorter ones, local exit wins ties.
    pub fn resolve_domain(&self, name: &str) -> Option<Resolution> {
        let tables = self.tables.read();
        // Exact matches first.
        for pattern in &self.local_domains {
            if !pattern.is_wildcard() && pattern.matches(name) {
                return Some(Resolution::LocalExit);
            }
        }
        for (pattern, entry) in &tables.domains {
            if !pattern.is_wildcard() && pattern.matches(name) {
                return Some(Resolution::Remote {
                    origin: entry.origin,
                    next_hop: entry.next_hop,
                });
            }
        }
        // Then the longest matching wildcard.
        let mut best: Option<(usize, bool, Resolution)> = None;
        for pattern in &self.local_domains {
            if pattern.is_wildcard() && pattern.matches(name) {
                let spec = pattern.specificity();
                if best.as_ref().map_or(true, |(s, _, _)| spec > *s) {
                    best = Some((spec, true, Resolution::LocalExit));
                }
            }
        }
        for (pattern, entry) in &tables.domains {
            if pattern.is_wildcard() && pattern.matches(name) {
                let spec = pattern.specificity();
                let better = match &best {
                    None => true,
                    Some((s, local, _)) => spec > *s && !(*local && spec == *s),
                };
                if better {
                    best = Some((
                        spec,
                        false,
                        Resolution::Remote {
                            origin: entry.origin,
                            next_hop: entry.next_hop,
                        },
                    ));
                }
            }
        }
        best.map(|(_, _, r)| r)
    }

    /// Build this tick's advertisement: self with metric 0 and empty path,
    /// local exit reachability, then every installed best route with the
    /// metric bumped. Entries that would overflow the hop budget at the
    /// receiver are suppressed.
    pub fn snapshot_adv(&self) -> RouteAdv {
        let ttl_secs = self.route_ttl.as_secs() as u32;
        let mut entries = vec![RouteAdvEntry {
            key: RouteKey::Agent(self.local_id),
            metric: 0,
            ttl_secs,
            path: Vec::new(),
        }];
        for cidr in &self.local_cidrs {
            entries.push(RouteAdvEntry {
                key: RouteKey::Cidr(*cidr),
                metric: 0,
                ttl_secs,
                path: Vec::new(),
            });
        }
        for domain in &self.local_domains {
            entries.push(RouteAdvEntry {
                key: RouteKey::Domain(domain.clone()),
                metric: 0,
                ttl_secs,
                path: Vec::new(),
            });
        }
        let tables = self.tables.read();
        let now = Instant::now();
        let re_adv = |key: RouteKey, entry: &RouteEntry| -> Option<RouteAdvEntry> {
            if entry.is_expired(now) || entry.path.len() + 1 > self.max_hops as usize {
                return None;
            }
            Some(RouteAdvEntry {
                key,
                metric: entry.metric.saturating_add(1),
                ttl_secs,
                path: entry.path.clone(),
            })
        };
        entries.extend(
            tables
                .agents
                .iter()
                .filter_map(|(id, e)| re_adv(RouteKey::Agent(*id), e)),
        );
        entries.extend(
            tables
                .cidrs
                .iter()
                .filter_map(|(c, e)| re_adv(RouteKey::Cidr(*c), e)),
        );
        entries.extend(
            tables
                .domains
                .iter()
                .filter_map(|(d, e)| re_adv(RouteKey::Domain(d.clone()), e)),
        );
        RouteAdv { entries }
    }

    /// Control-plane listing of the whole RIB.
    pub fn snapshot_routes(&self) -> Vec<RouteSnapshot> {
        let now = Instant::now();
        let local = self.local_id;
        let tables = self.tables.read();
        let mut out = Vec::new();
        let mut push = |key: String, e: &RouteEntry| {
            let expires = e.ttl.saturating_sub(now.duration_since(e.learned_at));
            // The rendered path runs from this agent to the origin inclusive;
            // hop_count counts the links, not the agents.
            let mut path_ids = Vec::with_capacity(e.path.len() + 1);
            path_ids.push(local.short());
            path_ids.extend(e.path.iter().map(|id| id.short()));
            out.push(RouteSnapshot {
                key,
                origin: e.origin.short(),
                next_hop: e.next_hop.short(),
                metric: e.metric,
                hop_count: e.path.len(),
                path_ids,
                expires_in_secs: expires.as_secs(),
            });
        };
        for (id, e) in &tables.agents {
            push(format!("agent:{}", id.short()), e);
        }
        for (c, e) in &tables.cidrs {
            push(c.to_string(), e);
        }
        for (d, e) in &tables.domains {
            push(d.to_string(), e);
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

fn consider(
    best: &mut Option<(u8, Resolution)>,
    prefix: u8,
    local: bool,
    resolution: Resolution,
) {
    let better = match best {
        None => true,
        Some((p, existing)) => {
            prefix > *p || (prefix == *p && local && !matches!(existing, Resolution::LocalExit))
        }
    };
    if better {
        *best = Some((prefix, resolution));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> AgentId {
        AgentId::from_bytes([b; 16])
    }

    fn adv_entry(key: RouteKey, metric: u16, path: Vec<AgentId>) -> RouteAdvEntry {
        RouteAdvEntry {
            key,
            metric,
            ttl_secs: 300,
            path,
        }
    }

    fn router() -> Router {
        Router::new(id(1), 16, Duration::from_secs(300))
    }

    #[test]
    fn installs_and_looks_up_agent_routes() {
        let r = router();
        let adv = RouteAdv {
            entries: vec![adv_entry(RouteKey::Agent(id(3)), 1, vec![id(3)])],
        };
        let outcome = r.apply_adv(id(2), &adv);
        assert_eq!(outcome.installed, 1);
        assert_eq!(r.next_hop_for_agent(id(3)), Some(id(2)));
        let entry = r.agent_route(id(3)).unwrap();
        assert_eq!(entry.path, vec![id(2), id(3)]);
        assert_eq!(entry.origin, id(3));
    }

    #[test]
    fn rejects_looping_paths() {
        let r = router();
        let adv = RouteAdv {
            entries: vec![adv_entry(RouteKey::Agent(id(9)), 2, vec![id(1), id(9)])],
        };
        let outcome = r.apply_adv(id(2), &adv);
        assert_eq!(outcome.rejected_loops, 1);
        assert_eq!(outcome.installed, 0);
        assert_eq!(r.next_hop_for_agent(id(9)), None);
    }

    #[test]
    fn hop_budget_is_exact() {
        let mut long_path: Vec<AgentId> = (10..25).map(id).collect();
        assert_eq!(long_path.len(), 15);
        let r = router();
        // 15 hops advertised + the sender = 16 = max_hops: accepted.
        let adv = RouteAdv {
            entries: vec![adv_entry(RouteKey::Agent(id(25)), 15, long_path.clone())],
        };
        assert_eq!(r.apply_adv(id(2), &adv).installed, 1);
        // One more hop is dropped.
        long_path.push(id(25));
        let adv = RouteAdv {
            entries: vec![adv_entry(RouteKey::Agent(id(26)), 16, long_path)],
        };
        let outcome = r.apply_adv(id(2), &adv);
        assert_eq!(outcome.rejected_hops, 1);
    }

    #[test]
    fn better_metric_replaces_worse() {
        let r = router();
        let key = RouteKey::Cidr("10.9.0.0/16".parse().unwrap());
        r.apply_adv(
            id(2),
            &RouteAdv {
                entries: vec![adv_entry(key.clone(), 3, vec![id(5), id(6), id(7)])],
            },
        );
        // A better (shorter) route from another neighbour wins.
        let outcome = r.apply_adv(
            id(3),
            &RouteAdv {
                entries: vec![adv_entry(key.clone(), 1, vec![id(7)])],
            },
        );
        assert_eq!(outcome.installed, 1);
        let resolution = r.resolve_ip("10.9.1.1".parse().unwrap()).unwrap();
        assert_eq!(
            resolution,
            Resolution::Remote {
                origin: id(7),
                next_hop: id(3)
            }
        );
        // A worse route from a third neighbour does not.
        let outcome = r.apply_adv(
            id(4),
            &RouteAdv {
                entries: vec![adv_entry(key, 5, vec![id(6), id(7)])],
            },
        );
        assert_eq!(outcome.installed, 0);
    }

    #[test]
    fn equal_routes_tie_break_on_next_hop_id() {
        let r = router();
        let key = RouteKey::Agent(id(9));
        r.apply_adv(
            id(5),
            &RouteAdv {
                entries: vec![adv_entry(key.clone(), 1, vec![id(9)])],
            },
        );
        // Same metric and path length from a lower neighbour id: wins.
        r.apply_adv(
            id(3),
            &RouteAdv {
                entries: vec![adv_entry(key.clone(), 1, vec![id(9)])],
            },
        );
        assert_eq!(r.next_hop_for_agent(id(9)), Some(id(3)));
        // And a higher neighbour id does not take it back.
        r.apply_adv(
            id(4),
            &RouteAdv {
                entries: vec![adv_entry(key, 1, vec![id(9)])],
            },
        );
        assert_eq!(r.next_hop_for_agent(id(9)), Some(id(3)));
    }

    #[test]
    fn reapplying_the_same_adv_is_idempotent() {
        let r = router();
        let adv = RouteAdv {
            entries: vec![adv_entry(RouteKey::Agent(id(3)), 1, vec![id(3)])],
        };
        r.apply_adv(id(2), &adv);
        let first = r.snapshot_routes();
        let outcome = r.apply_adv(id(2), &adv);
        assert_eq!(outcome.installed, 0);
        assert_eq!(outcome.refreshed, 1);
        let second = r.snapshot_routes();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].key, second[0].key);
        assert_eq!(first[0].path_ids, second[0].path_ids);
    }

    #[test]
    fn withdraw_only_affects_the_sending_next_hop() {
        let r = router();
        let key = RouteKey::Agent(id(9));
        r.apply_adv(
            id(2),
            &RouteAdv {
                entries: vec![adv_entry(key.clone(), 1, vec![id(9)])],
            },
        );
        // A withdrawal from someone who is not the next hop does nothing.
        assert_eq!(r.apply_withdraw(id(4), &[key.clone()]), 0);
        assert_eq!(r.next_hop_for_agent(id(9)), Some(id(2)));
        // From the installed next hop it removes the route.
        assert_eq!(r.apply_withdraw(id(2), &[key]), 1);
        assert_eq!(r.next_hop_for_agent(id(9)), None);
    }

    #[test]
    fn peer_down_withdraws_and_reports_keys() {
        let r = router();
        r.apply_adv(
            id(2),
            &RouteAdv {
                entries: vec![
                    adv_entry(RouteKey::Agent(id(9)), 1, vec![id(9)]),
                    adv_entry(RouteKey::Cidr("10.0.0.0/8".parse().unwrap()), 1, vec![id(9)]),
                ],
            },
        );
        r.apply_adv(
            id(3),
            &RouteAdv {
                entries: vec![adv_entry(RouteKey::Agent(id(8)), 1, vec![id(8)])],
            },
        );
        let withdrawn = r.peer_down(id(2));
        assert_eq!(withdrawn.len(), 2);
        assert_eq!(r.next_hop_for_agent(id(9)), None);
        assert_eq!(r.next_hop_for_agent(id(8)), Some(id(3)));
    }

    #[test]
    fn expired_routes_are_swept() {
        let r = router();
        let adv = RouteAdv {
            entries: vec![RouteAdvEntry {
                key: RouteKey::Agent(id(9)),
                metric: 1,
                ttl_secs: 0,
                path: vec![id(9)],
            }],
        };
        r.apply_adv(id(2), &adv);
        assert_eq!(r.sweep(), 1);
        assert_eq!(r.next_hop_for_agent(id(9)), None);
    }

    #[test]
    fn longest_prefix_wins_with_default_fallback() {
        let mut r = router();
        r.set_local_exit(vec!["10.9.4.0/24".parse().unwrap()], vec![]);
        r.apply_adv(
            id(2),
            &RouteAdv {
                entries: vec![
                    adv_entry(RouteKey::Cidr("10.9.0.0/16".parse().unwrap()), 1, vec![id(7)]),
                    adv_entry(RouteKey::Cidr("0.0.0.0/0".parse().unwrap()), 1, vec![id(8)]),
                ],
            },
        );
        // /24 local beats /16 learned.
        assert_eq!(
            r.resolve_ip("10.9.4.9".parse().unwrap()),
            Some(Resolution::LocalExit)
        );
        // /16 learned beats default.
        assert_eq!(
            r.resolve_ip("10.9.7.7".parse().unwrap()),
            Some(Resolution::Remote {
                origin: id(7),
                next_hop: id(2)
            })
        );
        // Anything else falls to the default route.
        assert_eq!(
            r.resolve_ip("8.8.8.8".parse().unwrap()),
            Some(Resolution::Remote {
                origin: id(8),
                next_hop: id(2)
            })
        );
    }

    #[test]
    fn domain_resolution_prefers_exact_then_longest_wildcard() {
        let r = router();
        r.apply_adv(
            id(2),
            &RouteAdv {
                entries: vec![
                    adv_entry(
                        RouteKey::Domain("dns.internal.example".parse().unwrap()),
                        1,
                        vec![id(7)],
                    ),
                    adv_entry(
                        RouteKey::Domain("*.internal.example".parse().unwrap()),
                        1,
                        vec![id(8)],
                    ),
                    adv_entry(RouteKey::Domain("*.example".parse().unwrap()), 1, vec![id(9)]),
                ],
            },
        );
        let exact = r.resolve_domain("dns.internal.example").unwrap();
        assert_eq!(
            exact,
            Resolution::Remote {
                origin: id(7),
                next_hop: id(2)
            }
        );
        let wild = r.resolve_domain("web.internal.example").unwrap();
        assert_eq!(
            wild,
            Resolution::Remote {
                origin: id(8),
                next_hop: id(2)
            }
        );
        let outer = r.resolve_domain("plain.example").unwrap();
        assert_eq!(
            outer,
            Resolution::Remote {
                origin: id(9),
                next_hop: id(2)
            }
        );
        assert_eq!(r.resolve_domain("example.org"), None);
    }

    #[test]
    fn snapshot_adv_carries_self_local_exit_and_learned_routes() {
        let mut r = router();
        r.set_local_exit(
            vec!["0.0.0.0/0".parse().unwrap()],
            vec!["*.internal.example".parse().unwrap()],
        );
        r.apply_adv(
            id(2),
            &RouteAdv {
                entries: vec![adv_entry(RouteKey::Agent(id(9)), 1, vec![id(9)])],
            },
        );
        let adv = r.snapshot_adv();
        // Self entry always first, metric 0, empty path.
        assert_eq!(adv.entries[0].key, RouteKey::Agent(id(1)));
        assert_eq!(adv.entries[0].metric, 0);
        assert!(adv.entries[0].path.is_empty());
        // Learned agent route re-advertised with the metric bumped.
        let re = adv
            .entries
            .iter()
            .find(|e| e.key == RouteKey::Agent(id(9)))
            .unwrap();
        assert_eq!(re.metric, 2);
        assert_eq!(re.path, vec![id(2), id(9)]);
        assert_eq!(adv.entries.len(), 4);
    }

    #[test]
    fn self_reachability_is_never_learned() {
        let mut r = router();
        r.set_local_exit(vec!["10.0.0.0/8".parse().unwrap()], vec![]);
        let outcome = r.apply_adv(
            id(2),
            &RouteAdv {
                entries: vec![
                    adv_entry(RouteKey::Agent(id(1)), 3, vec![id(5)]),
                    adv_entry(RouteKey::Cidr("10.0.0.0/8".parse().unwrap()), 3, vec![id(5)]),
                ],
            },
        );
        assert_eq!(outcome.installed, 0);
        assert_eq!(r.route_count(), 0);
    }
}
