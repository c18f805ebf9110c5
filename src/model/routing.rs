use std::collections::BTreeMap;

use crate::model::messages::FrameEntry;

pub type RouterId = u16;

/// Sentinel metric meaning "unreachable".
pub const INFINITY: u8 = 16;

pub const MIN_ROUTER_ID: RouterId = 1;
pub const MAX_ROUTER_ID: RouterId = 64_000;

pub fn is_valid_router_id(id: RouterId) -> bool {
    (MIN_ROUTER_ID..=MAX_ROUTER_ID).contains(&id)
}

/// One routing-table entry from the owning router's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub dest: RouterId,
    pub via: RouterId,
    pub metric: u8,
}

/// Identity of a route for timer bookkeeping. A poisoned route awaiting
/// deletion is tracked by the (via, dest) pair it was poisoned under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub via: RouterId,
    pub dest: RouterId,
}

/// Handle for one armed route timeout. The generation makes stale timer
/// fires detectable: a reset or poison bumps the entry's generation, so a
/// timer that already fired and is waiting on the lock finds its token
/// out of date and does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutToken {
    pub dest: RouterId,
    pub via: RouterId,
    pub generation: u64,
}

/// Side effects the daemon must enact after a table mutation: timers to
/// arm, garbage collections to start or cancel, and whether a triggered
/// update is due.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TableEffects {
    pub timeouts_armed: Vec<TimeoutToken>,
    pub gc_started: Vec<RouteKey>,
    pub gc_cancelled: Vec<RouteKey>,
    pub triggered_update: bool,
}

#[derive(Debug, Clone)]
struct TableEntry {
    via: RouterId,
    metric: u8,
    timeout_gen: u64,
}

/// The routing table plus the distance-vector update rules. Keyed by
/// destination, so there is at most one route per destination by
/// construction. Purely synchronous; the daemon owns the mutex and the
/// timer tasks that act on the returned effects.
#[derive(Debug)]
pub struct RouteTable {
    self_id: RouterId,
    entries: BTreeMap<RouterId, TableEntry>,
    next_gen: u64,
}

impl RouteTable {
    pub fn new(self_id: RouterId) -> Self {
        Self {
            self_id,
            entries: BTreeMap::new(),
            next_gen: 0,
        }
    }

    pub fn get(&self, dest: RouterId) -> Option<Route> {
        self.entries.get(&dest).map(|entry| Route {
            dest,
            via: entry.via,
            metric: entry.metric,
        })
    }

    /// Ordered copy of the table for serialization and printing.
    pub fn snapshot(&self) -> Vec<Route> {
        self.entries
            .iter()
            .map(|(dest, entry)| Route {
                dest: *dest,
                via: entry.via,
                metric: entry.metric,
            })
            .collect()
    }

    /// Install the startup route to a directly configured neighbor and arm
    /// its timeout.
    pub fn seed_direct(&mut self, neighbor: RouterId, metric: u8) -> TimeoutToken {
        self.entries.insert(
            neighbor,
            TableEntry {
                via: neighbor,
                metric,
                timeout_gen: 0,
            },
        );
        self.arm_timeout(neighbor)
    }

    /// Apply one decoded frame from neighbor `src` whose configured link
    /// metric is `link_metric`. Entries are processed in wire order.
    pub fn apply_frame(
        &mut self,
        src: RouterId,
        link_metric: u8,
        entries: &[FrameEntry],
    ) -> TableEffects {
        let mut effects = TableEffects::default();
        for adv in entries {
            if adv.metric < 1 {
                tracing::debug!(src, dest = adv.dest, "discarding entry with zero metric");
                continue;
            }
            if adv.dest == self.self_id {
                // A neighbor advertising a route to us with ourselves as the
                // next hop is announcing its direct link back; rebind it to
                // our view as the route to that neighbor. Any other
                // route-to-self entry carries no usable information.
                if adv.next_hop == self.self_id {
                    self.learn_direct_link(src, adv.metric, &mut effects);
                }
                continue;
            }
            let total = u8::min(link_metric.saturating_add(adv.metric), INFINITY);
            self.learn(src, adv.dest, total, &mut effects);
        }
        effects
    }

    /// Route timeout expiry. Returns the key of the poisoned route, or None
    /// when the token is stale (the route was refreshed, replaced, or
    /// already poisoned since the timer was armed).
    pub fn expire(&mut self, token: TimeoutToken) -> Option<RouteKey> {
        let entry = self.entries.get_mut(&token.dest)?;
        if entry.via != token.via
            || entry.timeout_gen != token.generation
            || entry.metric == INFINITY
        {
            return None;
        }
        entry.metric = INFINITY;
        entry.timeout_gen = self.next_gen + 1;
        // Poisoned routes carry no timeout; retire the generation so a
        // concurrent stale fire cannot act.
        self.next_gen += 1;
        Some(RouteKey {
            via: token.via,
            dest: token.dest,
        })
    }

    /// Garbage-collection expiry. Removes the route if it is still the
    /// poisoned one the collection was started for.
    pub fn remove_collected(&mut self, key: RouteKey) -> bool {
        match self.entries.get(&key.dest) {
            Some(entry) if entry.via == key.via && entry.metric == INFINITY => {
                self.entries.remove(&key.dest);
                true
            }
            _ => false,
        }
    }

    fn learn(&mut self, src: RouterId, dest: RouterId, total: u8, effects: &mut TableEffects) {
        if let Some(entry) = self.entries.get_mut(&dest) {
            if entry.via == src {
                if entry.metric == INFINITY {
                    if total < INFINITY {
                        // The neighbor recovered while the route sits in
                        // garbage collection: cancel the collection and
                        // install afresh.
                        entry.metric = total;
                        effects.gc_cancelled.push(RouteKey { via: src, dest });
                        effects.timeouts_armed.push(self.arm_timeout(dest));
                    }
                    // A repeated withdrawal must not re-issue triggered
                    // updates.
                    return;
                }
                entry.metric = total;
                if total == INFINITY {
                    self.next_gen += 1;
                    entry.timeout_gen = self.next_gen;
                    effects.triggered_update = true;
                    effects.gc_started.push(RouteKey { via: src, dest });
                } else {
                    effects.gc_cancelled.push(RouteKey { via: src, dest });
                    effects.timeouts_armed.push(self.arm_timeout(dest));
                }
            } else if total < entry.metric {
                let old_key = RouteKey {
                    via: entry.via,
                    dest,
                };
                entry.via = src;
                entry.metric = total;
                effects.gc_cancelled.push(old_key);
                effects.timeouts_armed.push(self.arm_timeout(dest));
            }
            return;
        }

        // There is no point in installing a route that is unusable.
        if total < INFINITY {
            self.insert(src, dest, total, effects);
        }
    }

    fn learn_direct_link(&mut self, src: RouterId, advertised: u8, effects: &mut TableEffects) {
        if let Some(entry) = self.entries.get_mut(&src) {
            if entry.via == src {
                if advertised < INFINITY {
                    entry.metric = advertised;
                    effects.gc_cancelled.push(RouteKey { via: src, dest: src });
                    effects.timeouts_armed.push(self.arm_timeout(src));
                }
            } else if advertised < entry.metric {
                let old_key = RouteKey {
                    via: entry.via,
                    dest: src,
                };
                entry.via = src;
                entry.metric = advertised;
                effects.gc_cancelled.push(old_key);
                effects.timeouts_armed.push(self.arm_timeout(src));
            }
            return;
        }

        if advertised < INFINITY {
            self.insert(src, src, advertised, effects);
        }
    }

    fn insert(&mut self, via: RouterId, dest: RouterId, metric: u8, effects: &mut TableEffects) {
        self.entries.insert(
            dest,
            TableEntry {
                via,
                metric,
                timeout_gen: 0,
            },
        );
        // A pending collection for the same (via, dest) is superseded by the
        // fresh route.
        effects.gc_cancelled.push(RouteKey { via, dest });
        effects.timeouts_armed.push(self.arm_timeout(dest));
    }

    fn arm_timeout(&mut self, dest: RouterId) -> TimeoutToken {
        self.next_gen += 1;
        let entry = self
            .entries
            .get_mut(&dest)
            .expect("timeout armed for a destination that is not in the table");
        entry.timeout_gen = self.next_gen;
        TimeoutToken {
            dest,
            via: entry.via,
            generation: self.next_gen,
        }
    }
}
