use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::model::messages::ResponseFrame;
use crate::model::routing::{Route, RouteKey, RouteTable, RouterId, TableEffects, TimeoutToken};
use crate::runtime::config::DaemonConfig;
use crate::runtime::link::NeighborLink;
use crate::runtime::report;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(7);

/// Intervals for the four timer families, all derived from one base
/// period: periodic updates fire every period (jittered 0.8..1.2), a
/// route with no refresh for six periods is poisoned, a poisoned route is
/// deleted four periods later, and triggered updates are delayed by up to
/// two sevenths of a period (two seconds at the default).
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub update_interval: Duration,
    pub route_timeout: Duration,
    pub gc_interval: Duration,
    pub triggered_delay_max: Duration,
}

impl Timing {
    pub fn scaled(period: Duration) -> Self {
        Self {
            update_interval: period,
            route_timeout: period * 6,
            gc_interval: period * 4,
            triggered_delay_max: period * 2 / 7,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::scaled(DEFAULT_PERIOD)
    }
}

struct GcPending {
    generation: u64,
    task: tokio::task::AbortHandle,
}

/// Everything the routing-table mutex protects: the table itself and the
/// pending garbage collections.
struct State {
    table: RouteTable,
    gc: HashMap<RouteKey, GcPending>,
    gc_generation: u64,
}

/// The daemon: one receive task per neighbor link, a periodic update
/// task, and one-shot tasks for triggered updates, route timeouts and
/// garbage collections, all serialized through a single mutex. Timer
/// tasks never hold the lock across I/O; sends work on a snapshot taken
/// under the lock.
pub struct RipDaemon {
    id: RouterId,
    links: Vec<Arc<NeighborLink>>,
    timing: Timing,
    state: Mutex<State>,
}

impl RipDaemon {
    /// Bind every configured link, seed the direct routes with their
    /// timeouts armed, and print the initial table.
    pub async fn open(cfg: DaemonConfig, timing: Timing) -> Result<Arc<Self>> {
        let mut links = Vec::with_capacity(cfg.links.len());
        for link_cfg in &cfg.links {
            let link = NeighborLink::open(*link_cfg).await.with_context(|| {
                format!(
                    "failed to open link to router {} on input port {}",
                    link_cfg.neighbor_id, link_cfg.input_port
                )
            })?;
            links.push(Arc::new(link));
        }
        let daemon = Arc::new(Self {
            id: cfg.router_id,
            links,
            timing,
            state: Mutex::new(State {
                table: RouteTable::new(cfg.router_id),
                gc: HashMap::new(),
                gc_generation: 0,
            }),
        });

        {
            let mut state = daemon.state();
            let tokens: Vec<TimeoutToken> = daemon
                .links
                .iter()
                .map(|link| state.table.seed_direct(link.neighbor_id(), link.metric()))
                .collect();
            for token in tokens {
                Self::arm_timeout(&daemon, token);
            }
            report::print_table(daemon.id, &state.table.snapshot());
        }

        Ok(daemon)
    }

    pub fn router_id(&self) -> RouterId {
        self.id
    }

    /// Current table contents, for inspection and tests.
    pub fn routes(&self) -> Vec<Route> {
        self.state().table.snapshot()
    }

    /// Run the receive and periodic tasks until one of them dies, which
    /// is fatal.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            router_id = self.id,
            neighbors = ?self.links.iter().map(|link| link.neighbor_id()).collect::<Vec<_>>(),
            "ripd starting"
        );

        let mut tasks = JoinSet::new();
        for link in &self.links {
            let daemon = Arc::clone(&self);
            let link = Arc::clone(link);
            tasks.spawn(async move { daemon.receive_loop(link).await });
        }
        let daemon = Arc::clone(&self);
        tasks.spawn(async move { daemon.periodic_loop().await });

        // These tasks loop forever; any completion means the daemon can no
        // longer do its job.
        while let Some(joined) = tasks.join_next().await {
            joined.context("daemon task aborted")?;
        }
        Ok(())
    }

    async fn receive_loop(self: Arc<Self>, link: Arc<NeighborLink>) {
        loop {
            match link.recv_frame().await {
                Ok(Some(frame)) => Self::handle_frame(&self, frame),
                Ok(None) => {} // malformed datagram, already logged
                Err(err) => {
                    // Loopback errors are not a liveness signal; only
                    // timeouts declare a neighbor dead.
                    warn!(port = link.input_port(), "socket receive error: {err}");
                }
            }
        }
    }

    async fn periodic_loop(self: Arc<Self>) {
        loop {
            let interval = {
                let mut rng = rand::thread_rng();
                self.timing.update_interval.mul_f64(rng.gen_range(0.8..1.2))
            };
            sleep(interval).await;
            self.broadcast().await;
        }
    }

    fn handle_frame(daemon: &Arc<Self>, frame: ResponseFrame) {
        let Some(link_metric) = daemon.link_metric(frame.sender) else {
            warn!(
                sender = frame.sender,
                "dropping frame from a router that is not a configured neighbor"
            );
            return;
        };

        let mut state = daemon.state();
        let effects = state
            .table
            .apply_frame(frame.sender, link_metric, &frame.entries);
        Self::enact(daemon, &mut state, effects);
        report::print_table(daemon.id, &state.table.snapshot());
    }

    /// Turn the table's requested side effects into running timer tasks.
    /// Called with the state lock held; only spawns, never blocks.
    fn enact(daemon: &Arc<Self>, state: &mut State, effects: TableEffects) {
        for key in effects.gc_cancelled {
            if let Some(pending) = state.gc.remove(&key) {
                pending.task.abort();
            }
        }
        for key in effects.gc_started {
            Self::start_gc(daemon, state, key);
        }
        for token in effects.timeouts_armed {
            Self::arm_timeout(daemon, token);
        }
        if effects.triggered_update {
            Self::schedule_triggered_update(daemon);
        }
    }

    fn arm_timeout(daemon: &Arc<Self>, token: TimeoutToken) {
        let daemon = Arc::clone(daemon);
        let timeout = daemon.timing.route_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            Self::on_route_timeout(&daemon, token);
        });
    }

    fn on_route_timeout(daemon: &Arc<Self>, token: TimeoutToken) {
        let mut state = daemon.state();
        // A refreshed or replaced route leaves a stale token behind.
        let Some(key) = state.table.expire(token) else {
            return;
        };
        info!(dest = key.dest, via = key.via, "route timed out, poisoning");
        Self::start_gc(daemon, &mut state, key);
        Self::schedule_triggered_update(daemon);
        report::print_table(daemon.id, &state.table.snapshot());
    }

    fn start_gc(daemon: &Arc<Self>, state: &mut State, key: RouteKey) {
        state.gc_generation += 1;
        let generation = state.gc_generation;
        let interval = daemon.timing.gc_interval;
        let handle = {
            let daemon = Arc::clone(daemon);
            tokio::spawn(async move {
                sleep(interval).await;
                Self::on_gc_expiry(&daemon, key, generation);
            })
        };
        if let Some(previous) = state.gc.insert(
            key,
            GcPending {
                generation,
                task: handle.abort_handle(),
            },
        ) {
            previous.task.abort();
        }
    }

    fn on_gc_expiry(daemon: &Arc<Self>, key: RouteKey, generation: u64) {
        let mut state = daemon.state();
        match state.gc.get(&key) {
            Some(pending) if pending.generation == generation => {}
            // Cancelled or superseded while this task waited on the lock.
            _ => return,
        }
        state.gc.remove(&key);
        if state.table.remove_collected(key) {
            info!(dest = key.dest, via = key.via, "garbage collected route");
            report::print_table(daemon.id, &state.table.snapshot());
        }
    }

    fn schedule_triggered_update(daemon: &Arc<Self>) {
        let delay = {
            let mut rng = rand::thread_rng();
            daemon
                .timing
                .triggered_delay_max
                .mul_f64(rng.gen_range(0.0..1.0))
        };
        let daemon = Arc::clone(daemon);
        tokio::spawn(async move {
            sleep(delay).await;
            debug!(router_id = daemon.id, "sending triggered update");
            daemon.broadcast().await;
        });
    }

    /// Send the full table to every neighbor. The snapshot is taken under
    /// the lock; transmission happens after it is released.
    async fn broadcast(&self) {
        let routes = self.state().table.snapshot();
        for link in &self.links {
            if let Err(err) = link.send_table(self.id, &routes).await {
                warn!(neighbor = link.neighbor_id(), "socket send error: {err}");
            }
        }
    }

    fn link_metric(&self, neighbor: RouterId) -> Option<u8> {
        self.links
            .iter()
            .find(|link| link.neighbor_id() == neighbor)
            .map(|link| link.metric())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("routing table lock poisoned")
    }
}
