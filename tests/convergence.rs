//! End-to-end scenarios: several daemons on loopback ports, millisecond
//! timer scale, polling each table until it reaches the expected shape.

use std::sync::Arc;
use std::time::Duration;

use ripd::model::routing::{Route, RouterId, INFINITY};
use ripd::runtime::config::{DaemonConfig, LinkConfig};
use ripd::runtime::daemon::{RipDaemon, Timing};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

fn link(input_port: u16, output_port: u16, metric: u8, neighbor_id: RouterId) -> LinkConfig {
    LinkConfig {
        input_port,
        output_port,
        metric,
        neighbor_id,
    }
}

async fn start_router(
    router_id: RouterId,
    links: Vec<LinkConfig>,
    period: Duration,
) -> (Arc<RipDaemon>, JoinHandle<()>) {
    let daemon = RipDaemon::open(DaemonConfig { router_id, links }, Timing::scaled(period))
        .await
        .expect("daemon should bind its ports");
    let runner = {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            daemon.run().await.expect("daemon task died");
        })
    };
    (daemon, runner)
}

async fn wait_for(
    daemon: &RipDaemon,
    deadline: Duration,
    what: &str,
    predicate: impl Fn(&[Route]) -> bool,
) {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if predicate(&daemon.routes()) {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "router {} never reached `{what}`; table: {:?}",
        daemon.router_id(),
        daemon.routes()
    );
}

fn has_route(routes: &[Route], dest: RouterId, via: RouterId, metric: u8) -> bool {
    routes.contains(&Route { dest, via, metric })
}

#[tokio::test]
async fn two_routers_keep_each_other_alive() {
    let period = Duration::from_millis(150);
    let (r1, _run1) = start_router(1, vec![link(48_010, 48_020, 4, 2)], period).await;
    let (r2, _run2) = start_router(2, vec![link(48_020, 48_010, 4, 1)], period).await;

    assert_eq!(r1.routes(), vec![Route { dest: 2, via: 2, metric: 4 }]);
    assert_eq!(r2.routes(), vec![Route { dest: 1, via: 1, metric: 4 }]);

    // Well past the six-period timeout: periodic refreshes must have kept
    // both direct routes alive.
    sleep(period * 8).await;
    assert_eq!(r1.routes(), vec![Route { dest: 2, via: 2, metric: 4 }]);
    assert_eq!(r2.routes(), vec![Route { dest: 1, via: 1, metric: 4 }]);
}

#[tokio::test]
async fn chain_converges_end_to_end() {
    let period = Duration::from_millis(120);
    let (r1, _run1) = start_router(1, vec![link(48_110, 48_120, 1, 2)], period).await;
    let (_r2, _run2) = start_router(
        2,
        vec![link(48_120, 48_110, 1, 1), link(48_121, 48_130, 1, 3)],
        period,
    )
    .await;
    let (r3, _run3) = start_router(3, vec![link(48_130, 48_121, 1, 2)], period).await;

    wait_for(&r1, Duration::from_secs(5), "dest 3 via 2 at cost 2", |routes| {
        has_route(routes, 3, 2, 2)
    })
    .await;
    wait_for(&r3, Duration::from_secs(5), "dest 1 via 2 at cost 2", |routes| {
        has_route(routes, 1, 2, 2)
    })
    .await;
}

#[tokio::test]
async fn killed_router_is_poisoned_then_collected() {
    let period = Duration::from_millis(100);
    let (r1, _run1) = start_router(1, vec![link(48_210, 48_220, 1, 2)], period).await;
    let (_r2, run2) = start_router(
        2,
        vec![link(48_220, 48_210, 1, 1), link(48_221, 48_230, 1, 3)],
        period,
    )
    .await;
    let (r3, _run3) = start_router(3, vec![link(48_230, 48_221, 1, 2)], period).await;

    wait_for(&r1, Duration::from_secs(5), "dest 3 via 2 at cost 2", |routes| {
        has_route(routes, 3, 2, 2)
    })
    .await;

    run2.abort();

    // No refresh for six periods poisons everything learned via router 2.
    wait_for(&r1, Duration::from_secs(8), "poisoned routes via 2", |routes| {
        routes
            .iter()
            .filter(|route| route.via == 2)
            .all(|route| route.metric == INFINITY)
            && routes.iter().any(|route| route.via == 2)
    })
    .await;
    wait_for(&r3, Duration::from_secs(8), "poisoned routes via 2", |routes| {
        routes
            .iter()
            .filter(|route| route.via == 2)
            .all(|route| route.metric == INFINITY)
            && routes.iter().any(|route| route.via == 2)
    })
    .await;

    // Four periods later the poisoned routes disappear.
    wait_for(&r1, Duration::from_secs(8), "empty table", |routes| {
        routes.is_empty()
    })
    .await;
    wait_for(&r3, Duration::from_secs(8), "empty table", |routes| {
        routes.is_empty()
    })
    .await;
}

#[tokio::test]
async fn triangle_prefers_the_cheaper_two_hop_path() {
    let period = Duration::from_millis(120);
    let (r1, _run1) = start_router(
        1,
        vec![link(48_310, 48_313, 1, 2), link(48_311, 48_315, 5, 3)],
        period,
    )
    .await;
    let (_r2, _run2) = start_router(
        2,
        vec![link(48_313, 48_310, 1, 1), link(48_314, 48_316, 1, 3)],
        period,
    )
    .await;
    let (r3, _run3) = start_router(
        3,
        vec![link(48_315, 48_311, 5, 1), link(48_316, 48_314, 1, 2)],
        period,
    )
    .await;

    // The direct link costs 5; the two-hop path through router 2 costs 2.
    wait_for(&r1, Duration::from_secs(6), "dest 3 via 2 at cost 2", |routes| {
        has_route(routes, 3, 2, 2)
    })
    .await;
    wait_for(&r3, Duration::from_secs(6), "dest 1 via 2 at cost 2", |routes| {
        has_route(routes, 1, 2, 2)
    })
    .await;
}
