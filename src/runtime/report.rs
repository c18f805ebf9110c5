use crate::model::routing::{Route, RouterId, INFINITY};

/// Render the routing table for human inspection. This is the console
/// contract of the daemon; diagnostics go through tracing instead.
pub fn format_table(router_id: RouterId, routes: &[Route]) -> String {
    let mut out = format!(
        "\n------- router {} routing table ({} routes) -------\n",
        router_id,
        routes.len()
    );
    out.push_str("dest    via     metric\n");
    for route in routes {
        let marker = if route.metric == INFINITY {
            "  (unreachable)"
        } else {
            ""
        };
        out.push_str(&format!(
            "{:<7} {:<7} {:<2}{}\n",
            route.dest, route.via, route.metric, marker
        ));
    }
    out.push_str("---------------------------------------------------\n");
    out
}

pub fn print_table(router_id: RouterId, routes: &[Route]) {
    print!("{}", format_table(router_id, routes));
}
