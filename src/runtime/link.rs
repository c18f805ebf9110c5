use std::io;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::model::messages::{FrameEntry, ResponseFrame, MAX_FRAME_ROUTES};
use crate::model::routing::{Route, RouterId, INFINITY};
use crate::runtime::config::LinkConfig;

const LOOPBACK: &str = "127.0.0.1";

/// Largest datagram worth reading: a full frame is at most
/// 4 + 20 * 26 = 524 bytes, so 1024 leaves comfortable headroom.
pub const RECV_BUFFER_LEN: usize = 1024;

/// The socket pair for one configured neighbor: a receive socket bound to
/// our input port and a send socket used only to reach the neighbor's
/// input port, both on loopback.
pub struct NeighborLink {
    cfg: LinkConfig,
    input: UdpSocket,
    output: UdpSocket,
}

impl NeighborLink {
    pub async fn open(cfg: LinkConfig) -> io::Result<Self> {
        let input = UdpSocket::bind((LOOPBACK, cfg.input_port)).await?;
        let output = UdpSocket::bind((LOOPBACK, 0)).await?;
        Ok(Self { cfg, input, output })
    }

    pub fn neighbor_id(&self) -> RouterId {
        self.cfg.neighbor_id
    }

    pub fn metric(&self) -> u8 {
        self.cfg.metric
    }

    pub fn input_port(&self) -> u16 {
        self.cfg.input_port
    }

    /// Read one datagram and decode it. A malformed datagram is logged and
    /// swallowed so the receive loop keeps running.
    pub async fn recv_frame(&self) -> io::Result<Option<ResponseFrame>> {
        let mut buf = [0_u8; RECV_BUFFER_LEN];
        let (len, _peer) = self.input.recv_from(&mut buf).await?;
        match ResponseFrame::decode(&buf[..len]) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                warn!(
                    port = self.cfg.input_port,
                    "dropping malformed datagram: {err}"
                );
                Ok(None)
            }
        }
    }

    /// Serialize the whole table for this neighbor and transmit it, one
    /// datagram per frame.
    pub async fn send_table(&self, sender: RouterId, routes: &[Route]) -> io::Result<()> {
        for frame in build_frames(sender, routes, &self.cfg) {
            self.output
                .send_to(&frame.encode(), (LOOPBACK, self.cfg.output_port))
                .await?;
        }
        Ok(())
    }
}

/// Build the frames advertising `routes` to the link's neighbor. Routes
/// learned via that neighbor are emitted with metric INFINITY unless they
/// lead to the neighbor itself (split horizon with poisoned reverse), and
/// every frame carries one extra entry for the direct link so a neighbor
/// that lost us can find the link again.
pub fn build_frames(sender: RouterId, routes: &[Route], link: &LinkConfig) -> Vec<ResponseFrame> {
    let direct = FrameEntry {
        dest: link.neighbor_id,
        next_hop: link.neighbor_id,
        metric: link.metric,
    };

    let mut chunks: Vec<&[Route]> = routes.chunks(MAX_FRAME_ROUTES).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    chunks
        .into_iter()
        .map(|chunk| {
            let mut frame = ResponseFrame::new(sender);
            frame.entries.reserve(chunk.len() + 1);
            for route in chunk {
                let metric = if route.via == link.neighbor_id && route.dest != link.neighbor_id {
                    INFINITY
                } else {
                    route.metric
                };
                frame.entries.push(FrameEntry {
                    dest: route.dest,
                    next_hop: route.via,
                    metric,
                });
            }
            frame.entries.push(direct);
            frame
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(neighbor_id: RouterId, metric: u8) -> LinkConfig {
        LinkConfig {
            input_port: 2000,
            output_port: 3000,
            metric,
            neighbor_id,
        }
    }

    fn route(dest: RouterId, via: RouterId, metric: u8) -> Route {
        Route { dest, via, metric }
    }

    #[test]
    fn poisons_routes_learned_via_the_recipient() {
        let routes = vec![route(2, 2, 4), route(3, 2, 5), route(5, 3, 6)];
        let frames = build_frames(1, &routes, &link(2, 4));
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].entries,
            vec![
                // The route to the neighbor itself keeps its metric.
                FrameEntry {
                    dest: 2,
                    next_hop: 2,
                    metric: 4
                },
                // Learned via the recipient: poisoned reverse.
                FrameEntry {
                    dest: 3,
                    next_hop: 2,
                    metric: INFINITY
                },
                FrameEntry {
                    dest: 5,
                    next_hop: 3,
                    metric: 6
                },
                // Appended direct-link entry.
                FrameEntry {
                    dest: 2,
                    next_hop: 2,
                    metric: 4
                },
            ]
        );
    }

    #[test]
    fn splits_26_routes_across_two_datagrams() {
        let routes: Vec<Route> = (1..=26).map(|i| route(100 + i, 3, 2)).collect();
        let frames = build_frames(1, &routes, &link(9, 1));
        assert_eq!(frames.len(), 2);
        // 25 table entries plus the direct-link entry per datagram.
        assert_eq!(frames[0].entries.len(), 26);
        assert_eq!(frames[1].entries.len(), 2);
        for frame in &frames {
            assert_eq!(
                frame.entries.last(),
                Some(&FrameEntry {
                    dest: 9,
                    next_hop: 9,
                    metric: 1
                })
            );
        }
    }

    #[test]
    fn empty_table_still_announces_the_direct_link() {
        let frames = build_frames(1, &[], &link(2, 7));
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].entries,
            vec![FrameEntry {
                dest: 2,
                next_hop: 2,
                metric: 7
            }]
        );
    }

    #[tokio::test]
    async fn frames_travel_between_two_links() {
        let ours = NeighborLink::open(LinkConfig {
            input_port: 47_101,
            output_port: 47_102,
            metric: 4,
            neighbor_id: 2,
        })
        .await
        .expect("bind first link");
        let theirs = NeighborLink::open(LinkConfig {
            input_port: 47_102,
            output_port: 47_101,
            metric: 4,
            neighbor_id: 1,
        })
        .await
        .expect("bind second link");

        ours.send_table(1, &[route(2, 2, 4), route(7, 3, 2)])
            .await
            .expect("send");
        let frame = theirs
            .recv_frame()
            .await
            .expect("receive")
            .expect("frame should decode");
        assert_eq!(frame.sender, 1);
        assert_eq!(frame.entries.len(), 3);
        assert_eq!(
            frame.entries[1],
            FrameEntry {
                dest: 7,
                next_hop: 3,
                metric: 2
            }
        );
    }

    #[tokio::test]
    async fn garbage_datagram_is_swallowed() {
        let ours = NeighborLink::open(LinkConfig {
            input_port: 47_111,
            output_port: 47_112,
            metric: 1,
            neighbor_id: 2,
        })
        .await
        .expect("bind link");

        let sender = UdpSocket::bind((LOOPBACK, 0)).await.expect("bind sender");
        sender
            .send_to(&[0xff, 0x00, 0x01], (LOOPBACK, 47_111))
            .await
            .expect("send garbage");

        assert!(ours.recv_frame().await.expect("receive").is_none());
    }
}
