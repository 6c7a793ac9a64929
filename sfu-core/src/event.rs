//! Control-plane events and the broadcast visitor that delivers them.

use std::sync::Arc;

use crate::node::{visit, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Audio,
    Video,
}

/// The relationship between two SSRCs sharing a media source, e.g. an RTX
/// stream associated with its primary via "FID".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// Flow identification: RTX SSRC associated with its primary.
    Fid,
    /// Forward error correction SSRC.
    Fec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpEncoding {
    pub ssrc: u32,
    pub rid: Option<String>,
}

/// A control-plane message broadcast to every node in a graph. Events never
/// carry per-packet data — they reconfigure how future packets are handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PayloadTypeAdded { payload_type: u8, format: MediaFormat },
    PayloadTypeCleared { payload_type: u8 },
    PayloadTypesCleared,
    RtpExtensionAdded { id: u8, uri: String },
    RtpExtensionsCleared,
    ReceiveSsrcAdded(u32),
    ReceiveSsrcRemoved(u32),
    SsrcAssociationAdded { primary: u32, secondary: u32, kind: AssociationKind },
    RtpEncodingsChanged(Vec<RtpEncoding>),
}

/// Delivers `event` to every node reachable from `root` by a pre-order
/// forward visit, in declaration order. Synchronous: on return, every node
/// has observed the event.
pub fn broadcast_event(root: &Arc<dyn Node>, event: &Event) {
    visit(root, &mut |node| node.handle_event(event));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::{ConditionalPacketPath, DemuxerNode};
    use crate::node::{into_linked_arc, NodeCore};
    use crate::packet_info::PacketInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNode {
        core: NodeCore,
        seen: Arc<AtomicUsize>,
    }
    impl Node for CountingNode {
        fn core(&self) -> &NodeCore {
            &self.core
        }
        fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo> {
            batch
        }
        fn handle_event(&self, _event: &Event) {
            self.seen.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn event_reaches_every_branch_exactly_once() {
        let leaf_seen = Arc::new(AtomicUsize::new(0));
        let leaf = into_linked_arc(CountingNode {
            core: NodeCore::new("leaf"),
            seen: leaf_seen.clone(),
        });
        let demux = into_linked_arc(DemuxerNode::new(
            "demux",
            vec![ConditionalPacketPath::new("any", |_| true, leaf)],
        ));

        broadcast_event(&demux, &Event::ReceiveSsrcAdded(0xA));
        broadcast_event(&demux, &Event::ReceiveSsrcAdded(0xA));

        assert_eq!(leaf_seen.load(Ordering::Relaxed), 2);
    }
}
