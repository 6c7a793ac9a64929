//! Shared transceiver-wide state: maps written from the control path, read
//! from the packet path. Mutation discipline follows §5: payload-type and
//! extension tables use a lock (control-thread writes are rare relative to
//! packet-path reads); SSRC sets are concurrent; transformer handles are
//! swapped atomically.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;

use sfu_core::{AssociationKind, MediaFormat};

use crate::transform::{IdentityTransformer, PacketTransformer};

/// State shared between the receive and send pipelines of one transceiver:
/// payload-type/extension tables, receive-SSRC set, SSRC associations, and
/// the currently installed SRTP/SRTCP transformers.
pub struct TransceiverState {
    payload_types: RwLock<std::collections::HashMap<u8, MediaFormat>>,
    extensions: RwLock<std::collections::HashMap<u8, String>>,
    receive_ssrcs: DashSet<u32>,
    /// secondary SSRC -> (primary SSRC, association kind). RTX lookups key
    /// on the secondary (RTX) SSRC they observe on the wire.
    associations: DashMap<u32, (u32, AssociationKind)>,
    recv_transformer: ArcSwap<dyn PacketTransformer>,
    send_transformer: ArcSwap<dyn PacketTransformer>,
}

impl Default for TransceiverState {
    fn default() -> Self {
        Self {
            payload_types: RwLock::new(std::collections::HashMap::new()),
            extensions: RwLock::new(std::collections::HashMap::new()),
            receive_ssrcs: DashSet::new(),
            associations: DashMap::new(),
            recv_transformer: ArcSwap::new(Arc::new(IdentityTransformer)),
            send_transformer: ArcSwap::new(Arc::new(IdentityTransformer)),
        }
    }
}

impl TransceiverState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_payload_type(&self, payload_type: u8, format: MediaFormat) {
        self.payload_types.write().insert(payload_type, format);
    }

    pub fn clear_payload_type(&self, payload_type: u8) {
        self.payload_types.write().remove(&payload_type);
    }

    pub fn clear_payload_types(&self) {
        self.payload_types.write().clear();
    }

    #[must_use]
    pub fn payload_type_format(&self, payload_type: u8) -> Option<MediaFormat> {
        self.payload_types.read().get(&payload_type).copied()
    }

    pub fn add_extension(&self, id: u8, uri: impl Into<String>) {
        self.extensions.write().insert(id, uri.into());
    }

    pub fn clear_extensions(&self) {
        self.extensions.write().clear();
    }

    #[must_use]
    pub fn extension_uri(&self, id: u8) -> Option<String> {
        self.extensions.read().get(&id).cloned()
    }

    /// Reverse lookup: the local id negotiated for a well-known extension
    /// URI, e.g. the audio-level or transport-cc extension. `None` if the
    /// peer never negotiated it.
    #[must_use]
    pub fn extension_id_for(&self, uri: &str) -> Option<u8> {
        self.extensions.read().iter().find(|(_, v)| v.as_str() == uri).map(|(id, _)| *id)
    }

    pub fn add_receive_ssrc(&self, ssrc: u32) {
        self.receive_ssrcs.insert(ssrc);
    }

    pub fn remove_receive_ssrc(&self, ssrc: u32) {
        self.receive_ssrcs.remove(&ssrc);
    }

    #[must_use]
    pub fn has_receive_ssrc(&self, ssrc: u32) -> bool {
        self.receive_ssrcs.contains(&ssrc)
    }

    pub fn add_association(&self, primary: u32, secondary: u32, kind: AssociationKind) {
        self.associations.insert(secondary, (primary, kind));
    }

    /// Resolves `secondary` to its primary SSRC if it's an RTX ("FID")
    /// association — the case [`crate::nodes::RtxHandler`] rewrites on.
    #[must_use]
    pub fn rtx_primary_of(&self, secondary: u32) -> Option<u32> {
        self.associations
            .get(&secondary)
            .filter(|entry| entry.1 == AssociationKind::Fid)
            .map(|entry| entry.0)
    }

    pub fn set_recv_transformer(&self, transformer: Arc<dyn PacketTransformer>) {
        self.recv_transformer.store(transformer);
    }

    pub fn set_send_transformer(&self, transformer: Arc<dyn PacketTransformer>) {
        self.send_transformer.store(transformer);
    }

    #[must_use]
    pub fn recv_transformer(&self) -> Arc<dyn PacketTransformer> {
        self.recv_transformer.load_full()
    }

    #[must_use]
    pub fn send_transformer(&self) -> Arc<dyn PacketTransformer> {
        self.send_transformer.load_full()
    }
}
