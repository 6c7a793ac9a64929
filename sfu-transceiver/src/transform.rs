//! External collaborator interfaces (§6): SRTP/SRTCP transforms, DTLS
//! keying material, and VP8 payload-descriptor inspection. This crate
//! treats all three as opaque — their implementations live outside it.

use std::sync::Arc;

use bytes::Bytes;

/// An SRTP/SRTCP cryptographic transform. `reverse_transform` is applied on
/// ingress (ciphertext → plaintext or drop on auth failure); `transform` on
/// egress. Implementations must tolerate concurrent calls from one
/// direction — assignment happens from the control path via
/// [`crate::state::TransceiverState::set_srtp_information`]'s atomic swap.
pub trait PacketTransformer: Send + Sync {
    fn transform(&self, packet: Bytes) -> Option<Bytes>;
    fn reverse_transform(&self, packet: Bytes) -> Option<Bytes>;
}

/// The identity transform: passes bytes through unchanged. Used by scenario
/// tests (§8) that exercise the receive pipeline without real SRTP keys.
pub struct IdentityTransformer;

impl PacketTransformer for IdentityTransformer {
    fn transform(&self, packet: Bytes) -> Option<Bytes> {
        Some(packet)
    }

    fn reverse_transform(&self, packet: Bytes) -> Option<Bytes> {
        Some(packet)
    }
}

/// SRTP profile negotiated over DTLS, e.g. `SRTP_AES128_CM_SHA1_80`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrtpProfile(pub u16);

/// Keying material derived from a completed DTLS handshake: client/server
/// write keys and salts, already split per RFC 5764 §4.2.
#[derive(Clone)]
pub struct SrtpKeyingMaterial {
    pub client_write_key: Bytes,
    pub server_write_key: Bytes,
}

/// The DTLS/TLS context this engine consumes but does not implement.
pub trait DtlsContext: Send + Sync {
    fn extract_keying_material(&self, profile: SrtpProfile) -> Option<SrtpKeyingMaterial>;
}

/// Builds the receive- and send-direction [`PacketTransformer`]s from
/// negotiated keying material. Supplied externally at
/// [`crate::transceiver::Transceiver`] construction, alongside the VP8
/// depacketizer — this crate never implements SRTP/SRTCP crypto itself.
pub trait SrtpTransformerFactory: Send + Sync {
    fn build(&self, keying_material: SrtpKeyingMaterial) -> (Arc<dyn PacketTransformer>, Arc<dyn PacketTransformer>);
}

/// VP8 payload-descriptor inspection, supplied externally — this crate
/// never parses VP8 bitstream itself.
pub trait Vp8Depacketizer: Send + Sync {
    fn is_key_frame(&self, payload: &Bytes) -> bool;
    fn is_start_of_frame(&self, payload: &Bytes) -> bool;
    fn payload_descriptor_size(&self, payload: &Bytes) -> usize;
}
