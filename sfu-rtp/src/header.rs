//! RTP header/packet parsing and building (RFC 3550 §5.1).
//!
//! Parsing keeps the packet payload and any header extension as zero-copy
//! slices of the input [`Bytes`] — cloning an `RtpPacket` only bumps a
//! refcount, it never copies the wire bytes.

use std::fmt;
use std::ops::Range;

use bytes::{Bytes, BytesMut};

use crate::error::{RtpEncodeError, RtpParseError};

/// RTP fixed version number (RFC 3550 §5.1).
pub const RTP_VERSION: u8 = 2;
/// Fixed RTP header length with no CSRCs or extensions.
pub const RTP_HEADER_MIN_LEN: usize = 12;
/// CSRC count is a 4-bit field; the maximum representable count.
pub const MAX_CSRC_COUNT: usize = 15;

/// Structured RTP header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    csrcs: [u32; MAX_CSRC_COUNT],
}

impl Default for RtpHeader {
    fn default() -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrcs: [0; MAX_CSRC_COUNT],
        }
    }
}

impl RtpHeader {
    #[must_use]
    pub fn csrcs(&self) -> &[u32] {
        &self.csrcs[..self.csrc_count as usize]
    }

    pub fn set_csrcs(&mut self, csrcs: &[u32]) -> Result<(), RtpEncodeError> {
        if csrcs.len() > MAX_CSRC_COUNT {
            return Err(RtpEncodeError::InvalidField("csrc_count"));
        }
        self.csrc_count = csrcs.len() as u8;
        self.csrcs[..csrcs.len()].copy_from_slice(csrcs);
        Ok(())
    }
}

/// A parsed RTP header extension: profile identifier plus a zero-copy data window.
#[derive(Debug, Clone)]
pub struct RtpHeaderExtension {
    pub profile: u16,
    pub data: Bytes,
}

/// A fully parsed RTP packet: header plus zero-copy payload/extension windows
/// into the original buffer.
#[derive(Clone)]
pub struct RtpPacket {
    header: RtpHeader,
    raw: Bytes,
    payload_range: Range<usize>,
    extension: Option<(u16, Range<usize>)>,
    padding_len: u8,
}

/// Reinterpret `buffer` as an RTP packet without copying the payload.
///
/// Fails with [`RtpParseError`] on any malformed-header condition; callers
/// are expected to drop the packet and record the failure in node stats
/// rather than propagate this error further.
pub fn parse_rtp(buffer: Bytes) -> Result<RtpPacket, RtpParseError> {
    let total_len = buffer.len();
    if total_len < RTP_HEADER_MIN_LEN {
        return Err(RtpParseError::HeaderTooShort);
    }

    let b = &buffer[..];
    let version = b[0] >> 6;
    if version != RTP_VERSION {
        return Err(RtpParseError::UnsupportedVersion(version));
    }
    let padding = (b[0] & 0b0010_0000) != 0;
    let extension = (b[0] & 0b0001_0000) != 0;
    let csrc_count = b[0] & 0x0f;
    let marker = (b[1] & 0b1000_0000) != 0;
    let payload_type = b[1] & 0x7f;
    let sequence_number = u16::from_be_bytes([b[2], b[3]]);
    let timestamp = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
    let ssrc = u32::from_be_bytes([b[8], b[9], b[10], b[11]]);

    let mut header = RtpHeader {
        version,
        padding,
        extension,
        csrc_count,
        marker,
        payload_type,
        sequence_number,
        timestamp,
        ssrc,
        csrcs: [0; MAX_CSRC_COUNT],
    };

    let mut cursor = RTP_HEADER_MIN_LEN;
    let csrc_bytes = csrc_count as usize * 4;
    if total_len < cursor + csrc_bytes {
        return Err(RtpParseError::InvalidCsrcLength);
    }
    for idx in 0..(csrc_count as usize) {
        let off = cursor + idx * 4;
        header.csrcs[idx] = u32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]]);
    }
    cursor += csrc_bytes;

    let mut extension_meta = None;
    if extension {
        if total_len < cursor + 4 {
            return Err(RtpParseError::InvalidExtension);
        }
        let profile = u16::from_be_bytes([b[cursor], b[cursor + 1]]);
        let length_words = u16::from_be_bytes([b[cursor + 2], b[cursor + 3]]) as usize;
        let extension_len = length_words
            .checked_mul(4)
            .ok_or(RtpParseError::InvalidExtension)?;
        cursor += 4;
        if total_len < cursor + extension_len {
            return Err(RtpParseError::InvalidExtension);
        }
        extension_meta = Some((profile, cursor..cursor + extension_len));
        cursor += extension_len;
    }

    if cursor > total_len {
        return Err(RtpParseError::HeaderTooShort);
    }

    let mut padding_len = 0u8;
    if padding {
        let pad_value = b[total_len - 1];
        let pad_len = pad_value as usize;
        if pad_value == 0 || pad_len > total_len.saturating_sub(cursor) {
            return Err(RtpParseError::InvalidPadding);
        }
        padding_len = pad_value;
    }

    let payload_available = total_len - cursor;
    let payload_len = payload_available
        .checked_sub(padding_len as usize)
        .ok_or(RtpParseError::InvalidPadding)?;

    Ok(RtpPacket {
        header,
        raw: buffer,
        payload_range: cursor..cursor + payload_len,
        extension: extension_meta,
        padding_len,
    })
}

impl RtpPacket {
    #[must_use]
    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    /// Zero-copy payload window (a cheap `Bytes` slice, no allocation).
    #[must_use]
    pub fn payload(&self) -> Bytes {
        self.raw.slice(self.payload_range.clone())
    }

    #[must_use]
    pub fn extension(&self) -> Option<RtpHeaderExtension> {
        self.extension.as_ref().map(|(profile, range)| RtpHeaderExtension {
            profile: *profile,
            data: self.raw.slice(range.clone()),
        })
    }

    #[must_use]
    pub fn padding_len(&self) -> u8 {
        self.padding_len
    }

    /// The complete wire bytes this packet was parsed from.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }
}

impl fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("header", &self.header)
            .field("payload_len", &self.payload_range.len())
            .field("padding_len", &self.padding_len)
            .finish()
    }
}

/// Builds an RTP packet from header fields plus payload/extension bytes.
#[derive(Clone)]
pub struct RtpPacketBuilder {
    header: RtpHeader,
    payload: Option<Bytes>,
    extension: Option<(u16, Bytes)>,
    padding_len: u8,
}

impl RtpPacketBuilder {
    #[must_use]
    pub fn new(header: RtpHeader) -> Self {
        Self {
            header,
            payload: None,
            extension: None,
            padding_len: 0,
        }
    }

    #[must_use]
    pub fn payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn extension_bytes(mut self, profile: u16, data: Bytes) -> Result<Self, RtpEncodeError> {
        if data.len() % 4 != 0 {
            return Err(RtpEncodeError::HeaderMismatch(
                "extension data length must be a multiple of 4 bytes",
            ));
        }
        self.extension = Some((profile, data));
        Ok(self)
    }

    #[must_use]
    pub fn padding(mut self, padding_len: u8) -> Self {
        self.padding_len = padding_len;
        self
    }

    /// Encode to a freshly allocated [`Bytes`].
    pub fn encode(self) -> Result<Bytes, RtpEncodeError> {
        if self.header.version != RTP_VERSION {
            return Err(RtpEncodeError::InvalidField("version"));
        }
        if self.header.payload_type > 0x7f {
            return Err(RtpEncodeError::InvalidField("payload_type"));
        }
        if self.header.csrc_count as usize > MAX_CSRC_COUNT {
            return Err(RtpEncodeError::InvalidField("csrc_count"));
        }

        let payload_len = self.payload.as_ref().map_or(0, Bytes::len);
        let csrc_bytes = self.header.csrc_count as usize * 4;

        let extension = match (self.header.extension, &self.extension) {
            (true, Some(ext)) => Some(ext.clone()),
            (true, None) => {
                return Err(RtpEncodeError::HeaderMismatch(
                    "header.extension set but no extension data provided",
                ));
            }
            (false, Some(_)) => {
                return Err(RtpEncodeError::HeaderMismatch(
                    "extension data provided but header.extension is unset",
                ));
            }
            (false, None) => None,
        };
        let ext_header_bytes = if self.header.extension { 4 } else { 0 };
        let extension_len = extension.as_ref().map_or(0, |(_, d)| d.len());

        let padding_len = self.padding_len as usize;
        if self.header.padding && padding_len == 0 {
            return Err(RtpEncodeError::HeaderMismatch(
                "header.padding set but padding length is zero",
            ));
        }
        if !self.header.padding && padding_len > 0 {
            return Err(RtpEncodeError::HeaderMismatch(
                "padding length given but header.padding is unset",
            ));
        }

        let total =
            RTP_HEADER_MIN_LEN + csrc_bytes + ext_header_bytes + extension_len + payload_len + padding_len;
        let mut buf = BytesMut::with_capacity(total);

        buf.extend_from_slice(&[
            (self.header.version << 6)
                | ((self.header.padding as u8) << 5)
                | ((self.header.extension as u8) << 4)
                | (self.header.csrc_count & 0x0f),
            ((self.header.marker as u8) << 7) | (self.header.payload_type & 0x7f),
        ]);
        buf.extend_from_slice(&self.header.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.header.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.header.ssrc.to_be_bytes());
        for csrc in self.header.csrcs() {
            buf.extend_from_slice(&csrc.to_be_bytes());
        }

        if let Some((profile, data)) = &extension {
            buf.extend_from_slice(&profile.to_be_bytes());
            buf.extend_from_slice(&((data.len() / 4) as u16).to_be_bytes());
            buf.extend_from_slice(data);
        }

        if let Some(payload) = &self.payload {
            buf.extend_from_slice(payload);
        }

        if padding_len > 0 {
            buf.resize(buf.len() + padding_len, self.padding_len);
        }

        debug_assert_eq!(buf.len(), total);
        Ok(buf.freeze())
    }
}

/// RFC 3550 Appendix A half-range wraparound comparison: is `a` strictly
/// older than `b`?
#[must_use]
pub fn seq_less(a: u16, b: u16) -> bool {
    let diff = b.wrapping_sub(a);
    diff != 0 && diff < 0x8000
}

/// Signed wraparound distance `b - a`, in `[-32768, 32767]`.
#[must_use]
pub fn seq_diff(a: u16, b: u16) -> i32 {
    (b.wrapping_sub(a) as i16) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_header() -> RtpHeader {
        RtpHeader {
            payload_type: 111,
            sequence_number: 100,
            timestamp: 1000,
            ssrc: 0xA,
            ..RtpHeader::default()
        }
    }

    #[test]
    fn round_trips_minimal_packet() {
        let payload = Bytes::from_static(b"opus-frame");
        let encoded = RtpPacketBuilder::new(sample_header())
            .payload(payload.clone())
            .encode()
            .unwrap();

        let parsed = parse_rtp(encoded).unwrap();
        assert_eq!(parsed.header().payload_type, 111);
        assert_eq!(parsed.header().sequence_number, 100);
        assert_eq!(parsed.header().ssrc, 0xA);
        assert_eq!(parsed.payload(), payload);
    }

    #[test]
    fn rejects_short_buffer() {
        let buf = Bytes::from_static(&[0u8; 4]);
        assert_eq!(parse_rtp(buf).unwrap_err(), RtpParseError::HeaderTooShort);
    }

    #[test]
    fn seq_less_handles_wraparound() {
        assert!(seq_less(65535, 0));
        assert!(!seq_less(0, 65535));
        assert!(seq_less(10, 20));
    }

    #[test]
    fn padding_roundtrip() {
        let mut header = sample_header();
        header.padding = true;
        let payload = Bytes::from_static(b"x");
        let encoded = RtpPacketBuilder::new(header)
            .payload(payload.clone())
            .padding(4)
            .encode()
            .unwrap();
        let parsed = parse_rtp(encoded).unwrap();
        assert_eq!(parsed.padding_len(), 4);
        assert_eq!(parsed.payload(), payload);
    }

    proptest! {
        /// Any header built from in-range field values round-trips through
        /// encode/parse with every field and the payload preserved exactly.
        #[test]
        fn header_round_trips_for_arbitrary_fields(
            marker in any::<bool>(),
            payload_type in 0u8..0x80,
            sequence_number in any::<u16>(),
            timestamp in any::<u32>(),
            ssrc in any::<u32>(),
            csrcs in prop::collection::vec(any::<u32>(), 0..=MAX_CSRC_COUNT),
            payload in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut header = RtpHeader {
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                ..RtpHeader::default()
            };
            header.set_csrcs(&csrcs).unwrap();

            let encoded = RtpPacketBuilder::new(header.clone())
                .payload(Bytes::from(payload.clone()))
                .encode()
                .unwrap();
            let parsed = parse_rtp(encoded).unwrap();

            prop_assert_eq!(parsed.header(), &header);
            prop_assert_eq!(parsed.payload(), Bytes::from(payload));
        }
    }
}
