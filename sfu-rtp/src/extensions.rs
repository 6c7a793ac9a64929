//! RFC 8285 one-byte and two-byte header extension element parsing, plus
//! readers for the two extensions this engine cares about directly:
//! client-to-mixer audio level (RFC 6464) and transport-wide congestion
//! control sequence number (draft-holmer-rmcat-transport-wide-cc-extensions).

use bytes::Bytes;

/// Profile id marking the one-byte header extension form (RFC 8285 §4.2).
pub const ONE_BYTE_PROFILE: u16 = 0xBEDE;
/// Profile id prefix marking the two-byte header extension form (RFC 8285 §4.3).
pub const TWO_BYTE_PROFILE_PREFIX: u16 = 0x1000;

/// A single decoded extension element: local id plus its value bytes.
#[derive(Debug, Clone)]
pub struct ExtensionElement {
    pub id: u8,
    pub data: Bytes,
}

/// Decode the elements packed in an RTP header extension block.
///
/// Unknown profile ids yield an empty iterator rather than an error — an
/// extension block this engine doesn't understand the framing of is simply
/// opaque, not malformed.
pub fn parse_elements(profile: u16, data: &Bytes) -> Vec<ExtensionElement> {
    if profile == ONE_BYTE_PROFILE {
        parse_one_byte(data)
    } else if profile & 0xfff0 == TWO_BYTE_PROFILE_PREFIX {
        parse_two_byte(data)
    } else {
        Vec::new()
    }
}

fn parse_one_byte(data: &Bytes) -> Vec<ExtensionElement> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < data.len() {
        let b = data[i];
        if b == 0 {
            i += 1; // padding byte
            continue;
        }
        let id = b >> 4;
        if id == 0x0f {
            break; // reserved "stop" id
        }
        let len = (b & 0x0f) as usize + 1;
        i += 1;
        if i + len > data.len() {
            break;
        }
        out.push(ExtensionElement {
            id,
            data: data.slice(i..i + len),
        });
        i += len;
    }
    out
}

fn parse_two_byte(data: &Bytes) -> Vec<ExtensionElement> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 2 <= data.len() {
        let id = data[i];
        if id == 0 {
            i += 1;
            continue;
        }
        let len = data[i + 1] as usize;
        i += 2;
        if i + len > data.len() {
            break;
        }
        out.push(ExtensionElement {
            id,
            data: data.slice(i..i + len),
        });
        i += len;
    }
    out
}

/// Extract a client-to-mixer audio level (RFC 6464 §3): a single byte with
/// a `voice activity` bit and a 7-bit level in `-dBov`.
#[must_use]
pub fn read_audio_level(element: &ExtensionElement) -> Option<(bool, u8)> {
    let byte = *element.data.first()?;
    let voice_activity = (byte & 0x80) != 0;
    let level = byte & 0x7f;
    Some((voice_activity, level))
}

/// Extract the transport-wide sequence number carried by the TCC extension.
#[must_use]
pub fn read_tcc_sequence(element: &ExtensionElement) -> Option<u16> {
    if element.data.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([element.data[0], element.data[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_byte_audio_level() {
        // id=1, len=1 (0<<4 encodes len-1=0), payload byte: voice active, level 42.
        let raw = Bytes::from_static(&[0x10, 0b1010_1010]);
        let elements = parse_elements(ONE_BYTE_PROFILE, &raw);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].id, 1);
        let (voice_activity, level) = read_audio_level(&elements[0]).unwrap();
        assert!(voice_activity);
        assert_eq!(level, 0b010_1010);
    }

    #[test]
    fn parses_two_byte_tcc_sequence() {
        let raw = Bytes::from_static(&[3, 2, 0x01, 0x02]);
        let elements = parse_elements(TWO_BYTE_PROFILE_PREFIX, &raw);
        assert_eq!(elements.len(), 1);
        assert_eq!(read_tcc_sequence(&elements[0]), Some(0x0102));
    }

    #[test]
    fn unknown_profile_yields_nothing() {
        let raw = Bytes::from_static(&[0x10, 0xff]);
        assert!(parse_elements(0x4242, &raw).is_empty());
    }
}
