//! Compound RTCP splitting (RFC 3550 §6.1) and per-packet parsing/building.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RtcpParseError;
use crate::feedback::{
    FullIntraRequest, GenericNack, PictureLossIndication, ReceiverEstimatedMaxBitrate,
    TransportCcFeedback, FMT_FIR, FMT_GENERIC_NACK, FMT_PLI, FMT_TRANSPORT_CC, PT_PSFB, PT_RTPFB,
};
use crate::packet::{
    Goodbye, ReceiverReport, ReceptionReport, RtcpPacket, SdesChunk, SdesItem, SenderInfo,
    SenderReport, SourceDescription,
};

const RTCP_VERSION: u8 = 2;
const PT_SENDER_REPORT: u8 = 200;
const PT_RECEIVER_REPORT: u8 = 201;
const PT_SDES: u8 = 202;
const PT_BYE: u8 = 203;

/// Splits a buffer containing one or more concatenated RTCP packets
/// (a single UDP datagram's worth, per RFC 3550 §6.1) into per-packet
/// byte ranges, without parsing their contents.
///
/// A compound packet with a trailing truncated element is rejected wholesale
/// — callers (`CompoundRTCPSplitter`) are expected to drop the batch and log
/// the raw bytes for diagnostics rather than emit partial results.
pub fn split_compound(buffer: &Bytes) -> Result<Vec<Bytes>, RtcpParseError> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < buffer.len() {
        if buffer.len() - offset < 4 {
            return Err(RtcpParseError::HeaderTooShort);
        }
        let header = &buffer[offset..offset + 4];
        let version = header[0] >> 6;
        if version != RTCP_VERSION {
            return Err(RtcpParseError::UnsupportedVersion(version));
        }
        let length_words = u16::from_be_bytes([header[2], header[3]]) as usize;
        let packet_len = (length_words + 1) * 4;
        if offset + packet_len > buffer.len() {
            return Err(RtcpParseError::LengthOutOfBounds);
        }
        out.push(buffer.slice(offset..offset + packet_len));
        offset += packet_len;
    }
    Ok(out)
}

/// Parses a single RTCP packet (not a compound buffer — see [`split_compound`]).
pub fn parse_packet(mut buf: Bytes) -> Result<RtcpPacket, RtcpParseError> {
    if buf.len() < 4 {
        return Err(RtcpParseError::HeaderTooShort);
    }
    let first = buf[0];
    let version = first >> 6;
    if version != RTCP_VERSION {
        return Err(RtcpParseError::UnsupportedVersion(version));
    }
    let count_or_fmt = first & 0x1f;
    let packet_type = buf[1];
    let length_words = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let expected_len = (length_words + 1) * 4;
    if buf.len() != expected_len {
        return Err(RtcpParseError::LengthOutOfBounds);
    }
    buf.advance(4);

    match packet_type {
        PT_SENDER_REPORT => parse_sender_report(count_or_fmt, buf),
        PT_RECEIVER_REPORT => parse_receiver_report(count_or_fmt, buf),
        PT_SDES => parse_sdes(count_or_fmt, buf),
        PT_BYE => parse_bye(count_or_fmt, buf),
        PT_RTPFB => parse_rtpfb(count_or_fmt, buf, packet_type),
        PT_PSFB => parse_psfb(count_or_fmt, buf, packet_type),
        other => Err(RtcpParseError::UnknownPacketType(other)),
    }
}

fn parse_report_block(buf: &mut Bytes) -> Result<ReceptionReport, RtcpParseError> {
    if buf.remaining() < 24 {
        return Err(RtcpParseError::MalformedReportBlock);
    }
    let source_ssrc = buf.get_u32();
    let fraction_and_loss = buf.get_u32();
    let fraction_lost = (fraction_and_loss >> 24) as u8;
    let cumulative_lost = sign_extend_24(fraction_and_loss & 0x00FF_FFFF);
    let extended_highest_sequence = buf.get_u32();
    let interarrival_jitter = buf.get_u32();
    let last_sr_timestamp = buf.get_u32();
    let delay_since_last_sr = buf.get_u32();
    Ok(ReceptionReport {
        source_ssrc,
        fraction_lost,
        cumulative_lost,
        extended_highest_sequence,
        interarrival_jitter,
        last_sr_timestamp,
        delay_since_last_sr,
    })
}

fn sign_extend_24(value: u32) -> i32 {
    if value & 0x0080_0000 != 0 {
        (value | 0xFF00_0000) as i32
    } else {
        value as i32
    }
}

fn parse_sender_report(report_count: u8, mut buf: Bytes) -> Result<RtcpPacket, RtcpParseError> {
    if buf.remaining() < 24 {
        return Err(RtcpParseError::HeaderTooShort);
    }
    let sender_ssrc = buf.get_u32();
    let ntp_msw = buf.get_u32();
    let ntp_lsw = buf.get_u32();
    let rtp_timestamp = buf.get_u32();
    let sender_packet_count = buf.get_u32();
    let sender_octet_count = buf.get_u32();

    let mut reports = Vec::with_capacity(report_count as usize);
    for _ in 0..report_count {
        reports.push(parse_report_block(&mut buf)?);
    }
    let profile_extensions = buf.to_vec();

    Ok(RtcpPacket::SenderReport(SenderReport {
        sender_ssrc,
        sender_info: SenderInfo {
            ntp_timestamp: ((ntp_msw as u64) << 32) | ntp_lsw as u64,
            rtp_timestamp,
            sender_packet_count,
            sender_octet_count,
        },
        reports,
        profile_extensions,
    }))
}

fn parse_receiver_report(report_count: u8, mut buf: Bytes) -> Result<RtcpPacket, RtcpParseError> {
    if buf.remaining() < 4 {
        return Err(RtcpParseError::HeaderTooShort);
    }
    let reporter_ssrc = buf.get_u32();
    let mut reports = Vec::with_capacity(report_count as usize);
    for _ in 0..report_count {
        reports.push(parse_report_block(&mut buf)?);
    }
    let profile_extensions = buf.to_vec();
    Ok(RtcpPacket::ReceiverReport(ReceiverReport {
        reporter_ssrc,
        reports,
        profile_extensions,
    }))
}

fn parse_sdes(chunk_count: u8, mut buf: Bytes) -> Result<RtcpPacket, RtcpParseError> {
    let mut chunks = Vec::with_capacity(chunk_count as usize);
    for _ in 0..chunk_count {
        if buf.remaining() < 4 {
            return Err(RtcpParseError::MalformedSdesItem);
        }
        let source = buf.get_u32();
        let mut items = Vec::new();
        loop {
            if buf.remaining() == 0 {
                return Err(RtcpParseError::MalformedSdesItem);
            }
            let item_type = buf.get_u8();
            if item_type == 0 {
                break; // chunk terminator, already 32-bit aligned by construction
            }
            if buf.remaining() < 1 {
                return Err(RtcpParseError::MalformedSdesItem);
            }
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(RtcpParseError::MalformedSdesItem);
            }
            let value = buf.copy_to_bytes(len).to_vec();
            items.push(SdesItem { item_type, value });
        }
        // Consume remaining null padding up to the next 32-bit boundary.
        let consumed = 4 + items.iter().map(|i| 2 + i.value.len()).sum::<usize>() + 1;
        let pad = (4 - consumed % 4) % 4;
        if buf.remaining() < pad {
            return Err(RtcpParseError::MalformedSdesItem);
        }
        buf.advance(pad);
        chunks.push(SdesChunk { source, items });
    }
    Ok(RtcpPacket::SourceDescription(SourceDescription { chunks }))
}

fn parse_bye(source_count: u8, mut buf: Bytes) -> Result<RtcpPacket, RtcpParseError> {
    if buf.remaining() < source_count as usize * 4 {
        return Err(RtcpParseError::HeaderTooShort);
    }
    let mut sources = Vec::with_capacity(source_count as usize);
    for _ in 0..source_count {
        sources.push(buf.get_u32());
    }
    let reason = if buf.remaining() > 0 {
        let len = buf.get_u8() as usize;
        if buf.remaining() < len {
            return Err(RtcpParseError::MalformedReportBlock);
        }
        let bytes = buf.copy_to_bytes(len);
        Some(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        None
    };
    Ok(RtcpPacket::Goodbye(Goodbye { sources, reason }))
}

fn parse_rtpfb(fmt: u8, buf: Bytes, packet_type: u8) -> Result<RtcpPacket, RtcpParseError> {
    let (sender_ssrc, media_ssrc, fci) = split_feedback_header(buf)?;
    match fmt {
        FMT_GENERIC_NACK => Ok(RtcpPacket::Nack(GenericNack::parse_fci(sender_ssrc, media_ssrc, fci)?)),
        FMT_TRANSPORT_CC => Ok(RtcpPacket::TransportCc(TransportCcFeedback::parse_fci(
            sender_ssrc,
            media_ssrc,
            fci,
        )?)),
        other => Err(RtcpParseError::UnknownFeedbackFormat(other, packet_type)),
    }
}

fn parse_psfb(fmt: u8, buf: Bytes, packet_type: u8) -> Result<RtcpPacket, RtcpParseError> {
    let (sender_ssrc, media_ssrc, fci) = split_feedback_header(buf)?;
    match fmt {
        FMT_PLI => Ok(RtcpPacket::Pli(PictureLossIndication {
            sender_ssrc,
            media_ssrc,
        })),
        FMT_FIR => Ok(RtcpPacket::Fir(FullIntraRequest::parse_fci(sender_ssrc, media_ssrc, fci)?)),
        crate::feedback::FMT_AFB => Ok(RtcpPacket::Remb(ReceiverEstimatedMaxBitrate::parse_fci(
            sender_ssrc,
            media_ssrc,
            fci,
        )?)),
        other => Err(RtcpParseError::UnknownFeedbackFormat(other, packet_type)),
    }
}

fn split_feedback_header(mut buf: Bytes) -> Result<(u32, u32, Bytes), RtcpParseError> {
    if buf.remaining() < 8 {
        return Err(RtcpParseError::HeaderTooShort);
    }
    let sender_ssrc = buf.get_u32();
    let media_ssrc = buf.get_u32();
    Ok((sender_ssrc, media_ssrc, buf))
}

/// Encodes any [`RtcpPacket`] to its wire representation.
pub fn encode_packet(packet: &RtcpPacket) -> Bytes {
    match packet {
        RtcpPacket::SenderReport(sr) => encode_sender_report(sr),
        RtcpPacket::ReceiverReport(rr) => encode_receiver_report(rr),
        RtcpPacket::SourceDescription(sdes) => encode_sdes(sdes),
        RtcpPacket::Goodbye(bye) => encode_bye(bye),
        RtcpPacket::Nack(nack) => {
            encode_feedback(PT_RTPFB, FMT_GENERIC_NACK, nack.sender_ssrc, nack.media_ssrc, &nack.encode_fci())
        }
        RtcpPacket::Pli(pli) => encode_feedback(PT_PSFB, FMT_PLI, pli.sender_ssrc, pli.media_ssrc, &Bytes::new()),
        RtcpPacket::Fir(fir) => {
            encode_feedback(PT_PSFB, FMT_FIR, fir.sender_ssrc, fir.media_ssrc, &fir.encode_fci())
        }
        RtcpPacket::TransportCc(tcc) => encode_feedback(
            PT_RTPFB,
            FMT_TRANSPORT_CC,
            tcc.sender_ssrc,
            tcc.media_ssrc,
            &tcc.encode_fci().expect("bounded packet count"),
        ),
        RtcpPacket::Remb(remb) => encode_feedback(
            PT_PSFB,
            crate::feedback::FMT_AFB,
            remb.sender_ssrc,
            0,
            &remb.encode_fci().expect("bounded ssrc count"),
        ),
    }
}

fn write_header(buf: &mut BytesMut, count_or_fmt: u8, packet_type: u8, body_words: usize) {
    buf.put_u8((RTCP_VERSION << 6) | (count_or_fmt & 0x1f));
    buf.put_u8(packet_type);
    buf.put_u16(body_words as u16);
}

fn encode_sender_report(sr: &SenderReport) -> Bytes {
    let body_len = 20 + sr.reports.len() * 24 + sr.profile_extensions.len();
    let mut buf = BytesMut::with_capacity(4 + body_len);
    write_header(&mut buf, sr.reports.len() as u8, PT_SENDER_REPORT, body_len / 4);
    buf.put_u32(sr.sender_ssrc);
    buf.put_u32((sr.sender_info.ntp_timestamp >> 32) as u32);
    buf.put_u32(sr.sender_info.ntp_timestamp as u32);
    buf.put_u32(sr.sender_info.rtp_timestamp);
    buf.put_u32(sr.sender_info.sender_packet_count);
    buf.put_u32(sr.sender_info.sender_octet_count);
    for report in &sr.reports {
        put_report_block(&mut buf, report);
    }
    buf.put_slice(&sr.profile_extensions);
    buf.freeze()
}

fn encode_receiver_report(rr: &ReceiverReport) -> Bytes {
    let body_len = 4 + rr.reports.len() * 24 + rr.profile_extensions.len();
    let mut buf = BytesMut::with_capacity(4 + body_len);
    write_header(&mut buf, rr.reports.len() as u8, PT_RECEIVER_REPORT, body_len / 4);
    buf.put_u32(rr.reporter_ssrc);
    for report in &rr.reports {
        put_report_block(&mut buf, report);
    }
    buf.put_slice(&rr.profile_extensions);
    buf.freeze()
}

fn put_report_block(buf: &mut BytesMut, report: &ReceptionReport) {
    buf.put_u32(report.source_ssrc);
    let cumulative = (report.cumulative_lost as u32) & 0x00FF_FFFF;
    buf.put_u32(((report.fraction_lost as u32) << 24) | cumulative);
    buf.put_u32(report.extended_highest_sequence);
    buf.put_u32(report.interarrival_jitter);
    buf.put_u32(report.last_sr_timestamp);
    buf.put_u32(report.delay_since_last_sr);
}

fn encode_sdes(sdes: &SourceDescription) -> Bytes {
    let mut body = BytesMut::new();
    for chunk in &sdes.chunks {
        body.put_u32(chunk.source);
        let mut chunk_len = 4usize;
        for item in &chunk.items {
            body.put_u8(item.item_type);
            body.put_u8(item.value.len() as u8);
            body.put_slice(&item.value);
            chunk_len += 2 + item.value.len();
        }
        body.put_u8(0); // terminator
        chunk_len += 1;
        let pad = (4 - chunk_len % 4) % 4;
        body.put_bytes(0, pad);
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    write_header(&mut buf, sdes.chunks.len() as u8, PT_SDES, body.len() / 4);
    buf.put_slice(&body);
    buf.freeze()
}

fn encode_bye(bye: &Goodbye) -> Bytes {
    let mut body = BytesMut::new();
    for source in &bye.sources {
        body.put_u32(*source);
    }
    if let Some(reason) = &bye.reason {
        body.put_u8(reason.len() as u8);
        body.put_slice(reason.as_bytes());
        while body.len() % 4 != 0 {
            body.put_u8(0);
        }
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    write_header(&mut buf, bye.sources.len() as u8, PT_BYE, body.len() / 4);
    buf.put_slice(&body);
    buf.freeze()
}

fn encode_feedback(packet_type: u8, fmt: u8, sender_ssrc: u32, media_ssrc: u32, fci: &Bytes) -> Bytes {
    let body_len = 8 + fci.len();
    let mut buf = BytesMut::with_capacity(4 + body_len);
    write_header(&mut buf, fmt, packet_type, body_len / 4);
    buf.put_u32(sender_ssrc);
    buf.put_u32(media_ssrc);
    buf.put_slice(fci);
    buf.freeze()
}
