//! MPEG-2 Transport Stream packetisation.
//!
//! Builds a self-contained TS segment: PAT, PMT, then interleaved PES
//! packets for the video sample range (Annex-B, with SPS/PPS and an access
//! unit delimiter prepended to the first access unit) and the overlapping
//! audio range (ADTS-framed AAC). Every packet is exactly 188 bytes;
//! adaptation-field stuffing pads short payloads and carries the PCR.

pub mod adts;
pub mod avc;

use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::moov::ParsedTrack;

pub const PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;
const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;
const PCR_PID: u16 = VIDEO_PID;
const VIDEO_STREAM_ID: u8 = 0xE0;
const AUDIO_STREAM_ID: u8 = 0xC0;
const PMT_PROGRAM_NUMBER: u16 = 1;
const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;

/// One sample ready for packetisation: timestamps already on the 90kHz
/// clock, payload the raw (not yet reframed) sample bytes sliced straight
/// out of the mapped file.
pub struct TsSample<'a> {
    pub pts_90k: u64,
    pub dts_90k: u64,
    pub data: &'a [u8],
}

struct ContinuityCounters {
    pat: u8,
    pmt: u8,
    video: u8,
    audio: u8,
}

impl ContinuityCounters {
    fn new() -> Self {
        Self { pat: 0, pmt: 0, video: 0, audio: 0 }
    }

    /// Advances and returns the counter for `pid`. Per spec this only
    /// increments on packets that carry a payload; PSI and PES writers here
    /// always do, so every call here is a real advance.
    fn next(&mut self, pid: u16) -> u8 {
        let counter = match pid {
            PAT_PID => &mut self.pat,
            PMT_PID => &mut self.pmt,
            VIDEO_PID => &mut self.video,
            AUDIO_PID => &mut self.audio,
            _ => &mut self.pat,
        };
        let value = *counter;
        *counter = (*counter + 1) & 0x0F;
        value
    }
}

/// Packetises one segment's video and audio sample ranges into a raw TS byte
/// stream. Video and audio PES packets alternate in presentation order
/// rather than running as two separate blocks, so a player reading the
/// stream sequentially sees roughly interleaved audio and video as it would
/// from a live mux.
#[tracing::instrument(skip(video_track, audio_track, video_samples, audio_samples))]
pub fn mux_segment(
    video_track: &ParsedTrack,
    audio_track: Option<&ParsedTrack>,
    video_samples: &[TsSample<'_>],
    audio_samples: &[TsSample<'_>],
) -> Result<Vec<u8>> {
    let mut out = BytesMut::new();
    let mut cc = ContinuityCounters::new();

    write_pat(&mut out, &mut cc);
    write_pmt(&mut out, &mut cc, audio_track.is_some());

    let avc_config = avc::AvcDecoderConfig::parse(&video_track.codec_data)?;
    let parameter_sets = avc_config.annex_b_parameter_sets();

    let mut video_first = true;
    let mut vi = 0usize;
    let mut ai = 0usize;

    loop {
        let take_video = match (video_samples.get(vi), audio_samples.get(ai)) {
            (Some(v), Some(a)) => v.dts_90k <= a.dts_90k,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        if take_video {
            let sample = &video_samples[vi];
            vi += 1;
            let mut au = Vec::with_capacity(sample.data.len() + parameter_sets.len() + 12);
            if video_first {
                au.extend_from_slice(&parameter_sets);
                video_first = false;
            }
            avc::append_access_unit_delimiter(&mut au);
            avc::reframe_annex_b(sample.data, avc_config.nal_length_size, &mut au)?;

            let pcr = Some(pcr_for(sample.dts_90k));
            write_pes(&mut out, &mut cc, VIDEO_PID, VIDEO_STREAM_ID, sample.pts_90k, Some(sample.dts_90k), pcr, &au);
        } else if let Some(audio_track) = audio_track {
            let sample = &audio_samples[ai];
            ai += 1;
            let mut frame = Vec::with_capacity(sample.data.len() + 7);
            adts::write_adts_frame(&mut frame, sample.data, &audio_track.codec_data)?;
            write_pes(&mut out, &mut cc, AUDIO_PID, AUDIO_STREAM_ID, sample.pts_90k, None, None, &frame);
        } else {
            // No audio track configured despite audio samples present: skip.
            ai += 1;
        }
    }

    tracing::debug!(
        video_sample_count = video_samples.len(),
        audio_sample_count = audio_samples.len(),
        packet_count = out.len() / PACKET_SIZE,
        "packetized segment"
    );

    Ok(out.to_vec())
}

/// PCR runs on the 90kHz sample clock scaled into the 27MHz PCR base; we
/// don't track a sub-tick extension phase.
fn pcr_for(dts_90k: u64) -> u64 {
    dts_90k * 300
}

fn write_pat(buf: &mut BytesMut, cc: &mut ContinuityCounters) {
    let mut section = BytesMut::new();
    section.put_u8(0x00); // table_id
    let length_at = section.len();
    section.put_u16(0); // patched below
    section.put_u16(0x0001); // transport_stream_id
    section.put_u8(0xC1); // version=0, current_next_indicator=1
    section.put_u8(0x00); // section_number
    section.put_u8(0x00); // last_section_number
    section.put_u16(PMT_PROGRAM_NUMBER);
    section.put_u16(0xE000 | PMT_PID);

    finish_psi_section(&mut section, length_at);
    write_psi_packet(buf, PAT_PID, cc.next(PAT_PID), &section);
}

fn write_pmt(buf: &mut BytesMut, cc: &mut ContinuityCounters, has_audio: bool) {
    let mut section = BytesMut::new();
    section.put_u8(0x02); // table_id
    let length_at = section.len();
    section.put_u16(0);
    section.put_u16(PMT_PROGRAM_NUMBER);
    section.put_u8(0xC1);
    section.put_u8(0x00);
    section.put_u8(0x00);
    section.put_u16(0xE000 | PCR_PID);
    section.put_u16(0xF000); // program_info_length = 0

    section.put_u8(STREAM_TYPE_H264);
    section.put_u16(0xE000 | VIDEO_PID);
    section.put_u16(0xF000); // ES_info_length = 0

    if has_audio {
        section.put_u8(STREAM_TYPE_AAC_ADTS);
        section.put_u16(0xE000 | AUDIO_PID);
        section.put_u16(0xF000);
    }

    finish_psi_section(&mut section, length_at);
    write_psi_packet(buf, PMT_PID, cc.next(PMT_PID), &section);
}

/// Patches the section_length field at `length_at` and appends the CRC-32.
fn finish_psi_section(section: &mut BytesMut, length_at: usize) {
    let body_len = section.len() - length_at - 2 + 4; // everything after section_length, plus CRC32
    let patched = 0xB000u16 | (body_len as u16 & 0x0FFF);
    section[length_at..length_at + 2].copy_from_slice(&patched.to_be_bytes());
    let crc = crc32_mpeg2(&section[length_at + 2..]);
    section.put_u32(crc);
}

fn write_psi_packet(buf: &mut BytesMut, pid: u16, cc: u8, section: &[u8]) {
    let mut packet = [0xFFu8; PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = 0x40 | ((pid >> 8) as u8 & 0x1F); // payload_unit_start_indicator
    packet[2] = (pid & 0xFF) as u8;
    packet[3] = 0x10 | (cc & 0x0F); // payload only, no adaptation field

    let pos = 5usize; // 4-byte header + 1-byte pointer_field
    packet[4] = 0x00; // pointer_field: PSI section starts immediately

    let copy_len = section.len().min(PACKET_SIZE - pos);
    packet[pos..pos + copy_len].copy_from_slice(&section[..copy_len]);
    buf.put_slice(&packet);
}

/// Writes `payload` as one PES packet, split across as many 188-byte TS
/// packets as needed. Only the first packet sets payload_unit_start and, on
/// request, carries a PCR-bearing adaptation field; later packets use a
/// stuffed adaptation field only when the final chunk is shorter than the
/// available payload space.
fn write_pes(
    buf: &mut BytesMut,
    cc: &mut ContinuityCounters,
    pid: u16,
    stream_id: u8,
    pts_90k: u64,
    dts_90k: Option<u64>,
    pcr: Option<u64>,
    payload: &[u8],
) {
    let mut pes = BytesMut::new();
    pes.put_slice(&[0x00, 0x00, 0x01]);
    pes.put_u8(stream_id);
    let has_dts = dts_90k.is_some();
    let header_data_len = if has_dts { 10 } else { 5 };
    let pes_packet_length = payload.len() + 3 + header_data_len;
    pes.put_u16(if pes_packet_length > 0xFFFF { 0 } else { pes_packet_length as u16 });
    pes.put_u8(0x80); // '10' marker bits, no scrambling, not copyrighted
    pes.put_u8(if has_dts { 0xC0 } else { 0x80 }); // PTS_DTS_flags
    pes.put_u8(header_data_len as u8);
    write_timestamp(&mut pes, if has_dts { 0x3 } else { 0x2 }, pts_90k);
    if let Some(dts) = dts_90k {
        write_timestamp(&mut pes, 0x1, dts);
    }
    pes.put_slice(payload);

    let mut remaining: &[u8] = &pes;
    let mut first = true;

    while !remaining.is_empty() {
        let mut packet = [0xFFu8; PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = (if first { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F);
        packet[2] = (pid & 0xFF) as u8;

        let available = PACKET_SIZE - 4;
        let want_pcr = first && pcr.is_some();
        let fits_without_adaptation = !want_pcr && remaining.len() >= available;

        if fits_without_adaptation {
            packet[3] = 0x10 | (cc.next(pid) & 0x0F);
            packet[4..4 + available].copy_from_slice(&remaining[..available]);
            remaining = &remaining[available..];
        } else {
            packet[3] = 0x30 | (cc.next(pid) & 0x0F);
            let pcr_reserve = if want_pcr { 6 } else { 0 };
            let payload_take = remaining.len().min(available.saturating_sub(2 + pcr_reserve));
            let adaptation_field_length = available - 1 - payload_take;

            packet[4] = adaptation_field_length as u8;
            if adaptation_field_length > 0 {
                packet[5] = if want_pcr { 0x10 } else { 0x00 };
                let mut pos = 6usize;
                if want_pcr {
                    if let Some(pcr_value) = pcr {
                        write_pcr(&mut packet[pos..pos + 6], pcr_value);
                        pos += 6;
                    }
                }
                for b in packet.iter_mut().take(5 + adaptation_field_length).skip(pos) {
                    *b = 0xFF;
                }
            }

            let payload_start = 5 + adaptation_field_length;
            packet[payload_start..payload_start + payload_take].copy_from_slice(&remaining[..payload_take]);
            remaining = &remaining[payload_take..];
        }

        buf.put_slice(&packet);
        first = false;
    }
}

fn write_pcr(out: &mut [u8], pcr_27mhz: u64) {
    let base = pcr_27mhz / 300;
    let extension = pcr_27mhz % 300;
    out[0] = ((base >> 25) & 0xFF) as u8;
    out[1] = ((base >> 17) & 0xFF) as u8;
    out[2] = ((base >> 9) & 0xFF) as u8;
    out[3] = ((base >> 1) & 0xFF) as u8;
    out[4] = (((base & 0x1) as u8) << 7) | 0x7E | (((extension >> 8) & 0x1) as u8);
    out[5] = (extension & 0xFF) as u8;
}

fn write_timestamp(buf: &mut BytesMut, marker: u8, ts_90k: u64) {
    let ts = ts_90k & 0x1_FFFF_FFFF; // 33-bit PTS/DTS wraparound
    let b0 = (marker << 4) | (((ts >> 30) & 0x07) as u8) << 1 | 1;
    let b1 = ((ts >> 22) & 0xFF) as u8;
    let b2 = ((((ts >> 15) & 0x7F) as u8) << 1) | 1;
    let b3 = ((ts >> 7) & 0xFF) as u8;
    let b4 = (((ts & 0x7F) as u8) << 1) | 1;
    buf.put_slice(&[b0, b1, b2, b3, b4]);
}

/// CRC-32/MPEG-2: poly 0x04C11DB7, init 0xFFFFFFFF, no reflect, no final xor.
fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04C1_1DB7 } else { crc << 1 };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomType;
    use crate::moov::{HandlerType, ParsedTrack};
    use crate::sample_table::SampleTableBuilder;
    use bytes::BufMut;

    fn avcc_bytes() -> Vec<u8> {
        let mut b = vec![1u8, 0x64, 0x00, 0x1f, 0xFF, 0xE1];
        b.put_u16(4);
        b.extend_from_slice(&[0x67, 0x64, 0x00, 0x1f]);
        b.push(1);
        b.put_u16(2);
        b.extend_from_slice(&[0x68, 0xEB]);
        b
    }

    fn esds_bytes() -> Vec<u8> {
        let dsi = [0x12u8, 0x10]; // AAC-LC, 44100Hz, stereo
        let mut dec_config = vec![0x40u8, 0x15, 0, 0, 0];
        dec_config.put_u32(128_000);
        dec_config.put_u32(128_000);
        dec_config.push(0x05);
        dec_config.push(dsi.len() as u8);
        dec_config.extend_from_slice(&dsi);

        let mut es_descr = vec![0u8, 1, 0x00];
        es_descr.push(0x04);
        es_descr.push(dec_config.len() as u8);
        es_descr.extend_from_slice(&dec_config);

        let mut esds = vec![0u8, 0, 0, 0];
        esds.push(0x03);
        esds.push(es_descr.len() as u8);
        esds.extend_from_slice(&es_descr);
        esds
    }

    fn track(handler: HandlerType, codec_data: Vec<u8>, fourcc: &[u8; 4]) -> ParsedTrack {
        ParsedTrack {
            track_id: 1,
            handler,
            timescale: 90_000,
            duration: 0,
            codec_fourcc: AtomType::from_bytes(*fourcc),
            codec_data,
            sample_table: SampleTableBuilder::new().build(),
            opaque: Vec::new(),
        }
    }

    #[test]
    fn mux_segment_interleaves_video_and_audio_in_dts_order() {
        let video = track(HandlerType::Video, avcc_bytes(), b"avc1");
        let audio = track(HandlerType::Audio, esds_bytes(), b"mp4a");

        let video_nal_a = 4u32.to_be_bytes().iter().chain([0x65, 0x88, 0x84, 0x21].iter()).copied().collect::<Vec<u8>>();
        let video_nal_b = 4u32.to_be_bytes().iter().chain([0x41, 0x9A, 0x24, 0x6C].iter()).copied().collect::<Vec<u8>>();

        let video_samples = vec![
            TsSample { pts_90k: 0, dts_90k: 0, data: &video_nal_a },
            TsSample { pts_90k: 6000, dts_90k: 6000, data: &video_nal_b },
        ];
        let audio_samples = vec![TsSample { pts_90k: 3000, dts_90k: 3000, data: &[0xAAu8; 20] }];

        let ts_bytes = mux_segment(&video, Some(&audio), &video_samples, &audio_samples).unwrap();
        assert_eq!(ts_bytes.len() % PACKET_SIZE, 0);

        // PAT, PMT, then video(dts=0), audio(dts=3000), video(dts=6000) in order:
        // each PES's first TS packet carries PUSI=1 (bit 0x40 on byte[1]).
        let mut pusi_pids = Vec::new();
        for chunk in ts_bytes.chunks(PACKET_SIZE) {
            if chunk[1] & 0x40 != 0 {
                let pid = (((chunk[1] & 0x1F) as u16) << 8) | chunk[2] as u16;
                pusi_pids.push(pid);
            }
        }
        assert_eq!(pusi_pids, vec![PAT_PID, PMT_PID, VIDEO_PID, AUDIO_PID, VIDEO_PID]);
    }

    #[test]
    fn psi_packets_are_188_bytes_and_sync_marked() {
        let mut buf = BytesMut::new();
        let mut cc = ContinuityCounters::new();
        write_pat(&mut buf, &mut cc);
        assert_eq!(buf.len(), PACKET_SIZE);
        assert_eq!(buf[0], SYNC_BYTE);
    }

    #[test]
    fn every_packet_in_a_pes_is_188_bytes() {
        let mut buf = BytesMut::new();
        let mut cc = ContinuityCounters::new();
        let payload = vec![0xAB; 1000];
        write_pes(&mut buf, &mut cc, VIDEO_PID, VIDEO_STREAM_ID, 900, Some(900), Some(270_000), &payload);
        assert_eq!(buf.len() % PACKET_SIZE, 0);
        assert!(buf.len() / PACKET_SIZE > 1);
        for chunk in buf.chunks(PACKET_SIZE) {
            assert_eq!(chunk[0], SYNC_BYTE);
        }
    }

    #[test]
    fn short_pes_payload_gets_stuffed_to_packet_size() {
        let mut buf = BytesMut::new();
        let mut cc = ContinuityCounters::new();
        write_pes(&mut buf, &mut cc, AUDIO_PID, AUDIO_STREAM_ID, 900, None, None, &[0xAA; 10]);
        assert_eq!(buf.len(), PACKET_SIZE);
    }

    #[test]
    fn timestamp_wraps_at_33_bits() {
        let mut buf = BytesMut::new();
        write_timestamp(&mut buf, 0x2, u64::MAX);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0] & 0x01, 1);
    }

    #[test]
    fn crc32_mpeg2_matches_known_vector() {
        assert_eq!(crc32_mpeg2(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn continuity_counter_wraps_at_16() {
        let mut cc = ContinuityCounters::new();
        for _ in 0..16 {
            cc.next(VIDEO_PID);
        }
        assert_eq!(cc.next(VIDEO_PID), 0);
    }
}
