//! `moov` subtree parser.
//!
//! A type-indexed dispatch over the movie box: each container level checks a
//! registration table keyed by (parent, child FourCC). A recognised child is
//! parsed into its typed field; an unrecognised one is kept verbatim in the
//! parent's opaque-atom list instead of being dropped, so a round-trip tool
//! downstream could still see everything the source file carried.

use crate::atom::{self, AtomType};
use crate::bitio;
use crate::error::{Error, Result};
use crate::sample_table::SampleTable;

const MAX_TRACKS: usize = 8;

/// A box this parser doesn't interpret, kept as its full header+body bytes.
#[derive(Debug, Clone)]
pub struct OpaqueAtom {
    pub atom_type: AtomType,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentKind {
    Moov,
    Trak,
    Mdia,
    Minf,
    Stbl,
}

const REGISTERED: &[(ParentKind, AtomType)] = &[
    (ParentKind::Moov, AtomType::MVHD),
    (ParentKind::Moov, AtomType::TRAK),
    (ParentKind::Moov, AtomType::MVEX),
    (ParentKind::Trak, AtomType::TKHD),
    (ParentKind::Trak, AtomType::MDIA),
    (ParentKind::Trak, AtomType::EDTS),
    (ParentKind::Mdia, AtomType::MDHD),
    (ParentKind::Mdia, AtomType::HDLR),
    (ParentKind::Mdia, AtomType::MINF),
    (ParentKind::Minf, AtomType::VMHD),
    (ParentKind::Minf, AtomType::SMHD),
    (ParentKind::Minf, AtomType::DINF),
    (ParentKind::Minf, AtomType::STBL),
    (ParentKind::Stbl, AtomType::STSD),
    (ParentKind::Stbl, AtomType::STTS),
    (ParentKind::Stbl, AtomType::STSS),
    (ParentKind::Stbl, AtomType::STSC),
    (ParentKind::Stbl, AtomType::STSZ),
    (ParentKind::Stbl, AtomType::STCO),
    (ParentKind::Stbl, AtomType::CO64),
    (ParentKind::Stbl, AtomType::CTTS),
];

fn is_registered(parent: ParentKind, atom_type: AtomType) -> bool {
    REGISTERED.iter().any(|(p, t)| *p == parent && *t == atom_type)
}

fn opaque_from(data: &[u8], atom: &atom::Atom) -> OpaqueAtom {
    let start = atom.start() as usize;
    let end = atom.end() as usize;
    OpaqueAtom {
        atom_type: atom.atom_type,
        bytes: data.get(start..end).map(|b| b.to_vec()).unwrap_or_default(),
    }
}

/// Video/audio track handler, per `hdlr`'s subtype FourCC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Other([u8; 4]),
}

impl HandlerType {
    fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            other => Self::Other(*other),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedTrack {
    pub track_id: u32,
    pub handler: HandlerType,
    pub timescale: u32,
    pub duration: u64,
    /// Sample entry format, e.g. `avc1`, `hvc1`, `mp4a`.
    pub codec_fourcc: AtomType,
    /// Raw `avcC`/`hvcC`/`esds` box body, interpreted downstream by the TS packetiser.
    pub codec_data: Vec<u8>,
    pub sample_table: SampleTable,
    pub opaque: Vec<OpaqueAtom>,
}

#[derive(Debug, Clone)]
pub struct ParsedMoov {
    pub timescale: u32,
    pub duration: u64,
    pub tracks: Vec<ParsedTrack>,
    pub opaque: Vec<OpaqueAtom>,
}

impl ParsedMoov {
    pub fn video_track(&self) -> Option<&ParsedTrack> {
        self.tracks.iter().find(|t| t.handler.is_video())
    }

    pub fn audio_track(&self) -> Option<&ParsedTrack> {
        self.tracks.iter().find(|t| t.handler.is_audio())
    }
}

/// Parse the `moov` box body into a fully resolved movie tree.
#[tracing::instrument(skip(data, moov))]
pub fn parse_moov(data: &[u8], moov: &atom::Atom) -> Result<ParsedMoov> {
    let body_start = moov.data_offset;
    let body_end = moov.end();
    let children = atom::scan(data, body_start, body_end)?;

    let mut timescale = 0u32;
    let mut duration = 0u64;
    let mut tracks = Vec::new();
    let mut opaque = Vec::new();

    for child in &children {
        if child.atom_type == AtomType::MVHD {
            let (ts, dur) = parse_mvhd(child.body(data)?)?;
            timescale = ts;
            duration = dur;
        } else if child.atom_type == AtomType::TRAK {
            if tracks.len() >= MAX_TRACKS {
                return Err(Error::malformed(Some(*b"trak"), Some(child.start()), "more than 8 tracks in moov"));
            }
            tracks.push(parse_trak(data, child)?);
        } else if is_registered(ParentKind::Moov, child.atom_type) {
            // mvex: recognised but not needed by this packager (no fragmented mp4 output).
        } else {
            opaque.push(opaque_from(data, child));
        }
    }

    if timescale == 0 {
        return Err(Error::NoMovieOrMedia("mvhd"));
    }

    tracing::debug!(timescale, duration, track_count = tracks.len(), "parsed moov");

    Ok(ParsedMoov { timescale, duration, tracks, opaque })
}

fn parse_mvhd(body: &[u8]) -> Result<(u32, u64)> {
    let version = bitio::read_u8(body, 0)?;
    if version == 1 {
        let timescale = bitio::read_u32(body, 20)?;
        let duration = bitio::read_u64(body, 24)?;
        Ok((timescale, duration))
    } else {
        let timescale = bitio::read_u32(body, 12)?;
        let duration = bitio::read_u32(body, 16)? as u64;
        Ok((timescale, duration))
    }
}

fn parse_trak(data: &[u8], trak: &atom::Atom) -> Result<ParsedTrack> {
    let children = atom::scan(data, trak.data_offset, trak.end())?;

    let mut track_id = 0u32;
    // tkhd's duration is expressed in the *movie* timescale, not this
    // track's; it's read only for track_id and discarded otherwise. Mixing
    // it into a track-timescale duration field would silently misscale
    // every downstream segment-boundary and PTS/DTS computation.
    let mut mdia: Option<(HandlerType, u32, u64, AtomType, Vec<u8>, SampleTable)> = None;
    let mut opaque = Vec::new();

    for child in &children {
        if child.atom_type == AtomType::TKHD {
            let (id, _movie_timescale_duration) = parse_tkhd(child.body(data)?)?;
            track_id = id;
        } else if child.atom_type == AtomType::MDIA {
            mdia = Some(parse_mdia(data, child)?);
        } else if is_registered(ParentKind::Trak, child.atom_type) {
            // edts: recognised, not needed (no edit-list remapping in this design).
        } else {
            opaque.push(opaque_from(data, child));
        }
    }

    let (handler, timescale, duration, codec_fourcc, codec_data, sample_table) =
        mdia.ok_or(Error::NoMovieOrMedia("mdia"))?;

    tracing::debug!(track_id, ?handler, timescale, sample_count = sample_table.sample_count, "parsed track");

    Ok(ParsedTrack {
        track_id,
        handler,
        timescale,
        duration,
        codec_fourcc,
        codec_data,
        sample_table,
        opaque,
    })
}

fn parse_tkhd(body: &[u8]) -> Result<(u32, u64)> {
    let version = bitio::read_u8(body, 0)?;
    if version == 1 {
        let track_id = bitio::read_u32(body, 20)?;
        let duration = bitio::read_u64(body, 28)?;
        Ok((track_id, duration))
    } else {
        let track_id = bitio::read_u32(body, 12)?;
        let duration = bitio::read_u32(body, 20)? as u64;
        Ok((track_id, duration))
    }
}

#[allow(clippy::type_complexity)]
fn parse_mdia(
    data: &[u8],
    mdia: &atom::Atom,
) -> Result<(HandlerType, u32, u64, AtomType, Vec<u8>, SampleTable)> {
    let children = atom::scan(data, mdia.data_offset, mdia.end())?;

    let mut timescale = 0u32;
    let mut duration = 0u64;
    let mut handler = HandlerType::Other(*b"????");

    for child in &children {
        if child.atom_type == AtomType::MDHD {
            let (ts, dur) = parse_mdhd(child.body(data)?)?;
            timescale = ts;
            duration = dur;
        } else if child.atom_type == AtomType::HDLR {
            handler = parse_hdlr(child.body(data)?)?;
        }
    }

    let minf = children
        .iter()
        .find(|c| c.atom_type == AtomType::MINF)
        .ok_or(Error::NoMovieOrMedia("minf"))?;

    let (codec_fourcc, codec_data, sample_table) = parse_minf(data, minf)?;

    Ok((handler, timescale, duration, codec_fourcc, codec_data, sample_table))
}

fn parse_mdhd(body: &[u8]) -> Result<(u32, u64)> {
    let version = bitio::read_u8(body, 0)?;
    if version == 1 {
        let timescale = bitio::read_u32(body, 20)?;
        let duration = bitio::read_u64(body, 24)?;
        Ok((timescale, duration))
    } else {
        let timescale = bitio::read_u32(body, 12)?;
        let duration = bitio::read_u32(body, 16)? as u64;
        Ok((timescale, duration))
    }
}

fn parse_hdlr(body: &[u8]) -> Result<HandlerType> {
    let fourcc = bitio::read_u32(body, 8)?.to_be_bytes();
    Ok(HandlerType::from_bytes(fourcc))
}

fn parse_minf(data: &[u8], minf: &atom::Atom) -> Result<(AtomType, Vec<u8>, SampleTable)> {
    let children = atom::scan(data, minf.data_offset, minf.end())?;

    let stbl = children
        .iter()
        .find(|c| c.atom_type == AtomType::STBL)
        .ok_or(Error::NoMovieOrMedia("stbl"))?;

    parse_stbl(data, stbl)
}

fn parse_stbl(data: &[u8], stbl: &atom::Atom) -> Result<(AtomType, Vec<u8>, SampleTable)> {
    let children = atom::scan(data, stbl.data_offset, stbl.end())?;

    let mut builder = SampleTable::builder();
    let mut codec_fourcc = AtomType::from_bytes(*b"????");
    let mut codec_data = Vec::new();

    for child in &children {
        match child.atom_type {
            AtomType::STSD => {
                let (fourcc, data_bytes) = parse_stsd(data, child)?;
                codec_fourcc = fourcc;
                codec_data = data_bytes;
            }
            AtomType::STTS => builder.set_stts(parse_stts(child.body(data)?)?),
            AtomType::STSS => builder.set_sync_samples(parse_stss(child.body(data)?)?),
            AtomType::STSC => builder.set_stsc(parse_stsc(child.body(data)?)?),
            AtomType::STSZ => {
                let (uniform, sizes) = parse_stsz(child.body(data)?)?;
                builder.set_stsz(uniform, sizes);
            }
            AtomType::STCO => builder.set_chunk_offsets(parse_stco(child.body(data)?)?),
            AtomType::CO64 => builder.set_chunk_offsets(parse_co64(child.body(data)?)?),
            AtomType::CTTS => builder.set_ctts(parse_ctts(child.body(data)?)?),
            _ => {}
        }
    }

    Ok((codec_fourcc, codec_data, builder.build()))
}

fn entry_count_guard(body_len: usize, count: u32, entry_size: usize, header: usize) -> Result<()> {
    let needed = header + count as usize * entry_size;
    if needed > body_len {
        return Err(Error::malformed(None, None, format!("entry count {count} overflows box of {body_len} bytes")));
    }
    Ok(())
}

fn parse_stts(body: &[u8]) -> Result<Vec<(u32, u32)>> {
    let count = bitio::read_u32(body, 4)?;
    entry_count_guard(body.len(), count, 8, 8)?;

    let mut entries = Vec::with_capacity(count as usize);
    let mut prev_total: u64 = 0;
    for i in 0..count {
        let offset = 8 + i as usize * 8;
        let sample_count = bitio::read_u32(body, offset)?;
        let sample_delta = bitio::read_u32(body, offset + 4)?;
        prev_total += sample_count as u64;
        entries.push((sample_count, sample_delta));
    }
    if prev_total == 0 && count > 0 {
        return Err(Error::malformed(Some(*b"stts"), None, "stts entries cover zero samples"));
    }
    Ok(entries)
}

fn parse_stss(body: &[u8]) -> Result<Vec<u32>> {
    let count = bitio::read_u32(body, 4)?;
    entry_count_guard(body.len(), count, 4, 8)?;

    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        entries.push(bitio::read_u32(body, 8 + i as usize * 4)?);
    }
    Ok(entries)
}

fn parse_stsc(body: &[u8]) -> Result<Vec<(u32, u32, u32)>> {
    let count = bitio::read_u32(body, 4)?;
    entry_count_guard(body.len(), count, 12, 8)?;

    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        let offset = 8 + i as usize * 12;
        let first_chunk = bitio::read_u32(body, offset)?;
        let samples_per_chunk = bitio::read_u32(body, offset + 4)?;
        let sample_desc_index = bitio::read_u32(body, offset + 8)?;
        entries.push((first_chunk, samples_per_chunk, sample_desc_index));
    }
    Ok(entries)
}

fn parse_stsz(body: &[u8]) -> Result<(u32, Vec<u32>)> {
    let uniform_size = bitio::read_u32(body, 4)?;
    let count = bitio::read_u32(body, 8)?;
    if uniform_size != 0 {
        return Ok((uniform_size, Vec::new()));
    }

    entry_count_guard(body.len(), count, 4, 12)?;
    let mut sizes = Vec::with_capacity(count as usize);
    for i in 0..count {
        sizes.push(bitio::read_u32(body, 12 + i as usize * 4)?);
    }
    Ok((0, sizes))
}

fn parse_stco(body: &[u8]) -> Result<Vec<u64>> {
    let count = bitio::read_u32(body, 4)?;
    entry_count_guard(body.len(), count, 4, 8)?;

    let mut offsets = Vec::with_capacity(count as usize);
    for i in 0..count {
        offsets.push(bitio::read_u32(body, 8 + i as usize * 4)? as u64);
    }
    Ok(offsets)
}

fn parse_co64(body: &[u8]) -> Result<Vec<u64>> {
    let count = bitio::read_u32(body, 4)?;
    entry_count_guard(body.len(), count, 8, 8)?;

    let mut offsets = Vec::with_capacity(count as usize);
    for i in 0..count {
        offsets.push(bitio::read_u64(body, 8 + i as usize * 8)?);
    }
    Ok(offsets)
}

fn parse_ctts(body: &[u8]) -> Result<Vec<(u32, i32)>> {
    // version 0 stores an unsigned offset; version 1 reinterprets the same 32
    // bits as signed. A version-0 entry at or above 0x8000_0000 must stay
    // positive, so the cast is gated on the version actually read, not inferred.
    let version = bitio::read_u8(body, 0)?;
    let count = bitio::read_u32(body, 4)?;
    entry_count_guard(body.len(), count, 8, 8)?;

    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        let offset = 8 + i as usize * 8;
        let sample_count = bitio::read_u32(body, offset)?;
        let raw_offset = bitio::read_u32(body, offset + 4)?;
        let cts_offset = if version == 0 {
            raw_offset.try_into().unwrap_or(i32::MAX)
        } else {
            raw_offset as i32
        };
        entries.push((sample_count, cts_offset));
    }
    Ok(entries)
}

const VISUAL_SAMPLE_ENTRY_PRELUDE: usize = 86;
const AUDIO_SAMPLE_ENTRY_PRELUDE: usize = 36;

fn parse_stsd(data: &[u8], stsd: &atom::Atom) -> Result<(AtomType, Vec<u8>)> {
    let body = stsd.body(data)?;
    let entry_count = bitio::read_u32(body, 4)?;
    if entry_count == 0 {
        return Err(Error::malformed(Some(*b"stsd"), None, "stsd has no sample entries"));
    }

    let entry_offset = 8usize;
    if entry_offset + 8 > body.len() {
        return Err(Error::truncated(Some(*b"stsd"), None, entry_offset + 8, body.len()));
    }

    let entry_size = bitio::read_u32(body, entry_offset)? as usize;
    let fourcc = AtomType::from_bytes([
        body[entry_offset + 4],
        body[entry_offset + 5],
        body[entry_offset + 6],
        body[entry_offset + 7],
    ]);

    let entry_end = entry_offset + entry_size;
    if entry_end > body.len() {
        return Err(Error::malformed(Some(*b"stsd"), None, "sample entry shorter than its declared size"));
    }

    let prelude = match fourcc.as_str() {
        "avc1" | "hvc1" | "hev1" | "encv" => VISUAL_SAMPLE_ENTRY_PRELUDE,
        "mp4a" | "enca" => AUDIO_SAMPLE_ENTRY_PRELUDE,
        other => {
            return Err(Error::unsupported(format!("unsupported sample entry {other}")));
        }
    };

    let children_start = entry_offset + prelude;
    if children_start > entry_end {
        return Err(Error::malformed(Some(*b"stsd"), None, "sample entry shorter than its fixed prelude"));
    }

    let children = atom::scan(data, stsd.data_offset + children_start as u64, stsd.data_offset + entry_end as u64)?;

    for child in &children {
        if matches!(child.atom_type.as_str(), "avcC" | "hvcC" | "esds") {
            return Ok((fourcc, child.body(data)?.to_vec()));
        }
    }

    Err(Error::unsupported(format!("{fourcc} sample entry has no codec configuration box")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn fullbox(version: u8) -> Vec<u8> {
        vec![version, 0, 0, 0]
    }

    #[test]
    fn parses_mvhd_version_0_and_1() {
        let mut v0 = fullbox(0);
        v0.extend_from_slice(&[0u8; 8]); // creation/modification
        v0.put_u32(90000); // timescale
        v0.put_u32(180000); // duration
        let (ts, dur) = parse_mvhd(&v0).unwrap();
        assert_eq!(ts, 90000);
        assert_eq!(dur, 180000);

        let mut v1 = fullbox(1);
        v1.extend_from_slice(&[0u8; 16]);
        v1.put_u32(48000);
        v1.put_u64(96000);
        let (ts1, dur1) = parse_mvhd(&v1).unwrap();
        assert_eq!(ts1, 48000);
        assert_eq!(dur1, 96000);
    }

    #[test]
    fn hdlr_reads_fourcc_at_offset_8() {
        let mut body = fullbox(0);
        body.extend_from_slice(&[0u8; 4]); // predefined
        body.extend_from_slice(b"vide");
        assert_eq!(parse_hdlr(&body).unwrap(), HandlerType::Video);
    }

    #[test]
    fn stts_entry_overflow_is_malformed() {
        let mut body = fullbox(0);
        body.put_u32(1000); // claims 1000 entries
        body.extend_from_slice(&[0u8; 8]);
        assert!(matches!(parse_stts(&body), Err(Error::MalformedBox { .. })));
    }

    #[test]
    fn ctts_version_one_offset_is_signed() {
        let mut body = fullbox(1);
        body.put_u32(1);
        body.put_u32(1);
        body.put_i32(-512);
        let entries = parse_ctts(&body).unwrap();
        assert_eq!(entries[0], (1, -512));
    }

    #[test]
    fn ctts_version_zero_large_offset_stays_positive() {
        let mut body = fullbox(0);
        body.put_u32(1);
        body.put_u32(1);
        body.put_u32(0x8000_0100); // would read as a large negative if cast as i32
        let entries = parse_ctts(&body).unwrap();
        assert!(entries[0].1 >= 0, "version-0 offset must never decode as negative");
    }

    #[test]
    fn stsd_rejects_unsupported_codec() {
        let mut stsd_body = BytesMut::new();
        stsd_body.put_u8(0);
        stsd_body.put_u8(0);
        stsd_body.put_u8(0);
        stsd_body.put_u8(0);
        stsd_body.put_u32(1); // entry count
        stsd_body.put_u32(16); // entry size
        stsd_body.extend_from_slice(b"s263");
        stsd_body.extend_from_slice(&[0u8; 8]);

        let mut data = BytesMut::new();
        data.put_u32(8 + stsd_body.len() as u32);
        data.extend_from_slice(b"stsd");
        data.extend_from_slice(&stsd_body);

        let atom = atom::scan(&data, 0, data.len() as u64).unwrap().remove(0);
        assert!(matches!(parse_stsd(&data, &atom), Err(Error::UnsupportedCodec(_))));
    }
}
