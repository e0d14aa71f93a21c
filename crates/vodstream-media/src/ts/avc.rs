//! `avcC` decoder configuration parsing and length-prefixed-to-Annex-B NAL reframing.

use crate::bitio;
use crate::error::{Error, Result};

const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
/// `00 00 00 01 09 F0`: access unit delimiter, primary_pic_type unrestricted.
const ACCESS_UNIT_DELIMITER: [u8; 6] = [0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];

pub struct AvcDecoderConfig {
    pub nal_length_size: u8,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcDecoderConfig {
    /// Parses an `avcC` box body (ISO/IEC 14496-15 §5.2.4).
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 6 {
            return Err(Error::truncated(Some(*b"avcC"), None, 6, body.len()));
        }

        let nal_length_size = (bitio::read_u8(body, 4)? & 0x03) + 1;
        let num_sps = bitio::read_u8(body, 5)? & 0x1F;

        let mut pos = 6usize;
        let mut sps = Vec::with_capacity(num_sps as usize);
        for _ in 0..num_sps {
            let len = bitio::read_u16(body, pos)? as usize;
            pos += 2;
            let nal = body
                .get(pos..pos + len)
                .ok_or_else(|| Error::truncated(Some(*b"avcC"), Some(pos as u64), len, body.len().saturating_sub(pos)))?;
            sps.push(nal.to_vec());
            pos += len;
        }

        let num_pps = bitio::read_u8(body, pos)?;
        pos += 1;
        let mut pps = Vec::with_capacity(num_pps as usize);
        for _ in 0..num_pps {
            let len = bitio::read_u16(body, pos)? as usize;
            pos += 2;
            let nal = body
                .get(pos..pos + len)
                .ok_or_else(|| Error::truncated(Some(*b"avcC"), Some(pos as u64), len, body.len().saturating_sub(pos)))?;
            pps.push(nal.to_vec());
            pos += len;
        }

        Ok(Self { nal_length_size, sps, pps })
    }

    /// SPS followed by PPS, each with its own Annex-B start code, ready to
    /// prepend to the first access unit of a PES.
    pub fn annex_b_parameter_sets(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in self.sps.iter().chain(self.pps.iter()) {
            out.extend_from_slice(&ANNEX_B_START_CODE);
            out.extend_from_slice(nal);
        }
        out
    }
}

pub fn append_access_unit_delimiter(out: &mut Vec<u8>) {
    out.extend_from_slice(&ACCESS_UNIT_DELIMITER);
}

/// Rewrites a length-prefixed (`nal_length_size`-byte big-endian length, per
/// avcC) sample into Annex-B (start-code-prefixed) NAL units, appending into `out`.
pub fn reframe_annex_b(sample: &[u8], nal_length_size: u8, out: &mut Vec<u8>) -> Result<()> {
    let width = nal_length_size as usize;
    let mut pos = 0usize;

    while pos < sample.len() {
        if pos + width > sample.len() {
            return Err(Error::truncated(None, Some(pos as u64), width, sample.len() - pos));
        }

        let len = bitio::read_width(sample, pos, width as u8 * 8)? as usize;
        pos += width;

        let nal = sample
            .get(pos..pos + len)
            .ok_or_else(|| Error::truncated(None, Some(pos as u64), len, sample.len().saturating_sub(pos)))?;

        out.extend_from_slice(&ANNEX_B_START_CODE);
        out.extend_from_slice(nal);
        pos += len;
    }

    Ok(())
}
