//! `esds` AudioSpecificConfig extraction and 7-byte ADTS header framing.

use crate::error::{Error, Result};

/// Walks one ISO/IEC 14496-1 descriptor: tag byte, then an expandable
/// length (each length byte's high bit signals another length byte
/// follows). Returns the descriptor's tag, body, and the position just
/// past it.
fn read_descriptor<'a>(data: &'a [u8], mut pos: usize) -> Result<(u8, &'a [u8], usize)> {
    let tag = *data
        .get(pos)
        .ok_or_else(|| Error::truncated(None, Some(pos as u64), 1, 0))?;
    pos += 1;

    let mut len = 0usize;
    loop {
        let b = *data
            .get(pos)
            .ok_or_else(|| Error::truncated(None, Some(pos as u64), 1, 0))?;
        pos += 1;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }

    let body = data
        .get(pos..pos + len)
        .ok_or_else(|| Error::truncated(None, Some(pos as u64), len, data.len().saturating_sub(pos)))?;

    Ok((tag, body, pos + len))
}

const ES_DESCR_TAG: u8 = 0x03;
const DECODER_CONFIG_DESCR_TAG: u8 = 0x04;
const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;

/// `AudioSpecificConfig` (ISO/IEC 14496-3 §1.6.2): object type, sampling
/// frequency index, and channel configuration, however deeply they're
/// nested inside the `esds` box's descriptor tree.
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sampling_freq_index: u8,
    pub channel_config: u8,
}

impl AudioSpecificConfig {
    pub fn parse(esds_body: &[u8]) -> Result<Self> {
        // version/flags full-box header.
        let (tag, es_descr, _) = read_descriptor(esds_body, 4)?;
        if tag != ES_DESCR_TAG {
            return Err(Error::malformed(Some(*b"esds"), None, "expected ES_Descriptor"));
        }

        let mut pos = 3usize; // ES_ID(2) + flags(1)
        let flags = *es_descr
            .get(2)
            .ok_or_else(|| Error::truncated(Some(*b"esds"), None, 3, es_descr.len()))?;
        if flags & 0x80 != 0 {
            pos += 2; // dependsOn_ES_ID
        }
        if flags & 0x40 != 0 {
            let url_len = *es_descr.get(pos).unwrap_or(&0) as usize;
            pos += 1 + url_len;
        }
        if flags & 0x20 != 0 {
            pos += 2; // OCR_ES_Id
        }

        let (tag, dec_config, _) = read_descriptor(es_descr, pos)?;
        if tag != DECODER_CONFIG_DESCR_TAG {
            return Err(Error::malformed(Some(*b"esds"), None, "expected DecoderConfigDescriptor"));
        }

        // objectTypeIndication(1) + streamType/upStream/reserved(1) + bufferSizeDB(3) + maxBitrate(4) + avgBitrate(4)
        let (tag, dsi, _) = read_descriptor(dec_config, 13)?;
        if tag != DECODER_SPECIFIC_INFO_TAG {
            return Err(Error::malformed(Some(*b"esds"), None, "expected DecoderSpecificInfo"));
        }

        if dsi.len() < 2 {
            return Err(Error::truncated(Some(*b"esds"), None, 2, dsi.len()));
        }

        let object_type = dsi[0] >> 3;
        let sampling_freq_index = ((dsi[0] & 0x07) << 1) | (dsi[1] >> 7);
        let channel_config = (dsi[1] >> 3) & 0x0F;

        Ok(Self { object_type, sampling_freq_index, channel_config })
    }
}

/// Appends a 7-byte ADTS header (no CRC) followed by `payload`.
pub fn write_adts_frame(out: &mut Vec<u8>, payload: &[u8], codec_data: &[u8]) -> Result<()> {
    let config = AudioSpecificConfig::parse(codec_data)?;
    let profile = config.object_type.saturating_sub(1);
    let frame_length = 7 + payload.len() as u32;

    let header = [
        0xFF,
        0xF1,
        (profile << 6) | (config.sampling_freq_index << 2) | (config.channel_config >> 2),
        ((config.channel_config & 0x03) << 6) as u8 | ((frame_length >> 11) & 0x03) as u8,
        ((frame_length >> 3) & 0xFF) as u8,
        (((frame_length & 0x07) << 5) as u8) | 0x1F,
        0xFC,
    ];

    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn sample_esds() -> Vec<u8> {
        let mut dsi = BytesMut::new();
        // AAC-LC (object_type=2), 44100Hz (index 4), stereo (channel_config=2)
        let object_type = 2u8;
        let sampling_freq_index = 4u8;
        let channel_config = 2u8;
        dsi.put_u8((object_type << 3) | (sampling_freq_index >> 1));
        dsi.put_u8(((sampling_freq_index & 0x01) << 7) | (channel_config << 3));

        let mut dec_config = BytesMut::new();
        dec_config.put_u8(0x40); // objectTypeIndication (AAC)
        dec_config.put_u8(0x15);
        dec_config.extend_from_slice(&[0, 0, 0]); // bufferSizeDB
        dec_config.put_u32(128_000); // maxBitrate
        dec_config.put_u32(128_000); // avgBitrate
        dec_config.put_u8(DECODER_SPECIFIC_INFO_TAG);
        dec_config.put_u8(dsi.len() as u8);
        dec_config.extend_from_slice(&dsi);

        let mut es_descr = BytesMut::new();
        es_descr.put_u16(1); // ES_ID
        es_descr.put_u8(0x00); // flags
        es_descr.put_u8(DECODER_CONFIG_DESCR_TAG);
        es_descr.put_u8(dec_config.len() as u8);
        es_descr.extend_from_slice(&dec_config);

        let mut esds = BytesMut::new();
        esds.extend_from_slice(&[0, 0, 0, 0]); // version/flags
        esds.put_u8(ES_DESCR_TAG);
        esds.put_u8(es_descr.len() as u8);
        esds.extend_from_slice(&es_descr);

        esds.to_vec()
    }

    #[test]
    fn parses_audio_specific_config_through_nested_descriptors() {
        let config = AudioSpecificConfig::parse(&sample_esds()).unwrap();
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sampling_freq_index, 4);
        assert_eq!(config.channel_config, 2);
    }

    #[test]
    fn adts_header_is_seven_bytes_with_syncword() {
        let mut out = Vec::new();
        write_adts_frame(&mut out, &[0u8; 100], &sample_esds()).unwrap();
        assert_eq!(out[0], 0xFF);
        assert_eq!(out[1] & 0xF0, 0xF0);
        assert_eq!(out.len(), 107);
    }
}
