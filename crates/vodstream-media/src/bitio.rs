//! Big-endian fixed-width integer read/write helpers.
//!
//! Reads and writes operate against a caller-supplied byte slice; every
//! helper here is pure and allocation-free. 24-bit reads zero-extend into a
//! `u32`. Over-reads fail with `TruncatedBox`; an unsupported width fails
//! with `MalformedBox`.

use crate::error::{Error, Result};
use bytes::BufMut;

fn need(data: &[u8], offset: usize, width: usize) -> Result<()> {
    if offset + width > data.len() {
        return Err(Error::truncated(None, Some(offset as u64), width, data.len().saturating_sub(offset)));
    }
    Ok(())
}

pub fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    need(data, offset, 1)?;
    Ok(data[offset])
}

pub fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    need(data, offset, 2)?;
    Ok(u16::from_be_bytes([data[offset], data[offset + 1]]))
}

/// 24-bit read, zero-extended into a `u32`.
pub fn read_u24(data: &[u8], offset: usize) -> Result<u32> {
    need(data, offset, 3)?;
    Ok(u32::from_be_bytes([0, data[offset], data[offset + 1], data[offset + 2]]))
}

pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    need(data, offset, 4)?;
    Ok(u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]))
}

pub fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    need(data, offset, 8)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    Ok(u64::from_be_bytes(bytes))
}

pub fn read_i32(data: &[u8], offset: usize) -> Result<i32> {
    Ok(read_u32(data, offset)? as i32)
}

/// Width-dispatched unsigned read. `width` must be one of 8/16/24/32; any
/// other value is `MalformedBox`, not a read failure.
pub fn read_width(data: &[u8], offset: usize, width: u8) -> Result<u64> {
    match width {
        8 => read_u8(data, offset).map(u64::from),
        16 => read_u16(data, offset).map(u64::from),
        24 => read_u24(data, offset).map(u64::from),
        32 => read_u32(data, offset).map(u64::from),
        other => Err(Error::malformed(None, None, format!("unsupported integer width {other}"))),
    }
}

/// Width-dispatched unsigned write onto a growable buffer. Returns the
/// number of bytes written (the advanced cursor, in the caller's terms).
pub fn write_width(buf: &mut impl BufMut, value: u64, width: u8) -> Result<usize> {
    match width {
        8 => {
            buf.put_u8(value as u8);
            Ok(1)
        }
        16 => {
            buf.put_u16(value as u16);
            Ok(2)
        }
        24 => {
            let bytes = (value as u32).to_be_bytes();
            buf.put_slice(&bytes[1..]);
            Ok(3)
        }
        32 => {
            buf.put_u32(value as u32);
            Ok(4)
        }
        other => Err(Error::malformed(None, None, format!("unsupported integer width {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn reads_big_endian() {
        let data = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        assert_eq!(read_u8(&data, 0).unwrap(), 0x00);
        assert_eq!(read_u16(&data, 0).unwrap(), 0x0001);
        assert_eq!(read_u24(&data, 1).unwrap(), 0x000102);
        assert_eq!(read_u32(&data, 0).unwrap(), 0x00010203);
        assert_eq!(read_u64(&data, 0).unwrap(), 0x0001020304050607);
    }

    #[test]
    fn over_read_is_truncated_box() {
        let data = [0u8; 2];
        match read_u32(&data, 0) {
            Err(Error::TruncatedBox { need, have, .. }) => {
                assert_eq!(need, 4);
                assert_eq!(have, 2);
            }
            other => panic!("expected TruncatedBox, got {other:?}"),
        }
    }

    #[test]
    fn bad_width_is_malformed_box() {
        let data = [0u8; 8];
        assert!(matches!(read_width(&data, 0, 40), Err(Error::MalformedBox { .. })));
    }

    #[test]
    fn write_width_roundtrips_24_bit() {
        let mut buf = BytesMut::new();
        write_width(&mut buf, 0x00ABCDEF, 24).unwrap();
        assert_eq!(&buf[..], &[0xAB, 0xCD, 0xEF]);
        assert_eq!(read_u24(&buf, 0).unwrap(), 0x00ABCDEF);
    }
}
