//! Query-string request dispatch.
//!
//! A pure parser for the `?video=&audio=&length=&hash=` options a host
//! passes through from the rewritten `.hls`/`.m3u8` request path. Grounded
//! in the nginx module's `mp4_split_options_set`-style query parsing: known
//! keys populate typed fields, unknown keys are ignored rather than
//! rejected, and anything that isn't a plain relative option (an absolute
//! URL snuck into a value) is a hard `BadRequest`.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub video_sample: Option<u64>,
    pub audio_sample: Option<u64>,
    pub length: Option<u64>,
    pub hash: Option<String>,
}

/// Parses a request's raw query string (no leading `?`) into typed options.
pub fn parse_query(query: &str) -> Result<RequestOptions> {
    let mut options = RequestOptions::default();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode(value)?;

        if value.contains("://") {
            return Err(Error::bad_request(format!("option {key} must not be an absolute URL")));
        }

        match key {
            "video" => options.video_sample = Some(parse_u64(key, &value)?),
            "audio" => options.audio_sample = Some(parse_u64(key, &value)?),
            "length" => options.length = Some(parse_u64(key, &value)?),
            "hash" => options.hash = Some(value),
            _ => {} // unrecognised options are ignored, not rejected
        }
    }

    Ok(options)
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|_| Error::bad_request(format!("option {key} is not a valid integer: {value}")))
}

/// Minimal `%XX` percent-decoding; query values here are small integers and
/// opaque hashes, never needing full UTF-8 validation beyond this.
fn percent_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .ok_or_else(|| Error::bad_request("truncated percent-encoding"))?;
                let hex_str =
                    std::str::from_utf8(hex).map_err(|_| Error::bad_request("invalid percent-encoding"))?;
                let byte = u8::from_str_radix(hex_str, 16).map_err(|_| Error::bad_request("invalid percent-encoding"))?;
                out.push(byte);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| Error::bad_request("query value is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys() {
        let options = parse_query("video=120&audio=64&length=9&hash=abc123").unwrap();
        assert_eq!(options.video_sample, Some(120));
        assert_eq!(options.audio_sample, Some(64));
        assert_eq!(options.length, Some(9));
        assert_eq!(options.hash.as_deref(), Some("abc123"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let options = parse_query("video=1&future_flag=yes").unwrap();
        assert_eq!(options.video_sample, Some(1));
    }

    #[test]
    fn non_integer_value_is_bad_request() {
        assert!(matches!(parse_query("video=abc"), Err(Error::BadRequest(_))));
    }

    #[test]
    fn absolute_url_value_is_bad_request() {
        assert!(matches!(parse_query("hash=http://evil.example/x"), Err(Error::BadRequest(_))));
    }

    #[test]
    fn percent_encoded_hash_decodes() {
        let options = parse_query("hash=ab%2Bcd").unwrap();
        assert_eq!(options.hash.as_deref(), Some("ab+cd"));
    }
}
