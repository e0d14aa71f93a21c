//! `#EXTM3U` media playlist rendering.

use std::fmt::Write as _;

use crate::segment::Segment;

/// Renders the on-demand media playlist for one variant.
///
/// `stem` is the URL-safe basename the dispatcher rewrites requests
/// against (e.g. `movie`, for segment URLs shaped `movie.hls?...`).
/// `passthrough_query` is the original request's query string forwarded
/// verbatim onto every segment URL, sans the `video=`/`audio=` keys this
/// writer sets itself.
pub fn render_media_playlist(stem: &str, segments: &[Segment], passthrough_query: &str) -> String {
    let target_duration = segments
        .iter()
        .map(|s| s.duration_secs.ceil() as u64)
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(out, "#EXTM3U");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{target_duration}");
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:0");
    let _ = writeln!(out, "#EXT-X-VERSION:4");

    for segment in segments {
        let duration_ms = (segment.duration_secs * 1000.0).round() / 1000.0;
        let _ = writeln!(out, "#EXTINF:{duration_ms:.3},");

        let mut url = format!("{stem}.hls?video={}", segment.video_start_sample);
        if let Some(audio_start) = segment.audio_start_sample {
            let _ = write!(url, "&audio={audio_start}");
        }
        if !passthrough_query.is_empty() {
            let _ = write!(url, "&{passthrough_query}");
        }
        let _ = writeln!(out, "{url}");
    }

    let _ = writeln!(out, "#EXT-X-ENDLIST");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: u32, start: u32, end: u32, duration: f64) -> Segment {
        Segment {
            index,
            video_start_sample: start,
            video_end_sample: end,
            audio_start_sample: Some(start * 3),
            audio_end_sample: Some(end * 3),
            start_time_secs: 0.0,
            duration_secs: duration,
        }
    }

    #[test]
    fn renders_header_and_endlist() {
        let segments = vec![segment(0, 0, 10, 9.5), segment(1, 10, 20, 8.2)];
        let playlist = render_media_playlist("movie", &segments, "");

        assert!(playlist.starts_with("#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-VERSION:4\n"));
        assert!(playlist.contains("#EXT-X-TARGETDURATION:10"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
        assert!(playlist.trim_end().ends_with("#EXT-X-ENDLIST"));
    }

    #[test]
    fn segment_urls_carry_sample_index_and_passthrough_query() {
        let segments = vec![segment(0, 0, 10, 9.5)];
        let playlist = render_media_playlist("movie", &segments, "hash=abc123");

        assert!(playlist.contains("movie.hls?video=0&audio=0&hash=abc123"));
    }

    #[test]
    fn extinf_uses_millisecond_precision() {
        let segments = vec![segment(0, 0, 10, 9.123456)];
        let playlist = render_media_playlist("movie", &segments, "");
        assert!(playlist.contains("#EXTINF:9.123,"));
    }
}
