//! Top-level request handling: combines the parsed [`Mp4File`], segment
//! selection, the playlist writer, and the TS packetiser into the two
//! outcomes the HLS surface serves. [`crate::dispatch`] only parses the
//! query string; this module does the work the parsed options name.

use crate::dispatch::RequestOptions;
use crate::error::{Error, Result};
use crate::moov::ParsedTrack;
use crate::mp4file::Mp4File;
use crate::playlist;
use crate::sink::OutputSink;
use crate::ts::{self, TsSample};

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Which surface a request path names, decided purely by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Playlist,
    Segment,
}

impl RequestKind {
    pub fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".m3u8") {
            Some(Self::Playlist)
        } else if path.ends_with(".hls") {
            Some(Self::Segment)
        } else {
            None
        }
    }
}

/// A resolved response body, ready for the host to render with its own
/// content-type/status mapping.
pub enum DispatchOutcome {
    Playlist(String),
    Segment(OutputSink),
}

fn ticks_to_90k(ticks: u64, timescale: u32) -> u64 {
    (ticks as u128 * 90_000 / timescale.max(1) as u128) as u64
}

/// Resolves one request end to end against an already-opened source: selects
/// the segment named by `kind`/`options` and renders or packetises it.
pub fn dispatch_request(
    mp4: &Mp4File,
    stem: &str,
    kind: RequestKind,
    options: &RequestOptions,
    passthrough_query: &str,
) -> Result<DispatchOutcome> {
    let segments = mp4.segments();

    match kind {
        RequestKind::Playlist => Ok(DispatchOutcome::Playlist(playlist::render_media_playlist(
            stem,
            &segments,
            passthrough_query,
        ))),
        RequestKind::Segment => {
            let video = mp4.video.as_ref().ok_or(Error::NoMovieOrMedia("trak"))?;
            let video_sample = options.video_sample.unwrap_or(0) as u32;
            let segment = crate::segment::segment_for_sample(&segments, video_sample, video.sample_table.sample_count)?;

            // `audio=<track id>` restricts output to the named track; absent,
            // the sole audio track (if any) is used. No multi-audio playlists
            // exist to pick among.
            let audio = mp4
                .audio
                .as_ref()
                .filter(|a| options.audio_sample.map(|id| id as u32 == a.track_id).unwrap_or(true));

            let video_samples = collect_samples(mp4, video, segment.video_start_sample, segment.video_end_sample)?;
            let audio_samples = match (audio, segment.audio_start_sample, segment.audio_end_sample) {
                (Some(track), Some(start), Some(end)) => collect_samples(mp4, track, start, end)?,
                _ => Vec::new(),
            };
            let audio_track = audio.filter(|_| !audio_samples.is_empty());

            let ts_bytes = ts::mux_segment(video, audio_track, &video_samples, &audio_samples)?;

            let mut sink = OutputSink::new();
            sink.push(ts_bytes);
            Ok(DispatchOutcome::Segment(sink))
        }
    }
}

fn collect_samples<'a>(mp4: &'a Mp4File, track: &ParsedTrack, start: u32, end: u32) -> Result<Vec<TsSample<'a>>> {
    let mut samples = Vec::with_capacity((end.saturating_sub(start)) as usize);
    for index in start..end {
        let entry = track.sample_table.get(index).ok_or(Error::SegmentNotFound {
            sample_index: index as u64,
            sample_count: track.sample_table.sample_count,
        })?;
        let data = mp4.sample_bytes(track, index)?;
        samples.push(TsSample {
            pts_90k: ticks_to_90k(entry.pts(), track.timescale),
            dts_90k: ticks_to_90k(entry.dts, track.timescale),
            data,
        });
    }
    Ok(samples)
}
