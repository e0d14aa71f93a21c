//! Keyframe-aligned segment selection across the video and audio tracks.

use crate::error::{Error, Result};
use crate::sample_table::SampleTable;

/// One HLS segment's sample range on both tracks.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u32,
    pub video_start_sample: u32,
    /// Exclusive.
    pub video_end_sample: u32,
    pub audio_start_sample: Option<u32>,
    /// Exclusive.
    pub audio_end_sample: Option<u32>,
    pub start_time_secs: f64,
    pub duration_secs: f64,
}

impl Segment {
    pub fn video_sample_count(&self) -> u32 {
        self.video_end_sample - self.video_start_sample
    }

    pub fn audio_sample_count(&self) -> Option<u32> {
        self.audio_start_sample
            .zip(self.audio_end_sample)
            .map(|(start, end)| end - start)
    }
}

/// Splits a video track into segments at its precomputed boundaries, and for
/// each one selects the overlapping audio range by dts.
pub struct SegmentSelector<'a> {
    video: &'a SampleTable,
    audio: Option<&'a SampleTable>,
    video_timescale: u32,
    audio_timescale: u32,
    video_duration_ticks: u64,
}

impl<'a> SegmentSelector<'a> {
    pub fn new(
        video: &'a SampleTable,
        audio: Option<(&'a SampleTable, u32)>,
        video_timescale: u32,
        video_duration_ticks: u64,
    ) -> Self {
        let (audio_table, audio_timescale) = match audio {
            Some((table, ts)) => (Some(table), ts),
            None => (None, 0),
        };
        Self { video, audio: audio_table, video_timescale, audio_timescale, video_duration_ticks }
    }

    /// Builds the full segment list: a segment starts at each sync sample
    /// marked `is_segment_boundary` and runs to the next one, or to end of
    /// track for the last segment. The terminal `is_segment_boundary` mark
    /// that `SampleTable::mark_segment_boundaries` forces onto the final
    /// sample (sync or not) only matters for range closure, not as a new
    /// segment start, so non-sync marks are excluded here.
    #[tracing::instrument(skip(self))]
    pub fn build(&self) -> Vec<Segment> {
        let starts: Vec<u32> = self
            .video
            .samples
            .iter()
            .filter(|s| s.is_segment_boundary && s.is_sync)
            .map(|s| s.index)
            .collect();

        if starts.is_empty() {
            return Vec::new();
        }

        let sample_count = self.video.sample_count;
        let mut segments = Vec::with_capacity(starts.len());

        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(sample_count);
            segments.push(self.build_one(i as u32, start, end));
        }

        tracing::debug!(segment_count = segments.len(), "selected segments");

        segments
    }

    fn build_one(&self, index: u32, start: u32, end: u32) -> Segment {
        let start_dts = self.video.get(start).map(|s| s.dts).unwrap_or(0);
        let end_dts = self
            .video
            .get(end)
            .map(|s| s.dts)
            .unwrap_or(self.video_duration_ticks.max(start_dts));

        let duration_ticks = end_dts.saturating_sub(start_dts);
        let timescale = self.video_timescale.max(1) as f64;

        let (audio_start_sample, audio_end_sample) = match self.audio {
            Some(audio) => self.select_audio_range(audio, start_dts, end_dts),
            None => (None, None),
        };

        Segment {
            index,
            video_start_sample: start,
            video_end_sample: end,
            audio_start_sample,
            audio_end_sample,
            start_time_secs: start_dts as f64 / timescale,
            duration_secs: duration_ticks as f64 / timescale,
        }
    }

    /// Audio samples whose dts falls in `[video_dts_start, video_dts_end)` once
    /// both bounds are converted from the video track's timescale into the
    /// audio track's. 64-bit arithmetic, truncation toward zero.
    fn select_audio_range(&self, audio: &SampleTable, video_dts_start: u64, video_dts_end: u64) -> (Option<u32>, Option<u32>) {
        if audio.samples.is_empty() {
            return (None, None);
        }

        let audio_dts_start = rescale_ticks(video_dts_start, self.video_timescale, self.audio_timescale);
        let audio_dts_end = rescale_ticks(video_dts_end, self.video_timescale, self.audio_timescale);

        let mut start_idx = None;
        let mut end_idx = audio.sample_count;

        for sample in audio.iter() {
            if start_idx.is_none() && sample.dts >= audio_dts_start {
                start_idx = Some(sample.index);
            }
            if sample.dts >= audio_dts_end {
                end_idx = sample.index;
                break;
            }
        }

        match start_idx {
            Some(start) => (Some(start), Some(end_idx.max(start))),
            None => (None, None),
        }
    }

    pub fn find_at_time(&self, segments: &[Segment], time_secs: f64) -> Option<usize> {
        segments
            .iter()
            .position(|s| time_secs >= s.start_time_secs && time_secs < s.start_time_secs + s.duration_secs)
            .or_else(|| segments.last().map(|_| segments.len() - 1))
    }
}

/// Converts a tick value from `from_timescale` ticks/sec to `to_timescale`
/// ticks/sec. 64-bit arithmetic with truncation toward zero.
fn rescale_ticks(ticks: u64, from_timescale: u32, to_timescale: u32) -> u64 {
    if from_timescale == 0 || to_timescale == 0 {
        return ticks;
    }
    (ticks as u128 * to_timescale as u128 / from_timescale as u128) as u64
}

/// Resolves the segment whose video range contains `sample_index`, erroring
/// with `SegmentNotFound` when `sample_index` is out of range.
pub fn segment_for_sample(segments: &[Segment], sample_index: u32, sample_count: u32) -> Result<&Segment> {
    segments
        .iter()
        .find(|s| sample_index >= s.video_start_sample && sample_index < s.video_end_sample)
        .ok_or(Error::SegmentNotFound { sample_index: sample_index as u64, sample_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_table::SampleTableBuilder;

    fn video_table() -> SampleTable {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(30, 3000)]); // 90000 timescale, 1/30s frames
        builder.set_sync_samples(vec![1, 11, 21]);
        builder.set_stsc(vec![(1, 30, 1)]);
        builder.set_stsz(1000, vec![]);
        builder.set_chunk_offsets(vec![0]);
        let mut table = builder.build();
        table.mark_segment_boundaries(27000); // ~9 seconds of ticks at 90kHz-ish
        table
    }

    fn audio_table() -> SampleTable {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(90, 1000)]); // finer-grained audio frames
        builder.set_stsc(vec![(1, 90, 1)]);
        builder.set_stsz(200, vec![]);
        builder.set_chunk_offsets(vec![0]);
        builder.build()
    }

    #[test]
    fn segments_split_at_marked_boundaries() {
        let video = video_table();
        let total_ticks = video.samples.last().unwrap().dts + 3000;
        let selector = SegmentSelector::new(&video, None, 90000, total_ticks);
        let segments = selector.build();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].video_start_sample, 0);
        assert_eq!(segments[0].video_end_sample, 10);
        assert_eq!(segments[1].video_start_sample, 10);
        assert_eq!(segments[2].video_start_sample, 20);
        assert_eq!(segments[2].video_end_sample, 30);
    }

    #[test]
    fn audio_range_overlaps_by_dts() {
        let video = video_table();
        let audio = audio_table();
        let total_ticks = video.samples.last().unwrap().dts + 3000;
        let selector = SegmentSelector::new(&video, Some((&audio, 90000)), 90000, total_ticks);
        let segments = selector.build();
        let first = &segments[0];
        assert!(first.audio_start_sample.is_some());
        assert!(first.audio_sample_count().unwrap() > 0);
    }

    #[test]
    fn audio_range_rescales_across_mismatched_timescales() {
        // Video runs at a 90000 timescale; audio at a real-world 48000 clock.
        // A naive comparison of raw dts ticks would put every 48kHz audio
        // sample "before" the 90kHz video window and starve later segments.
        let video = video_table(); // first boundary window: dts in [0, 27000)
        let mut audio_builder = SampleTableBuilder::new();
        audio_builder.set_stts(vec![(200, 1024)]); // ~21.3ms frames at 48kHz
        audio_builder.set_stsc(vec![(1, 200, 1)]);
        audio_builder.set_stsz(200, vec![]);
        audio_builder.set_chunk_offsets(vec![0]);
        let audio = audio_builder.build();

        let total_ticks = video.samples.last().unwrap().dts + 3000;
        let selector = SegmentSelector::new(&video, Some((&audio, 48000)), 90000, total_ticks);
        let segments = selector.build();

        // First video segment spans samples [0, 10), dts [0, 30000) at the
        // 90kHz video timescale. Rescaled to the 48kHz audio clock that's
        // [0, 30000*48000/90000) = [0, 16000).
        let first = &segments[0];
        let start = first.audio_start_sample.unwrap();
        let end = first.audio_end_sample.unwrap();
        for sample in &audio.samples[start as usize..end as usize] {
            assert!(sample.dts < 16000, "audio dts {} should fall before the rescaled video window", sample.dts);
        }
        // A sample well past the window must not be included.
        assert!(end < audio.sample_count);
    }

    #[test]
    fn out_of_range_sample_is_segment_not_found() {
        let video = video_table();
        let total_ticks = video.samples.last().unwrap().dts + 3000;
        let selector = SegmentSelector::new(&video, None, 90000, total_ticks);
        let segments = selector.build();
        assert!(segment_for_sample(&segments, 9999, video.sample_count).is_err());
    }
}
