//! Top-level orchestration: memory-maps a source file, parses its `moov`,
//! and exposes the resolved tracks and segment list.

use std::fs::File;
use std::path::Path;

use memmap2::{Advice, Mmap};

use crate::atom::{self, AtomType};
use crate::error::{Error, Result};
use crate::moov::{self, ParsedTrack};
use crate::segment::{Segment, SegmentSelector};

pub struct Mp4File {
    mmap: Mmap,
    pub timescale: u32,
    pub duration: u64,
    pub video: Option<ParsedTrack>,
    pub audio: Option<ParsedTrack>,
}

impl Mp4File {
    /// Maps `path` and parses its movie box. `target_seconds` drives the
    /// segment-boundary spacing applied to the video track's sample index.
    pub fn open(path: &Path, target_seconds: f64) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let _ = mmap.advise(Advice::Sequential);

        let data: &[u8] = &mmap;
        let top_level = atom::scan(data, 0, data.len() as u64)?;

        let moov_atom = top_level
            .iter()
            .find(|a| a.atom_type == AtomType::MOOV)
            .ok_or(Error::NoMovieOrMedia("moov"))?;

        if !top_level.iter().any(|a| a.atom_type == AtomType::MDAT) {
            return Err(Error::NoMovieOrMedia("mdat"));
        }

        let parsed = moov::parse_moov(data, moov_atom)?;
        let timescale = parsed.timescale;
        let duration = parsed.duration;

        let mut video = parsed.tracks.iter().find(|t| t.handler.is_video()).cloned();
        let audio = parsed.tracks.into_iter().find(|t| t.handler.is_audio());

        if let Some(video_track) = video.as_mut() {
            let target_ticks = (target_seconds * video_track.timescale as f64).round() as u64;
            video_track.sample_table.mark_segment_boundaries(target_ticks.max(1));
        }

        Ok(Self { mmap, timescale, duration, video, audio })
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    pub fn segments(&self) -> Vec<Segment> {
        let Some(video) = &self.video else { return Vec::new() };
        let selector = SegmentSelector::new(
            &video.sample_table,
            self.audio.as_ref().map(|a| (&a.sample_table, a.timescale)),
            video.timescale,
            video.duration,
        );
        selector.build()
    }

    /// Slices the raw bytes for one sample directly out of the mapped file.
    pub fn sample_bytes(&self, track: &ParsedTrack, sample_index: u32) -> Result<&[u8]> {
        let entry = track
            .sample_table
            .get(sample_index)
            .ok_or(Error::SegmentNotFound { sample_index: sample_index as u64, sample_count: track.sample_table.sample_count })?;

        let start = entry.file_offset as usize;
        let end = start + entry.size as usize;
        self.mmap.get(start..end).ok_or_else(|| {
            Error::truncated(None, Some(entry.file_offset), entry.size as usize, self.mmap.len().saturating_sub(start))
        })
    }
}
