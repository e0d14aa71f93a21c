//! Per-sample index: decode time, composition offset, size, file offset,
//! sync flag, and segment-boundary flag, materialised from the compact
//! `stts`/`stsc`/`stsz`/`stco`/`ctts`/`stss` tables.

use std::collections::HashSet;

/// One resolved sample row.
#[derive(Debug, Clone, Copy)]
pub struct SampleEntry {
    /// Sample index, 0-based.
    pub index: u32,
    /// Absolute file offset of the sample's data.
    pub file_offset: u64,
    pub size: u32,
    /// Decode timestamp in the track's media ticks.
    pub dts: u64,
    /// Composition offset; may be negative for version-1 `ctts`.
    pub cts_offset: i32,
    /// Independently-decodable (keyframe).
    pub is_sync: bool,
    /// A sync sample that begins an HLS segment boundary (or the track's
    /// terminal sample, for range closure).
    pub is_segment_boundary: bool,
}

impl SampleEntry {
    /// Presentation timestamp; clamped to 0 (dts + cts_offset never surfaces negative).
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Resolved per-track sample index. Sorted by sample index, which is
/// naturally sorted by `dts`.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub sample_count: u32,
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    pub fn builder() -> SampleTableBuilder {
        SampleTableBuilder::new()
    }

    pub fn get(&self, index: u32) -> Option<&SampleEntry> {
        self.samples.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleEntry> {
        self.samples.iter()
    }

    pub fn keyframe_indices(&self) -> Vec<u32> {
        self.samples.iter().filter(|s| s.is_sync).map(|s| s.index).collect()
    }

    pub fn find_keyframe_at_or_before(&self, index: u32) -> Option<u32> {
        for i in (0..=index.min(self.sample_count.saturating_sub(1))).rev() {
            if let Some(sample) = self.samples.get(i as usize) {
                if sample.is_sync {
                    return Some(i);
                }
            }
        }
        None
    }

    /// Indices of every sample marked `is_segment_boundary`, in order.
    pub fn segment_boundary_indices(&self) -> Vec<u32> {
        self.samples.iter().filter(|s| s.is_segment_boundary).map(|s| s.index).collect()
    }

    /// Second indexer pass: marks the first sync sample at or after each
    /// `target_ticks`-wide window as a segment boundary. The first sync
    /// sample is always a boundary; the last sample is always a terminal
    /// boundary for range-closure, sync or not.
    pub fn mark_segment_boundaries(&mut self, target_ticks: u64) {
        if self.samples.is_empty() {
            return;
        }

        let mut found_first = false;
        let mut next_threshold = 0u64;

        for sample in self.samples.iter_mut() {
            if !sample.is_sync {
                continue;
            }
            if !found_first {
                sample.is_segment_boundary = true;
                found_first = true;
                next_threshold = sample.dts + target_ticks;
                continue;
            }
            if sample.dts >= next_threshold {
                sample.is_segment_boundary = true;
                next_threshold = sample.dts + target_ticks;
            }
        }

        if let Some(last) = self.samples.last_mut() {
            last.is_segment_boundary = true;
        }
    }
}

/// Accumulates the raw compact-table entries, then resolves them into a
/// flat per-sample array in one pass.
#[derive(Default)]
pub struct SampleTableBuilder {
    stts_entries: Vec<(u32, u32)>,
    sync_samples: Vec<u32>,
    stsc_entries: Vec<(u32, u32, u32)>,
    uniform_size: u32,
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    ctts_entries: Vec<(u32, i32)>,
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts_entries = entries;
    }

    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = samples;
    }

    pub fn set_stsc(&mut self, entries: Vec<(u32, u32, u32)>) {
        self.stsc_entries = entries;
    }

    pub fn set_stsz(&mut self, uniform_size: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.sample_sizes = sizes;
    }

    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts_entries = entries;
    }

    #[tracing::instrument(skip(self))]
    pub fn build(self) -> SampleTable {
        let sample_count = if self.uniform_size > 0 {
            self.sample_sizes.len().max(self.total_stts_samples()) as u32
        } else {
            self.sample_sizes.len() as u32
        };

        if sample_count == 0 {
            return SampleTable::default();
        }

        let sample_chunks = self.resolve_sample_chunks(sample_count);
        let offsets = self.resolve_offsets(&sample_chunks, sample_count);
        let dts_values = self.resolve_timestamps(sample_count);
        let cts_offsets = self.resolve_cts_offsets(sample_count);
        let sync_set: HashSet<u32> = self.sync_samples.iter().copied().collect();

        let mut samples = Vec::with_capacity(sample_count as usize);
        for i in 0..sample_count {
            let size = if self.uniform_size > 0 {
                self.uniform_size
            } else {
                self.sample_sizes.get(i as usize).copied().unwrap_or(0)
            };

            let is_sync = self.sync_samples.is_empty() || sync_set.contains(&(i + 1));

            samples.push(SampleEntry {
                index: i,
                file_offset: offsets.get(i as usize).copied().unwrap_or(0),
                size,
                dts: dts_values.get(i as usize).copied().unwrap_or(0),
                cts_offset: cts_offsets.get(i as usize).copied().unwrap_or(0),
                is_sync,
                is_segment_boundary: false,
            });
        }

        tracing::debug!(sample_count, "built sample index");

        SampleTable { sample_count, samples }
    }

    fn total_stts_samples(&self) -> usize {
        self.stts_entries.iter().map(|(count, _)| *count as usize).sum()
    }

    fn resolve_sample_chunks(&self, sample_count: u32) -> Vec<u32> {
        if self.stsc_entries.is_empty() {
            return vec![0; sample_count as usize];
        }

        let mut result = Vec::with_capacity(sample_count as usize);
        let mut sample_idx = 0u32;
        let num_chunks = self.chunk_offsets.len() as u32;

        for i in 0..self.stsc_entries.len() {
            let (first_chunk, samples_per_chunk, _) = self.stsc_entries[i];
            let next_first = if i + 1 < self.stsc_entries.len() {
                self.stsc_entries[i + 1].0
            } else {
                num_chunks + 1
            };

            for chunk in first_chunk..next_first {
                if chunk > num_chunks {
                    break;
                }
                for _ in 0..samples_per_chunk {
                    if sample_idx >= sample_count {
                        break;
                    }
                    result.push(chunk - 1);
                    sample_idx += 1;
                }
            }
        }

        while (result.len() as u32) < sample_count {
            result.push(result.last().copied().unwrap_or(0));
        }

        result
    }

    fn resolve_offsets(&self, sample_chunks: &[u32], sample_count: u32) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(sample_count as usize);
        let mut chunk_running = vec![0u64; self.chunk_offsets.len()];

        for i in 0..sample_count as usize {
            let chunk_idx = sample_chunks.get(i).copied().unwrap_or(0) as usize;
            let chunk_base = self.chunk_offsets.get(chunk_idx).copied().unwrap_or(0);
            let offset = chunk_base + chunk_running.get(chunk_idx).copied().unwrap_or(0);
            offsets.push(offset);

            let size = if self.uniform_size > 0 {
                self.uniform_size
            } else {
                self.sample_sizes.get(i).copied().unwrap_or(0)
            };

            if chunk_idx < chunk_running.len() {
                chunk_running[chunk_idx] += size as u64;
            }
        }

        offsets
    }

    fn resolve_timestamps(&self, sample_count: u32) -> Vec<u64> {
        let mut dts_values = Vec::with_capacity(sample_count as usize);
        let mut current_dts = 0u64;
        let mut sample_idx = 0u32;

        for (count, delta) in &self.stts_entries {
            for _ in 0..*count {
                if sample_idx >= sample_count {
                    break;
                }
                dts_values.push(current_dts);
                current_dts += *delta as u64;
                sample_idx += 1;
            }
        }

        let last_delta = self.stts_entries.last().map(|(_, d)| *d).unwrap_or(1);
        while (dts_values.len() as u32) < sample_count {
            dts_values.push(current_dts);
            current_dts += last_delta as u64;
        }

        dts_values
    }

    fn resolve_cts_offsets(&self, sample_count: u32) -> Vec<i32> {
        if self.ctts_entries.is_empty() {
            return vec![0; sample_count as usize];
        }

        let mut offsets = Vec::with_capacity(sample_count as usize);
        for (count, offset) in &self.ctts_entries {
            for _ in 0..*count {
                if offsets.len() >= sample_count as usize {
                    break;
                }
                offsets.push(*offset);
            }
        }

        while (offsets.len() as u32) < sample_count {
            offsets.push(0);
        }

        offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_clamps_negative_composition_to_zero() {
        let sample = SampleEntry {
            index: 0,
            file_offset: 0,
            size: 10,
            dts: 100,
            cts_offset: -200,
            is_sync: true,
            is_segment_boundary: false,
        };
        assert_eq!(sample.pts(), 0);
    }

    #[test]
    fn resolves_offsets_sizes_and_sync_flags() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(3, 1000)]);
        builder.set_sync_samples(vec![1]);
        builder.set_stsc(vec![(1, 3, 1)]);
        builder.set_stsz(0, vec![100, 200, 150]);
        builder.set_chunk_offsets(vec![1000]);

        let table = builder.build();
        assert_eq!(table.sample_count, 3);
        assert_eq!(table.samples[0].file_offset, 1000);
        assert_eq!(table.samples[1].file_offset, 1100);
        assert_eq!(table.samples[2].file_offset, 1300);
        assert!(table.samples[0].is_sync);
        assert!(!table.samples[1].is_sync);
    }

    #[test]
    fn no_stss_means_every_sample_is_sync() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(4, 1000)]);
        builder.set_stsc(vec![(1, 4, 1)]);
        builder.set_stsz(100, vec![]);
        builder.set_chunk_offsets(vec![0]);

        let table = builder.build();
        assert!(table.samples.iter().all(|s| s.is_sync));
    }

    #[test]
    fn ctts_version_specific_sign_is_caller_responsibility() {
        // The builder just stores whatever cts_offset the caller resolved;
        // version-0-vs-1 sign handling happens in the moov parser.
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(2, 1000)]);
        builder.set_stsc(vec![(1, 2, 1)]);
        builder.set_stsz(100, vec![]);
        builder.set_chunk_offsets(vec![0]);
        builder.set_ctts(vec![(1, -512), (1, 0)]);

        let table = builder.build();
        assert_eq!(table.samples[0].cts_offset, -512);
        assert_eq!(table.samples[0].pts(), 488);
    }

    #[test]
    fn mark_segment_boundaries_hits_first_last_and_target_spacing() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(30, 1000)]); // 30 samples, 1000 ticks each
        builder.set_sync_samples(vec![1, 11, 21]); // keyframes at 0, 10, 20
        builder.set_stsc(vec![(1, 30, 1)]);
        builder.set_stsz(1000, vec![]);
        builder.set_chunk_offsets(vec![0]);

        let mut table = builder.build();
        table.mark_segment_boundaries(9000); // 9 seconds-equivalent of ticks

        let boundaries = table.segment_boundary_indices();
        assert_eq!(boundaries, vec![0, 10, 29]);
        assert!(table.samples[29].is_segment_boundary);
    }
}
