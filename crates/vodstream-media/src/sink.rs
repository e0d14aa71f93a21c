//! Owned-buffer-chain output sink.
//!
//! The packetiser produces a segment as a handful of discrete buffers
//! (PAT+PMT, then one per PES). Rather than handing the host a single
//! concatenated `Vec<u8>`, the sink keeps the chain and a running content
//! length so the host can stream chunk-by-chunk without a second copy.

/// One piece of a response body. `is_final` is set on exactly the last chunk
/// of a sink, so a streaming body adapter knows when to close out.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub data: Vec<u8>,
    pub is_final: bool,
}

#[derive(Debug, Default)]
pub struct OutputSink {
    chunks: Vec<Vec<u8>>,
    content_length: u64,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: Vec<u8>) {
        self.content_length += data.len() as u64;
        if !data.is_empty() {
            self.chunks.push(data);
        }
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Consumes the sink into its chunk sequence, with `is_final` set on the
    /// last one (or on none, if the sink never received any data).
    pub fn into_chunks(self) -> Vec<OutputChunk> {
        let last_index = self.chunks.len().saturating_sub(1);
        self.chunks
            .into_iter()
            .enumerate()
            .map(|(i, data)| OutputChunk { data, is_final: i == last_index })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_accumulates_across_pushes() {
        let mut sink = OutputSink::new();
        sink.push(vec![0u8; 10]);
        sink.push(vec![0u8; 5]);
        assert_eq!(sink.content_length(), 15);
    }

    #[test]
    fn only_the_last_chunk_is_marked_final() {
        let mut sink = OutputSink::new();
        sink.push(vec![1]);
        sink.push(vec![2]);
        sink.push(vec![3]);
        let chunks = sink.into_chunks();
        assert!(!chunks[0].is_final);
        assert!(!chunks[1].is_final);
        assert!(chunks[2].is_final);
    }

    #[test]
    fn empty_pushes_are_dropped_but_still_counted() {
        let mut sink = OutputSink::new();
        sink.push(Vec::new());
        sink.push(vec![9]);
        let chunks = sink.into_chunks();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_final);
    }
}
