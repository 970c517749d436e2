use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::{Batch, BatchShape, BatchSource, LaneGrid, SourcedBatch};
use crate::codec::SymbolCodec;
use crate::error::{Result, TextGenError};

/// A batch from [`StreamingBatcher`] tagged with the source pass it came from.
#[derive(Debug, Clone)]
pub struct EpochBatch {
    /// The batch itself.
    pub batch: Batch,
    /// Pass over the source, starting at 1.
    pub epoch: usize,
}

/// The lane grid of the chunk currently being sliced.
#[derive(Debug)]
struct ChunkSlices {
    grid: LaneGrid,
    next_index: usize,
    epoch: usize,
}

/// Batch stream over a source too large to hold in memory.
///
/// The source is read `max_chunk_bytes` at a time. Each chunk is encoded and
/// sliced on its own, with no rotation, so lane continuity breaks at chunk and
/// epoch boundaries. The epoch is reported with every batch; consumers must
/// reset recurrent state whenever it changes.
///
/// Peak memory is `O(max_chunk_bytes)`: a chunk's buffers are dropped before
/// the next chunk is read.
#[derive(Debug)]
pub struct StreamingBatcher<R> {
    source: R,
    codec: SymbolCodec,
    shape: BatchShape,
    max_chunk_bytes: u64,
    total_size: u64,
    effective_end: u64,
    cursor: u64,
    epoch: usize,
    current: Option<ChunkSlices>,
    last_pulled_epoch: usize,
}

impl StreamingBatcher<BufReader<File>> {
    /// Opens a text file as a streaming source.
    pub fn open<P: AsRef<Path>>(path: P, max_chunk_bytes: usize, shape: BatchShape) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file), max_chunk_bytes, shape)
    }
}

impl<R: Read + Seek> StreamingBatcher<R> {
    /// Wraps a seekable source. The source is rewound to its start.
    pub fn new(mut source: R, max_chunk_bytes: usize, shape: BatchShape) -> Result<Self> {
        shape.validate()?;
        if max_chunk_bytes == 0 {
            return Err(TextGenError::Config("max_chunk_bytes must be positive".into()));
        }
        let max_chunk_bytes = max_chunk_bytes as u64;
        let total_size = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        let effective_end = total_size - total_size % max_chunk_bytes;

        log::debug!(
            "streaming source: {} bytes, chunk {} bytes, effective end {}",
            total_size,
            max_chunk_bytes,
            effective_end
        );

        Ok(Self {
            source,
            codec: SymbolCodec::new(),
            shape,
            max_chunk_bytes,
            total_size,
            effective_end,
            cursor: 0,
            epoch: 0,
            current: None,
            last_pulled_epoch: 0,
        })
    }

    /// Size of the source in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Start of the discarded tail: `total_size - total_size % max_chunk_bytes`.
    pub fn effective_end(&self) -> u64 {
        self.effective_end
    }

    /// Batches produced by one full pass, assuming one byte per character.
    ///
    /// Exact for ASCII sources; multi-byte characters make chunks decode to
    /// fewer symbols than bytes.
    pub fn batches_per_pass(&self) -> usize {
        let mut position = 0u64;
        let mut batches = 0;
        loop {
            let len = self.max_chunk_bytes.min(self.total_size - position);
            batches += self.shape.num_batches(len as usize);
            position += len;
            if position + self.max_chunk_bytes > self.effective_end {
                return batches;
            }
        }
    }

    /// Reads, encodes and lays out the next chunk.
    ///
    /// The previous chunk must already be released, so at most one chunk's
    /// buffers are alive while reading.
    fn load_chunk(&mut self) -> Result<()> {
        debug_assert!(
            self.current.is_none(),
            "previous chunk still held while reading the next"
        );
        // Back at the start of the source: a new epoch begins.
        if self.cursor == 0 {
            self.epoch += 1;
            log::debug!("streaming source: now in epoch {}", self.epoch);
        }

        let encoded = {
            let mut raw = Vec::with_capacity(self.max_chunk_bytes as usize);
            (&mut self.source)
                .take(self.max_chunk_bytes)
                .read_to_end(&mut raw)?;
            self.cursor += raw.len() as u64;
            log::debug!("streaming source: read chunk of {} bytes", raw.len());

            // Within one chunk of the effective end: wrap instead of reading a ragged tail.
            if self.cursor + self.max_chunk_bytes > self.effective_end {
                self.source.seek(SeekFrom::Start(0))?;
                self.cursor = 0;
            }

            // A multi-byte character split by the chunk edge decodes to unknown ids.
            let text = String::from_utf8_lossy(&raw);
            self.codec.encode(&text)
        };

        let grid = LaneGrid::new(
            encoded,
            self.shape,
            "use a smaller batch size or sequence length, or a larger max_chunk_bytes",
        )?;
        self.current = Some(ChunkSlices {
            grid,
            next_index: 0,
            epoch: self.epoch,
        });
        Ok(())
    }

    fn next_batch(&mut self) -> Result<EpochBatch> {
        loop {
            if let Some(chunk) = self.current.as_mut() {
                if chunk.next_index < chunk.grid.num_batches() {
                    let batch = chunk.grid.slice(chunk.next_index, 0)?;
                    chunk.next_index += 1;
                    return Ok(EpochBatch {
                        batch,
                        epoch: chunk.epoch,
                    });
                }
            }
            // Release the exhausted chunk before reading the next one.
            self.current = None;
            self.load_chunk()?;
        }
    }
}

impl<R: Read + Seek> Iterator for StreamingBatcher<R> {
    type Item = Result<EpochBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

impl<R: Read + Seek> BatchSource for StreamingBatcher<R> {
    fn pull(&mut self) -> Result<SourcedBatch> {
        let EpochBatch { batch, epoch } = self.next_batch()?;
        let reset_state = epoch != self.last_pulled_epoch;
        self.last_pulled_epoch = epoch;
        Ok(SourcedBatch { batch, reset_state })
    }
}
