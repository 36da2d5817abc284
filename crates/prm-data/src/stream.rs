//! Record and batch streams over delimited input files.
//!
//! A [`RecordStream`] reads one file in one of three [`StreamMode`]s. Training
//! reads its inputs [`StreamMode::Forever`] and relies on the epoch budget to
//! stop; prediction reads the test file [`StreamMode::Once`] and stops on
//! [`DataError::StreamExhausted`].
//!
//! # Example
//!
//! ```no_run
//! use prm_data::stream::{BatchStream, StreamMode};
//!
//! let mut stream = BatchStream::open("test.txt", b'|', StreamMode::Once, 512).unwrap();
//! while let Some(batch) = stream.next() {
//!     let batch = batch.unwrap();
//!     println!("{} rows", batch.len());
//! }
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, trace};

use crate::batch::Batch;
use crate::error::{DataError, Result};
use crate::record::RawRecord;

/// How many times a stream reads its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// A single pass.
    Once,
    /// Exactly `n` passes.
    Repeat(usize),
    /// Unbounded; the consumer decides when to stop.
    Forever,
}

impl StreamMode {
    fn permits_pass(self, completed: usize) -> bool {
        match self {
            StreamMode::Once => completed < 1,
            StreamMode::Repeat(n) => completed < n,
            StreamMode::Forever => true,
        }
    }
}

/// Reads [`RawRecord`]s from a delimited file, reopening it between passes.
pub struct RecordStream {
    path: PathBuf,
    delimiter: u8,
    mode: StreamMode,
    reader: Option<csv::Reader<File>>,
    completed_passes: usize,
    records_in_pass: u64,
    row: StringRecord,
}

impl RecordStream {
    /// Opens `path` and positions the stream at its first record.
    ///
    /// # Arguments
    ///
    /// * `path` - The delimited input file
    /// * `delimiter` - Field separator, normally `b'|'`
    /// * `mode` - How many passes to make over the file
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, delimiter: u8, mode: StreamMode) -> Result<Self> {
        let mut stream = Self {
            path: path.as_ref().to_path_buf(),
            delimiter,
            mode,
            reader: None,
            completed_passes: 0,
            records_in_pass: 0,
            row: StringRecord::new(),
        };
        if mode.permits_pass(0) {
            stream.reader = Some(stream.open_reader()?);
        }
        Ok(stream)
    }

    /// Returns the source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of passes that have reached end of file.
    pub fn completed_passes(&self) -> usize {
        self.completed_passes
    }

    fn open_reader(&self) -> Result<csv::Reader<File>> {
        let file = File::open(&self.path).map_err(|source| DataError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .quoting(false)
            .flexible(true)
            .from_reader(file))
    }

    /// Returns the next record, or `None` once every permitted pass is done.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MalformedRecord`] for a bad row and
    /// [`DataError::EmptySource`] when a repeating stream finds no rows at all.
    pub fn next_record(&mut self) -> Result<Option<RawRecord>> {
        loop {
            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => return Ok(None),
            };

            let has_row = reader
                .read_record(&mut self.row)
                .map_err(|source| DataError::Csv {
                    path: self.path.clone(),
                    source,
                })?;

            if has_row {
                let line = self.row.position().map_or(0, |pos| pos.line());
                self.records_in_pass += 1;
                return RawRecord::from_fields(&self.row, line).map(Some);
            }

            self.completed_passes += 1;
            let empty_pass = self.records_in_pass == 0;
            trace!(
                path = %self.path.display(),
                pass = self.completed_passes,
                records = self.records_in_pass,
                "Reached end of input"
            );
            self.records_in_pass = 0;
            self.reader = None;

            if !self.mode.permits_pass(self.completed_passes) {
                return Ok(None);
            }
            if empty_pass {
                return Err(DataError::EmptySource {
                    path: self.path.clone(),
                });
            }
            debug!(path = %self.path.display(), pass = self.completed_passes + 1, "Rewinding input");
            self.reader = Some(self.open_reader()?);
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Groups a [`RecordStream`] into [`Batch`]es of a fixed size.
///
/// Every batch has exactly `batch_size` records except the last batch of a
/// finite stream, which may be partial. After that batch,
/// [`BatchStream::next_batch`] returns [`DataError::StreamExhausted`].
pub struct BatchStream {
    records: RecordStream,
    batch_size: usize,
    finished: bool,
    batches: u64,
}

impl BatchStream {
    /// Wraps a record stream.
    pub fn new(records: RecordStream, batch_size: usize) -> Self {
        Self {
            records,
            batch_size,
            finished: false,
            batches: 0,
        }
    }

    /// Opens a file and batches it.
    pub fn open(
        path: impl AsRef<Path>,
        delimiter: u8,
        mode: StreamMode,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self::new(RecordStream::open(path, delimiter, mode)?, batch_size))
    }

    /// Returns the configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns how many batches have been produced.
    pub fn batches_emitted(&self) -> u64 {
        self.batches
    }

    /// Returns the next batch.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::StreamExhausted`] once the source is used up, or
    /// any decoding error from the underlying record stream.
    pub fn next_batch(&mut self) -> Result<Batch> {
        if self.finished || self.batch_size == 0 {
            return Err(DataError::StreamExhausted);
        }

        let mut records = Vec::with_capacity(self.batch_size);
        while records.len() < self.batch_size {
            match self.records.next_record()? {
                Some(record) => records.push(record),
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if records.is_empty() {
            return Err(DataError::StreamExhausted);
        }
        self.batches += 1;
        let batch = Batch::new(records, self.batch_size);
        if batch.is_partial() {
            debug!(
                path = %self.records.path().display(),
                rows = batch.len(),
                batch_size = self.batch_size,
                "Final partial batch"
            );
        }
        Ok(batch)
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(batch) => Some(Ok(batch)),
            Err(DataError::StreamExhausted) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
