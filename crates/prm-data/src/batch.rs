//! Fixed-size groups of records.

use crate::record::RawRecord;

/// A batch of decoded records.
///
/// A batch holds at most `capacity` records. Only the last batch of a finite
/// stream can hold fewer; [`Batch::is_partial`] reports that case.
#[derive(Debug, Clone)]
pub struct Batch {
    records: Vec<RawRecord>,
    capacity: usize,
}

impl Batch {
    /// Creates a batch from its records and the configured batch size.
    ///
    /// # Arguments
    ///
    /// * `records` - The rows of the batch, in stream order
    /// * `capacity` - The configured batch size
    pub fn new(records: Vec<RawRecord>, capacity: usize) -> Self {
        Self { records, capacity }
    }

    /// Returns the number of records in this batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if this batch contains no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the configured batch size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if the batch holds fewer records than the batch size.
    pub fn is_partial(&self) -> bool {
        self.records.len() < self.capacity
    }

    /// Returns the records in this batch.
    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    /// Consumes the batch and returns its records.
    pub fn into_records(self) -> Vec<RawRecord> {
        self.records
    }

    /// Returns an iterator over the records in this batch.
    pub fn iter(&self) -> impl Iterator<Item = &RawRecord> {
        self.records.iter()
    }
}

impl IntoIterator for Batch {
    type Item = RawRecord;
    type IntoIter = std::vec::IntoIter<RawRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a RawRecord;
    type IntoIter = std::slice::Iter<'a, RawRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
