//! Rectangular per-call buffers used by the generation loop.
//!
//! A [`Batch`] is a row-major 2-D array where every row is one sequence.
//! [`TokenBatch`] carries token ids and [`AttentionMask`] marks which of those
//! positions hold real tokens (`1`) rather than padding (`0`).

use crate::error::{GenerationError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    data: Vec<T>,
    batch_size: usize,
    seq_len: usize,
}

pub type TokenBatch = Batch<u32>;
pub type AttentionMask = Batch<u8>;

impl<T: Copy> Batch<T> {
    /// Builds a batch from equally long rows.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self> {
        let batch_size = rows.len();
        let seq_len = rows.first().map_or(0, Vec::len);

        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != seq_len) {
            return Err(GenerationError::Shape(format!(
                "row {} has length {}, expected {}",
                i,
                row.len(),
                seq_len
            )));
        }

        let data = rows.into_iter().flatten().collect();
        Ok(Self {
            data,
            batch_size,
            seq_len,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn is_empty(&self) -> bool {
        self.batch_size == 0
    }

    pub fn row(&self, i: usize) -> &[T] {
        let start = i * self.seq_len;
        &self.data[start..start + self.seq_len]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.batch_size).map(move |i| self.row(i))
    }

    pub fn to_rows(&self) -> Vec<Vec<T>> {
        self.rows().map(<[T]>::to_vec).collect()
    }

    /// Last element of every row, `None` when the rows are empty.
    pub fn last_column(&self) -> Option<Vec<T>> {
        if self.seq_len == 0 {
            return None;
        }
        Some(self.rows().map(|row| row[self.seq_len - 1]).collect())
    }

    /// Copies the given rows, in the given order, into a new batch.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.seq_len);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            data,
            batch_size: indices.len(),
            seq_len: self.seq_len,
        }
    }

    /// Appends one value to the end of every row.
    pub fn push_column(&mut self, column: &[T]) -> Result<()> {
        if column.len() != self.batch_size {
            return Err(GenerationError::Shape(format!(
                "cannot append a column of {} values to a batch of {} rows",
                column.len(),
                self.batch_size
            )));
        }

        let new_len = self.seq_len + 1;
        let mut data = Vec::with_capacity(self.batch_size * new_len);
        for (i, &value) in column.iter().enumerate() {
            data.extend_from_slice(self.row(i));
            data.push(value);
        }
        self.data = data;
        self.seq_len = new_len;
        Ok(())
    }
}

/// Per-row completion state for one generation call.
///
/// Entries only ever go from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedFlags(Vec<bool>);

impl FinishedFlags {
    pub fn new(batch_size: usize) -> Self {
        Self(vec![false; batch_size])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn all(&self) -> bool {
        self.0.iter().all(|&f| f)
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    /// Indices of rows that are still generating.
    pub fn active_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &finished)| if finished { None } else { Some(i) })
            .collect()
    }

    /// Writes the verdicts computed for `active` back into the full batch.
    /// Returns how many rows became finished.
    pub fn merge(&mut self, active: &[usize], verdicts: &[bool]) -> Result<usize> {
        if active.len() != verdicts.len() {
            return Err(GenerationError::Shape(format!(
                "{} verdicts for {} active rows",
                verdicts.len(),
                active.len()
            )));
        }

        let mut newly_finished = 0;
        for (&i, &done) in active.iter().zip(verdicts) {
            if done && !self.0[i] {
                self.0[i] = true;
                newly_finished += 1;
            }
        }
        Ok(newly_finished)
    }
}
