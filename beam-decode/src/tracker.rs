//! Bookkeeping for which instances still occupy rows of the batched tensors.
//!
//! Every batched tensor carried across decode steps has a leading dimension of
//! `active * beam_size`: one contiguous block of `beam_size` rows per active
//! instance, blocks ordered like the active list. When instances finish their
//! blocks are dropped and the survivors are packed densely again. Rows inside a
//! block are never reordered.

use std::collections::HashMap;

use ndarray::{Array, ArrayBase, Axis, Data, RemoveAxis};

use crate::error::{DecodeError, Result};

/// Instance id -> block position for the instances still in the batch.
#[derive(Clone, Debug)]
pub struct ActiveInstanceTracker {
    beam_size: usize,
    active: Vec<usize>,
    positions: HashMap<usize, usize>,
}

impl ActiveInstanceTracker {
    /// Track instances `0..n_inst`, all active.
    pub fn new(n_inst: usize, beam_size: usize) -> Self {
        let active: Vec<usize> = (0..n_inst).collect();
        let positions = position_map(&active);
        Self {
            beam_size,
            active,
            positions,
        }
    }

    pub fn active(&self) -> &[usize] {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn beam_size(&self) -> usize {
        self.beam_size
    }

    pub fn position(&self, inst: usize) -> Option<usize> {
        self.positions.get(&inst).copied()
    }

    /// Plan the gather that keeps only `survivors`, in that order.
    pub fn compaction(&self, survivors: &[usize]) -> Result<Compaction> {
        let mut rows = Vec::with_capacity(survivors.len() * self.beam_size);
        for &inst in survivors {
            let pos = self
                .position(inst)
                .ok_or(DecodeError::UnknownInstance(inst))?;
            rows.extend(pos * self.beam_size..(pos + 1) * self.beam_size);
        }
        Ok(Compaction {
            prev_rows: self.active.len() * self.beam_size,
            rows,
            survivors: survivors.to_vec(),
        })
    }

    /// Adopt the survivor ordering of an applied compaction.
    pub fn commit(&mut self, plan: Compaction) {
        self.positions = position_map(&plan.survivors);
        self.active = plan.survivors;
    }
}

/// A gather along axis 0 shared by every tensor compacted in one step.
#[derive(Clone, Debug)]
pub struct Compaction {
    prev_rows: usize,
    rows: Vec<usize>,
    survivors: Vec<usize>,
}

impl Compaction {
    pub fn survivors(&self) -> &[usize] {
        &self.survivors
    }

    /// Source row for each output row.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn apply<A, S, D>(&self, tensor: &ArrayBase<S, D>) -> Result<Array<A, D>>
    where
        A: Copy,
        S: Data<Elem = A>,
        D: RemoveAxis,
    {
        let got = tensor.len_of(Axis(0));
        if got != self.prev_rows {
            return Err(DecodeError::ShapeMismatch {
                context: "compacted tensor rows",
                expected: self.prev_rows,
                got,
            });
        }
        Ok(tensor.select(Axis(0), &self.rows))
    }
}

/// Position of each id in `ids`.
pub fn position_map(ids: &[usize]) -> HashMap<usize, usize> {
    ids.iter().enumerate().map(|(pos, &id)| (id, pos)).collect()
}

/// Repeat every row `times` times in place, so row `i` becomes rows
/// `i * times .. (i + 1) * times`.
pub fn repeat_rows<A, S, D>(tensor: &ArrayBase<S, D>, times: usize) -> Array<A, D>
where
    A: Copy,
    S: Data<Elem = A>,
    D: RemoveAxis,
{
    let rows: Vec<usize> = (0..tensor.len_of(Axis(0)))
        .flat_map(|i| std::iter::repeat(i).take(times))
        .collect();
    tensor.select(Axis(0), &rows)
}
