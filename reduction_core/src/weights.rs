//! Weight Store: one fixed-width channel group per hashed feature index.
//!
//! The dense layout is a `2^bits x width` [`Array2`] in standard layout so a
//! group is a contiguous row. The sparse layout allocates groups on first
//! touch. Channel 0 of every group is the active parameter used by
//! prediction; the meaning of the other channels belongs to the optimizer.

use std::collections::BTreeMap;

use ndarray::Array2;

use crate::error::ModelError;
use crate::model_io::ModelBuffer;

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Dense(Array2<f32>),
    Sparse(BTreeMap<u64, Box<[f32]>>),
}

/// Channel-group table addressed by feature index.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightStore {
    width: usize,
    mask: u64,
    storage: Storage,
}

impl WeightStore {
    pub fn new(bits: u32, width: usize, sparse: bool) -> Self {
        let mask = (1u64 << bits) - 1;
        let storage = if sparse {
            Storage::Sparse(BTreeMap::new())
        } else {
            Storage::Dense(Array2::zeros(((mask + 1) as usize, width)))
        };
        Self {
            width,
            mask,
            storage,
        }
    }

    /// Channels per group; fixed for the lifetime of the store.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, Storage::Sparse(_))
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Read-only view of a group. Never allocates; a sparse index that was
    /// never touched yields `None`.
    pub fn group(&self, index: u64) -> Option<&[f32]> {
        let index = index & self.mask;
        match &self.storage {
            Storage::Dense(table) => {
                let start = index as usize * self.width;
                Some(&table.as_slice().expect("contiguous")[start..start + self.width])
            }
            Storage::Sparse(map) => map.get(&index).map(|group| &group[..]),
        }
    }

    /// Mutable group, allocated zeroed on first access in a sparse store.
    pub fn group_mut(&mut self, index: u64) -> &mut [f32] {
        let index = index & self.mask;
        let width = self.width;
        match &mut self.storage {
            Storage::Dense(table) => {
                let start = index as usize * width;
                &mut table.as_slice_mut().expect("contiguous")[start..start + width]
            }
            Storage::Sparse(map) => {
                &mut map
                    .entry(index)
                    .or_insert_with(|| vec![0.0; width].into_boxed_slice())[..]
            }
        }
    }

    /// Active parameter (channel 0), zero for an untouched index.
    pub fn param(&self, index: u64) -> f32 {
        self.group(index).map(|group| group[0]).unwrap_or(0.0)
    }

    /// Groups in ascending index order. Dense stores yield every row.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (u64, &[f32])> + '_> {
        match &self.storage {
            Storage::Dense(table) => Box::new(
                table
                    .as_slice()
                    .expect("contiguous")
                    .chunks_exact(self.width)
                    .enumerate()
                    .map(|(index, group)| (index as u64, group)),
            ),
            Storage::Sparse(map) => Box::new(map.iter().map(|(index, group)| (*index, &group[..]))),
        }
    }

    /// First index in `from..end` whose group holds a non-zero value in any
    /// channel.
    pub fn next_non_zero(&self, from: u64, end: u64) -> Option<u64> {
        let end = end.min(self.mask + 1);
        if from >= end {
            return None;
        }
        match &self.storage {
            Storage::Dense(table) => table
                .as_slice()
                .expect("contiguous")
                .chunks_exact(self.width)
                .enumerate()
                .skip(from as usize)
                .take((end - from) as usize)
                .find(|(_, group)| is_non_zero(group))
                .map(|(index, _)| index as u64),
            Storage::Sparse(map) => map
                .range(from..end)
                .find(|(_, group)| is_non_zero(group))
                .map(|(index, _)| *index),
        }
    }

    /// Indices holding at least one non-zero channel, ascending.
    pub fn non_zero_indices(&self) -> Vec<u64> {
        self.iter()
            .filter(|(_, group)| is_non_zero(group))
            .map(|(index, _)| index)
            .collect()
    }

    /// Zero every channel. Sparse stores drop their groups.
    pub fn clear(&mut self) {
        match &mut self.storage {
            Storage::Dense(table) => table.fill(0.0),
            Storage::Sparse(map) => map.clear(),
        }
    }

    /// Persist non-zero groups. With `resume` every channel is kept so that
    /// training can continue; otherwise only the active parameters are.
    /// Reading zeroes the store first.
    pub fn save_load(
        &mut self,
        buf: &mut ModelBuffer,
        read: bool,
        text: bool,
        resume: bool,
    ) -> Result<(), ModelError> {
        if read {
            self.clear();
        }

        if resume {
            let mut width = self.width as u64;
            buf.field(&mut width, "weights.width", read, text)?;
            if width as usize != self.width {
                return Err(ModelError::WidthMismatch {
                    expected: self.width,
                    found: width as usize,
                });
            }
        }

        let mut count = if read {
            0
        } else {
            self.non_zero_indices().len() as u64
        };
        buf.field(&mut count, "weights.count", read, text)?;

        if read {
            for _ in 0..count {
                if resume {
                    let (index, channels): (u64, Vec<f32>) = buf.read_model_field("weights.group")?;
                    if channels.len() != self.width {
                        return Err(ModelError::WidthMismatch {
                            expected: self.width,
                            found: channels.len(),
                        });
                    }
                    self.group_mut(index).copy_from_slice(&channels);
                } else {
                    let (index, param): (u64, f32) = buf.read_model_field("weights.param")?;
                    self.group_mut(index)[0] = param;
                }
            }
            return Ok(());
        }

        let groups: Vec<(u64, Vec<f32>)> = self
            .iter()
            .filter(|(_, group)| is_non_zero(group))
            .map(|(index, group)| (index, group.to_vec()))
            .collect();
        for (index, channels) in groups {
            if resume {
                buf.write_model_field(&(index, channels), "weights.group", text)?;
            } else {
                buf.write_model_field(&(index, channels[0]), "weights.param", text)?;
            }
        }
        Ok(())
    }
}

fn is_non_zero(group: &[f32]) -> bool {
    group.iter().any(|value| *value != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_group_is_created_on_first_touch() {
        let mut store = WeightStore::new(10, 4, true);
        assert!(store.group(7).is_none());
        store.group_mut(7)[2] = 1.5;
        assert_eq!(store.group(7), Some(&[0.0, 0.0, 1.5, 0.0][..]));
        assert_eq!(store.param(7), 0.0);
    }

    #[test]
    fn dense_indices_wrap_at_mask() {
        let mut store = WeightStore::new(4, 3, false);
        store.group_mut(16 + 3)[0] = 2.0;
        assert_eq!(store.param(3), 2.0);
    }

    #[test]
    fn next_non_zero_checks_every_channel() {
        for sparse in [false, true] {
            let mut store = WeightStore::new(8, 6, sparse);
            store.group_mut(5)[0] = 0.0;
            store.group_mut(5)[4] = 0.3;
            store.group_mut(9)[0] = 1.0;
            assert_eq!(store.next_non_zero(0, 256), Some(5));
            assert_eq!(store.next_non_zero(6, 256), Some(9));
            assert_eq!(store.next_non_zero(10, 256), None);
            assert_eq!(store.next_non_zero(0, 5), None);
        }
    }

    #[test]
    fn iteration_is_in_index_order() {
        let mut store = WeightStore::new(8, 3, true);
        for index in [40, 3, 17] {
            store.group_mut(index)[0] = index as f32;
        }
        let indices: Vec<u64> = store.iter().map(|(index, _)| index).collect();
        assert_eq!(indices, vec![3, 17, 40]);
    }

    #[test]
    fn resume_round_trip_keeps_every_channel() {
        let mut store = WeightStore::new(6, 4, false);
        store.group_mut(1).copy_from_slice(&[0.5, -1.0, 2.0, 1.0]);
        store.group_mut(33).copy_from_slice(&[0.0, 0.0, 0.0, 3.0]);

        let mut buf = ModelBuffer::new();
        store.save_load(&mut buf, false, false, true).unwrap();

        let mut restored = WeightStore::new(6, 4, false);
        restored.group_mut(2)[0] = 9.0;
        let mut reader = ModelBuffer::from_bytes(buf.into_bytes());
        restored.save_load(&mut reader, true, false, true).unwrap();
        assert_eq!(restored, store);
    }

    #[test]
    fn width_mismatch_is_reported() {
        let mut store = WeightStore::new(6, 3, true);
        store.group_mut(1)[0] = 1.0;
        let mut buf = ModelBuffer::new();
        store.save_load(&mut buf, false, false, true).unwrap();

        let mut wider = WeightStore::new(6, 6, true);
        let mut reader = ModelBuffer::from_bytes(buf.into_bytes());
        let err = wider.save_load(&mut reader, true, false, true).unwrap_err();
        assert!(matches!(err, ModelError::WidthMismatch { expected: 6, found: 3 }));
    }
}
