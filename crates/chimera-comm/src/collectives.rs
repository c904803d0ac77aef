//! Gathers, broadcasts, and scatters on the process group

use crate::error::{CommError, Result};
use crate::group::ProcessGroup;
use crate::linear::range_for_worker;
use crate::message::{pod_bytes, pod_from_bytes, Pod};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

impl ProcessGroup {
    // --- gathers ---

    /// All-gather one value per rank, in rank order.
    pub fn gather<T: Pod>(&self, value: T) -> Result<Vec<T>> {
        let rows = self.gatherv(std::slice::from_ref(&value))?;
        rows.into_iter()
            .map(|row| {
                row.into_iter().next().ok_or_else(|| {
                    CommError::Invariant("a rank contributed nothing to a gather".into())
                })
            })
            .collect()
    }

    /// Gather one value per rank to the root; `None` elsewhere.
    pub fn gather_to<T: Pod>(&self, value: T, root: usize) -> Result<Option<Vec<T>>> {
        let rows = self.gatherv_to(std::slice::from_ref(&value), root)?;
        match rows {
            None => Ok(None),
            Some(rows) => Ok(Some(
                rows.into_iter()
                    .map(|row| {
                        row.into_iter().next().ok_or_else(|| {
                            CommError::Invariant("a rank contributed nothing to a gather".into())
                        })
                    })
                    .collect::<Result<Vec<T>>>()?,
            )),
        }
    }

    /// All-gather a variable-length sequence per rank.
    pub fn gatherv<T: Pod>(&self, values: &[T]) -> Result<Vec<Vec<T>>> {
        let rows = self.gatherv_to(values, 0)?;
        let flat = match rows {
            Some(rows) => {
                let mut msg = crate::message::Message::new();
                msg.pack(rows.len() as i32);
                for row in &rows {
                    msg.pack_slice(row)?;
                }
                msg.into_bytes()
            }
            None => Vec::new(),
        };
        let bytes = self.transport().bcast(flat, 0)?;
        let mut msg = crate::message::Message::from_bytes(bytes);
        let n = msg.unpack::<i32>()?;
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            out.push(msg.unpack_vec::<T>()?);
        }
        Ok(out)
    }

    pub fn gatherv_to<T: Pod>(&self, values: &[T], root: usize) -> Result<Option<Vec<Vec<T>>>> {
        let rows = self.transport().gatherv(&pod_bytes(values), root)?;
        match rows {
            None => Ok(None),
            Some(rows) => Ok(Some(
                rows.iter()
                    .map(|row| pod_from_bytes::<T>(row))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }

    /// All-gather a set per rank.
    pub fn gather_sets<T: Pod + Ord>(&self, set: &BTreeSet<T>) -> Result<Vec<BTreeSet<T>>> {
        let as_vec: Vec<T> = set.iter().copied().collect();
        Ok(self
            .gatherv(&as_vec)?
            .into_iter()
            .map(|row| row.into_iter().collect())
            .collect())
    }

    /// Gather map entries whose ids fall in `[start, end)` to `target_rank`,
    /// densely indexed by `id - start`.
    pub fn gather_by_ordinal_range<T: Pod + Default>(
        &self,
        input: &BTreeMap<i64, T>,
        start: i64,
        end: i64,
        target_rank: usize,
    ) -> Result<Option<Vec<T>>> {
        let mut ids = Vec::new();
        let mut things = Vec::new();
        for (&id, &value) in input.range(start..end) {
            ids.push(id);
            things.push(value);
        }
        let gathered_ids = self.gatherv_to(&ids, target_rank)?;
        let gathered_things = self.gatherv_to(&things, target_rank)?;
        match (gathered_ids, gathered_things) {
            (Some(all_ids), Some(all_things)) => {
                let mut out = vec![T::default(); (end - start) as usize];
                for (row_ids, row_things) in all_ids.iter().zip(&all_things) {
                    for (&id, &thing) in row_ids.iter().zip(row_things) {
                        out[(id - start) as usize] = thing;
                    }
                }
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }

    /// Root assembles the dense `stride * (max_gid + 1)` result ordered by
    /// global id; when two ranks supply the same slot, the later-arriving
    /// rank wins, so callers must supply disjoint ids.
    pub fn gather_and_sort<T: Pod + Default>(
        &self,
        values: &[T],
        stride: usize,
        gids: &[i64],
        root: usize,
    ) -> Result<Option<Vec<T>>> {
        if stride == 0 || values.len() / stride != gids.len() || values.len() % stride != 0 {
            return Err(CommError::Configuration(format!(
                "gather-and-sort requires {} values per id, got {} values for {} ids",
                stride,
                values.len(),
                gids.len()
            )));
        }
        let objects_from_ranks = self.gatherv_to(values, root)?;
        let gids_from_ranks = self.gatherv_to(gids, root)?;
        let (objects_from_ranks, gids_from_ranks) = match (objects_from_ranks, gids_from_ranks) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(None),
        };
        let max_gid = gids_from_ranks
            .iter()
            .flatten()
            .copied()
            .max()
            .unwrap_or(-1);
        let mut output = vec![T::default(); stride * (max_gid + 1) as usize];
        for (row_gids, row_objects) in gids_from_ranks.iter().zip(&objects_from_ranks) {
            for (i, &gid) in row_gids.iter().enumerate() {
                for k in 0..stride {
                    output[stride * gid as usize + k] = row_objects[stride * i + k];
                }
            }
        }
        Ok(Some(output))
    }

    /// As `gather_and_sort`, with the dense result broadcast to every rank.
    pub fn gather_and_sort_all<T: Pod + Default>(
        &self,
        values: &[T],
        stride: usize,
        gids: &[i64],
    ) -> Result<Vec<T>> {
        let mut out = self.gather_and_sort(values, stride, gids, 0)?.unwrap_or_default();
        self.broadcast_vec(&mut out, 0)?;
        Ok(out)
    }

    // --- broadcasts ---

    pub fn broadcast<T: Pod>(&self, value: &mut T, root: usize) -> Result<()> {
        let payload = if self.rank() == root {
            pod_bytes(std::slice::from_ref(value))
        } else {
            Vec::new()
        };
        let bytes = self.transport().bcast(payload, root)?;
        if bytes.len() != T::SIZE {
            return Err(CommError::Invariant(format!(
                "broadcast expected {} bytes, received {}",
                T::SIZE,
                bytes.len()
            )));
        }
        *value = T::read_from(&bytes);
        Ok(())
    }

    pub fn broadcast_vec<T: Pod>(&self, values: &mut Vec<T>, root: usize) -> Result<()> {
        let payload = if self.rank() == root {
            pod_bytes(values)
        } else {
            Vec::new()
        };
        let bytes = self.transport().bcast(payload, root)?;
        *values = pod_from_bytes(&bytes)?;
        Ok(())
    }

    pub fn broadcast_string(&self, s: &mut String, root: usize) -> Result<()> {
        let payload = if self.rank() == root {
            s.as_bytes().to_vec()
        } else {
            Vec::new()
        };
        let bytes = self.transport().bcast(payload, root)?;
        *s = String::from_utf8(bytes)
            .map_err(|e| CommError::Invariant(format!("broadcast string is not utf-8: {e}")))?;
        Ok(())
    }

    /// Booleans travel as an i32, matching the transport's scalar set.
    pub fn broadcast_bool(&self, value: &mut bool, root: usize) -> Result<()> {
        let mut as_int = *value as i32;
        self.broadcast(&mut as_int, root)?;
        *value = as_int != 0;
        Ok(())
    }

    pub fn broadcast_set<T: Pod + Ord>(&self, set: &mut BTreeSet<T>, root: usize) -> Result<()> {
        let mut as_vec: Vec<T> = set.iter().copied().collect();
        self.broadcast_vec(&mut as_vec, root)?;
        *set = as_vec.into_iter().collect();
        Ok(())
    }

    pub fn broadcast_map<K: Pod + Ord, V: Pod>(
        &self,
        map: &mut BTreeMap<K, V>,
        root: usize,
    ) -> Result<()> {
        let mut entries: Vec<(K, V)> = map.iter().map(|(&k, &v)| (k, v)).collect();
        self.broadcast_vec(&mut entries, root)?;
        *map = entries.into_iter().collect();
        Ok(())
    }

    pub fn broadcast_hash_map<K: Pod + Eq + Hash, V: Pod>(
        &self,
        map: &mut HashMap<K, V>,
        root: usize,
    ) -> Result<()> {
        let mut entries: Vec<(K, V)> = map.iter().map(|(&k, &v)| (k, v)).collect();
        self.broadcast_vec(&mut entries, root)?;
        *map = entries.into_iter().collect();
        Ok(())
    }

    // --- scatters ---

    /// Root supplies one value per rank; every rank receives its own.
    pub fn scatter<T: Pod>(&self, values: Option<&[T]>, root: usize) -> Result<T> {
        let rows = if self.rank() == root {
            let values = values.ok_or_else(|| {
                CommError::Configuration("scatter root must supply one value per rank".into())
            })?;
            if values.len() != self.size() {
                return Err(CommError::Configuration(format!(
                    "scatter expected {} values, got {}",
                    self.size(),
                    values.len()
                )));
            }
            Some(
                values
                    .iter()
                    .map(|v| pod_bytes(std::slice::from_ref(v)))
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };
        let bytes = self.transport().scatterv(rows.as_deref(), root)?;
        if bytes.len() != T::SIZE {
            return Err(CommError::Invariant(format!(
                "scatter expected {} bytes, received {}",
                T::SIZE,
                bytes.len()
            )));
        }
        Ok(T::read_from(&bytes))
    }

    /// Root supplies one row per rank.
    pub fn scatterv<T: Pod>(&self, rows: Option<&[Vec<T>]>, root: usize) -> Result<Vec<T>> {
        let byte_rows = if self.rank() == root {
            let rows = rows.ok_or_else(|| {
                CommError::Configuration("scatter root must supply one row per rank".into())
            })?;
            Some(rows.iter().map(|row| pod_bytes(row)).collect::<Vec<_>>())
        } else {
            None
        };
        pod_from_bytes(&self.transport().scatterv(byte_rows.as_deref(), root)?)
    }

    /// Root splits a flat sequence as evenly as the length allows.
    pub fn scatter_even<T: Pod>(&self, values: Option<&[T]>, root: usize) -> Result<Vec<T>> {
        let rows = if self.rank() == root {
            let values = values.ok_or_else(|| {
                CommError::Configuration("scatter root must supply the sequence".into())
            })?;
            let total = values.len() as i64;
            let mut rows = Vec::with_capacity(self.size());
            for worker in 0..self.size() {
                let range = range_for_worker(worker as i64, total, self.size() as i64);
                rows.push(values[range.start as usize..range.end as usize].to_vec());
            }
            Some(rows)
        } else {
            None
        };
        self.scatterv(rows.as_deref(), root)
    }
}
