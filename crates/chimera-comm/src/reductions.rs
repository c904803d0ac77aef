//! Reductions over the process group
//!
//! The generic `reduce` carries the operator as a per-call closure threaded
//! through the transport; there is no process-wide operator state, so
//! concurrent reductions on different groups are safe.

use crate::error::{CommError, Result};
use crate::group::ProcessGroup;
use crate::message::{pod_bytes, pod_from_bytes, Pod};
use num_complex::Complex64;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Add;

impl ProcessGroup {
    /// All-reduce a single value with an arbitrary binary operator.
    pub fn reduce<T, F>(&self, value: T, op: F) -> Result<T>
    where
        T: Pod,
        F: Fn(T, T) -> T + Sync,
    {
        let reduced = self.reduce_vec(std::slice::from_ref(&value), op)?;
        reduced
            .into_iter()
            .next()
            .ok_or_else(|| CommError::Invariant("reduction produced no result".into()))
    }

    /// Element-wise all-reduce of a sequence; every rank must supply the
    /// same length.
    pub fn reduce_vec<T, F>(&self, values: &[T], op: F) -> Result<Vec<T>>
    where
        T: Pod,
        F: Fn(T, T) -> T + Sync,
    {
        let bytes = pod_bytes(values);
        let combine = |a: &[u8], b: &mut [u8]| {
            let left = T::read_from(a);
            let right = T::read_from(b);
            let mut folded = Vec::with_capacity(T::SIZE);
            op(left, right).write_to(&mut folded);
            b.copy_from_slice(&folded);
        };
        let reduced = self.transport().allreduce(&bytes, T::SIZE, &combine)?;
        pod_from_bytes(&reduced)
    }

    pub fn parallel_sum<T>(&self, value: T) -> Result<T>
    where
        T: Pod + Add<Output = T>,
    {
        self.reduce(value, |a, b| a + b)
    }

    pub fn parallel_min<T>(&self, value: T) -> Result<T>
    where
        T: Pod + PartialOrd,
    {
        self.reduce(value, |a, b| if a < b { a } else { b })
    }

    pub fn parallel_max<T>(&self, value: T) -> Result<T>
    where
        T: Pod + PartialOrd,
    {
        self.reduce(value, |a, b| if a > b { a } else { b })
    }

    /// The rank holding the maximum value; the lowest such rank on ties.
    pub fn parallel_rank_of_max<T>(&self, value: T) -> Result<usize>
    where
        T: Pod + PartialOrd,
    {
        let pair = (value, self.rank() as i32);
        let winner = self.reduce(pair, |a, b| {
            if a.0 > b.0 || (!(a.0 < b.0) && a.1 < b.1) {
                a
            } else {
                b
            }
        })?;
        Ok(winner.1 as usize)
    }

    /// True on every rank if any rank contributed true.
    pub fn parallel_or(&self, value: bool) -> Result<bool> {
        Ok(self.parallel_sum(value as i32)? != 0)
    }

    /// True on every rank only if every rank contributed true.
    pub fn parallel_and(&self, value: bool) -> Result<bool> {
        Ok(self.parallel_sum(value as i32)? == self.size() as i32)
    }

    /// Element-wise sum of same-length sequences.
    pub fn elemental_sum<T>(&self, values: &[T]) -> Result<Vec<T>>
    where
        T: Pod + Add<Output = T>,
    {
        self.reduce_vec(values, |a, b| a + b)
    }

    /// Element-wise max of same-length sequences.
    pub fn elemental_max<T>(&self, values: &[T]) -> Result<Vec<T>>
    where
        T: Pod + PartialOrd,
    {
        self.reduce_vec(values, |a, b| if a > b { a } else { b })
    }

    /// Complex sum, reduced component-wise.
    pub fn parallel_sum_complex(&self, value: Complex64) -> Result<Complex64> {
        let re = self.parallel_sum(value.re)?;
        let im = self.parallel_sum(value.im)?;
        Ok(Complex64::new(re, im))
    }

    pub fn parallel_average(&self, value: f64) -> Result<f64> {
        Ok(self.parallel_sum(value)? / self.size() as f64)
    }

    /// Union of every rank's set, on every rank.
    pub fn parallel_union<T>(&self, set: &BTreeSet<T>) -> Result<BTreeSet<T>>
    where
        T: Pod + Ord,
    {
        let all = self.gather_sets(set)?;
        Ok(all.into_iter().flatten().collect())
    }

    /// Forward each id's contribution to its owner, sum there, echo the
    /// totals back. Every contributor ends with the full sum for its ids.
    pub fn sum_at_id<Id, S, F>(
        &self,
        contributions: &BTreeMap<Id, S>,
        owner_of: F,
    ) -> Result<BTreeMap<Id, S>>
    where
        Id: Pod + Ord,
        S: Pod + Add<Output = S>,
        F: Fn(Id) -> usize,
    {
        let mut for_owners: Vec<Vec<(Id, S)>> = vec![Vec::new(); self.size()];
        for (&id, &value) in contributions {
            let owner = owner_of(id);
            if owner >= self.size() {
                return Err(CommError::Range(owner as u64));
            }
            for_owners[owner].push((id, value));
        }
        let incoming = self.exchange(for_owners)?;

        let mut sums: BTreeMap<Id, S> = BTreeMap::new();
        for row in &incoming {
            for &(id, value) in row {
                match sums.get(&id) {
                    Some(&current) => sums.insert(id, current + value),
                    None => sums.insert(id, value),
                };
            }
        }

        let mut echoes: Vec<Vec<(Id, S)>> = vec![Vec::new(); self.size()];
        for (rank, row) in incoming.iter().enumerate() {
            for &(id, _) in row {
                let total = sums
                    .get(&id)
                    .copied()
                    .ok_or_else(|| CommError::NotFound("summed id went missing".into()))?;
                echoes[rank].push((id, total));
            }
        }
        let returned = self.exchange(echoes)?;
        Ok(returned.into_iter().flatten().collect())
    }
}
