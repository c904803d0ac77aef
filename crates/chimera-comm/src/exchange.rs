//! All-to-all exchange and load balancing

use crate::error::{CommError, Result};
use crate::group::ProcessGroup;
use crate::message::{pod_bytes, pod_from_bytes, Message, Pod};
use std::collections::BTreeMap;

impl ProcessGroup {
    /// All-to-all: row `d` of the input goes to rank `d`; the result holds
    /// one row per source rank.
    pub fn exchange<T: Pod>(&self, stuff_for_ranks: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        if stuff_for_ranks.len() != self.size() {
            return Err(CommError::Configuration(format!(
                "exchange expected {} rows, got {}",
                self.size(),
                stuff_for_ranks.len()
            )));
        }
        let sends = stuff_for_ranks.iter().map(|row| pod_bytes(row)).collect();
        let received = self.transport().alltoallv(sends)?;
        received.iter().map(|row| pod_from_bytes(row)).collect()
    }

    /// Exchange of destination-keyed messages; ranks absent from the input
    /// receive nothing from us, and only non-empty payloads appear in the
    /// result.
    pub fn exchange_messages(
        &self,
        stuff_for_ranks: BTreeMap<usize, Message>,
    ) -> Result<BTreeMap<usize, Message>> {
        let mut sends = vec![Vec::new(); self.size()];
        for (dest, msg) in stuff_for_ranks {
            if dest >= self.size() {
                return Err(CommError::Configuration(format!(
                    "exchange destination {dest} outside group of size {}",
                    self.size()
                )));
            }
            sends[dest] = msg.into_bytes();
        }
        let received = self.transport().alltoallv(sends)?;
        Ok(received
            .into_iter()
            .enumerate()
            .filter(|(_, bytes)| !bytes.is_empty())
            .map(|(source, bytes)| (source, Message::from_bytes(bytes)))
            .collect())
    }

    /// Exchange of arbitrary packable payloads through a caller-supplied
    /// pack/unpack pair.
    pub fn exchange_map<T>(
        &self,
        stuff_for_ranks: &BTreeMap<usize, T>,
        mut pack: impl FnMut(&mut Message, &T),
        mut unpack: impl FnMut(&mut Message) -> Result<T>,
    ) -> Result<BTreeMap<usize, T>> {
        let mut messages = BTreeMap::new();
        for (&dest, payload) in stuff_for_ranks {
            let mut msg = Message::new();
            pack(&mut msg, payload);
            messages.insert(dest, msg);
        }
        let received = self.exchange_messages(messages)?;
        let mut out = BTreeMap::new();
        for (source, mut msg) in received {
            msg.finalize();
            out.insert(source, unpack(&mut msg)?);
        }
        Ok(out)
    }

    /// Exchange of destination-keyed pod sequences.
    pub fn exchange_vec_map<T: Pod>(
        &self,
        stuff_for_ranks: &BTreeMap<usize, Vec<T>>,
    ) -> Result<BTreeMap<usize, Vec<T>>> {
        let mut rows = vec![Vec::new(); self.size()];
        for (&dest, row) in stuff_for_ranks {
            if dest >= self.size() {
                return Err(CommError::Configuration(format!(
                    "exchange destination {dest} outside group of size {}",
                    self.size()
                )));
            }
            rows[dest] = row.clone();
        }
        let received = self.exchange(rows)?;
        Ok(received
            .into_iter()
            .enumerate()
            .filter(|(_, row)| !row.is_empty())
            .collect())
    }

    /// Redistribute a sequence across `[range_start, range_end)` so each of
    /// those ranks holds within one of the even share, concatenation in rank
    /// order preserved.
    pub fn balance<T: Pod>(
        &self,
        values: Vec<T>,
        range_start: usize,
        range_end: usize,
    ) -> Result<Vec<T>> {
        if range_start >= range_end || range_end > self.size() {
            return Err(CommError::Range(range_end as u64));
        }
        let num_targets = range_end - range_start;
        let counts: Vec<u64> = self.gather(values.len() as u64)?;
        let offset: u64 = counts[..self.rank()].iter().sum();
        let total: u64 = counts.iter().sum();

        let equal_counts = roughly_equal_counts(total, num_targets as u64);
        let mut send_to_ranks = vec![Vec::new(); self.size()];
        for (i, value) in values.into_iter().enumerate() {
            let gid = offset + i as u64;
            let owner = find_owner(&equal_counts, gid) + range_start;
            send_to_ranks[owner].push(value);
        }
        let incoming = self.exchange(send_to_ranks)?;
        Ok(incoming.into_iter().flatten().collect())
    }

    /// Balance across the whole group.
    pub fn balance_all<T: Pod>(&self, values: Vec<T>) -> Result<Vec<T>> {
        self.balance(values, 0, self.size())
    }
}

fn roughly_equal_counts(num_items: u64, num_buckets: u64) -> Vec<u64> {
    let equal = num_items / num_buckets;
    let remainder = num_items % num_buckets;
    (0..num_buckets)
        .map(|b| equal + u64::from(b < remainder))
        .collect()
}

fn find_owner(counts: &[u64], gid: u64) -> usize {
    let mut remaining = gid as i64;
    for (bucket, &count) in counts.iter().enumerate() {
        remaining -= count as i64;
        if remaining < 0 {
            return bucket;
        }
    }
    counts.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::spawn_group;

    #[test]
    fn test_exchange_map_scenario() {
        // rank 0 sends {1: [7, 8]}, rank 1 sends {0: [9]}; afterwards
        // rank 0 holds {1: [9]} and rank 1 holds {0: [7, 8]}
        spawn_group(2, |group| {
            let mut outgoing = BTreeMap::new();
            if group.rank() == 0 {
                outgoing.insert(1usize, vec![7i32, 8]);
            } else {
                outgoing.insert(0usize, vec![9i32]);
            }
            let incoming = group.exchange_vec_map(&outgoing).unwrap();
            if group.rank() == 0 {
                assert_eq!(incoming, BTreeMap::from([(1usize, vec![9i32])]));
            } else {
                assert_eq!(incoming, BTreeMap::from([(0usize, vec![7i32, 8])]));
            }
        });
    }

    #[test]
    fn test_exchange_vec_of_vecs() {
        spawn_group(3, |group| {
            let sends: Vec<Vec<i64>> = (0..3).map(|d| vec![(group.rank() * 10 + d) as i64]).collect();
            let received = group.exchange(sends).unwrap();
            for (source, row) in received.iter().enumerate() {
                assert_eq!(row, &vec![(source * 10 + group.rank()) as i64]);
            }
        });
    }

    #[test]
    fn test_balance_scenario() {
        // seven items on rank 0 balance to 3/2/2 in global order
        spawn_group(3, |group| {
            let mine: Vec<i32> = if group.rank() == 0 {
                vec![0, 1, 2, 3, 4, 5, 6]
            } else {
                Vec::new()
            };
            let balanced = group.balance_all(mine).unwrap();
            match group.rank() {
                0 => assert_eq!(balanced, vec![0, 1, 2]),
                1 => assert_eq!(balanced, vec![3, 4]),
                _ => assert_eq!(balanced, vec![5, 6]),
            }
        });
    }

    #[test]
    fn test_balance_bound_and_order() {
        spawn_group(3, |group| {
            let mine: Vec<i64> = (0..(group.rank() as i64 * 4)).collect();
            let total: usize = 0 + 4 + 8;
            let balanced = group.balance_all(mine).unwrap();
            let floor = total / 3;
            assert!(balanced.len() == floor || balanced.len() == floor + 1);
        });
    }

    #[test]
    fn test_balance_range_outside_group_fails() {
        spawn_group(2, |group| {
            let result = group.balance(vec![1i32], 0, 3);
            assert!(matches!(result, Err(CommError::Range(_))));
        });
    }

    #[test]
    fn test_balance_onto_subrange() {
        spawn_group(3, |group| {
            let mine: Vec<i32> = if group.rank() == 0 { (0..6).collect() } else { Vec::new() };
            let balanced = group.balance(mine, 1, 3).unwrap();
            match group.rank() {
                0 => assert!(balanced.is_empty()),
                1 => assert_eq!(balanced, vec![0, 1, 2]),
                _ => assert_eq!(balanced, vec![3, 4, 5]),
            }
        });
    }
}
