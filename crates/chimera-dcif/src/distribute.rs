//! Redistribution of assembled receptors across ranks
//!
//! The assembled result is chunked by a linear partition of the global node
//! id space; any rank can then request the receptors for the nodes it
//! holds from the partition's resident ranks.

use crate::error::{DcifError, Result};
use crate::flattened::{DcifReceptor, FlattenedDomainConnectivity};
use chimera_comm::linear::worker_of_id;
use chimera_comm::{Message, ProcessGroup};
use std::collections::{BTreeMap, HashMap};

/// Receptor index by global node id.
pub fn build_global_to_receptor_index(receptors: &[DcifReceptor]) -> HashMap<i64, usize> {
    receptors
        .iter()
        .enumerate()
        .map(|(i, r)| (r.gid, i))
        .collect()
}

/// The receptors whose gid falls in `[begin, end)`.
pub fn receptors_in_range(
    dcif: &FlattenedDomainConnectivity,
    begin: i64,
    end: i64,
) -> Result<Vec<DcifReceptor>> {
    let mut out = Vec::new();
    for i in 0..dcif.receptor_count() as usize {
        let receptor = dcif.receptor(i)?;
        if receptor.gid >= begin && receptor.gid < end {
            out.push(receptor);
        }
    }
    Ok(out)
}

/// Bucket receptors by the rank resident for their gid under the linear
/// partition of `[0, global_node_count)`.
pub fn map_receptors_to_ranks(
    receptors: Vec<DcifReceptor>,
    global_node_count: i64,
    nranks: usize,
) -> BTreeMap<usize, Vec<DcifReceptor>> {
    let mut buckets: BTreeMap<usize, Vec<DcifReceptor>> = BTreeMap::new();
    for receptor in receptors {
        let rank = worker_of_id(receptor.gid, global_node_count, nranks as i64) as usize;
        buckets.entry(rank).or_default().push(receptor);
    }
    buckets
}

/// Fetch the receptors for `wanted_gids` from the ranks resident for them.
/// Every rank supplies the receptors it holds under the linear partition
/// and the gids it wants; gids with no receptor are simply absent from the
/// result.
pub fn exchange_receptors(
    group: &ProcessGroup,
    resident: &[DcifReceptor],
    wanted_gids: &[i64],
    global_node_count: i64,
) -> Result<Vec<DcifReceptor>> {
    let index = build_global_to_receptor_index(resident);

    let mut asks: Vec<Vec<i64>> = vec![Vec::new(); group.size()];
    for &gid in wanted_gids {
        let rank = worker_of_id(gid, global_node_count, group.size() as i64) as usize;
        asks[rank].push(gid);
    }
    let requests = group.exchange(asks)?;

    let mut replies: BTreeMap<usize, Message> = BTreeMap::new();
    for (rank, request) in requests.iter().enumerate() {
        let mut found = Vec::new();
        for &gid in request {
            if let Some(&slot) = index.get(&gid) {
                found.push(resident[slot].clone());
            }
        }
        let mut msg = Message::new();
        msg.pack(found.len() as i32);
        for receptor in &found {
            receptor.pack(&mut msg);
        }
        replies.insert(rank, msg);
    }
    let incoming = group.exchange_messages(replies)?;

    let mut out = Vec::new();
    for (_, mut msg) in incoming {
        msg.finalize();
        let n = msg.unpack::<i32>()?;
        for _ in 0..n {
            out.push(DcifReceptor::unpack(&mut msg).map_err(DcifError::from)?);
        }
    }
    out.sort_by_key(|r| r.gid);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_comm::local::spawn_group;

    fn receptor(gid: i64) -> DcifReceptor {
        DcifReceptor {
            gid,
            donor_ids: vec![gid + 100],
            donor_weights: vec![1.0],
        }
    }

    #[test]
    fn test_mapping_follows_linear_partition() {
        let receptors = vec![receptor(0), receptor(5), receptor(9)];
        let buckets = map_receptors_to_ranks(receptors, 10, 2);
        assert_eq!(buckets[&0].len(), 2);
        assert_eq!(buckets[&1].len(), 1);
        assert_eq!(buckets[&1][0].gid, 9);
    }

    #[test]
    fn test_exchange_fetches_from_resident_ranks() {
        spawn_group(2, |group| {
            // 10 global nodes; rank 0 is resident for gids 0..5, rank 1 for
            // 5..10; receptors exist at 2 and 7
            let resident = if group.rank() == 0 {
                vec![receptor(2)]
            } else {
                vec![receptor(7)]
            };
            // each rank wants both receptors plus a gid with none
            let wanted = [2i64, 7, 4];
            let fetched = exchange_receptors(&group, &resident, &wanted, 10).unwrap();
            assert_eq!(fetched.len(), 2);
            assert_eq!(fetched[0].gid, 2);
            assert_eq!(fetched[1].gid, 7);
            assert_eq!(fetched[1].donor_ids, vec![107]);
        });
    }

    #[test]
    fn test_receptors_in_range() {
        let mut dcif = FlattenedDomainConnectivity::new();
        dcif.set_receptor_ids(vec![1, 4, 8]);
        dcif.set_donor_counts(vec![1, 1, 1]);
        dcif.set_donor_ids(vec![10, 11, 12]).unwrap();
        dcif.set_donor_weights(vec![1.0; 3]).unwrap();
        let chunk = receptors_in_range(&dcif, 2, 8).unwrap();
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk[0].gid, 4);
    }
}
