//! Cooperative multi-round setup: negotiate with one partner per round,
//! hand over the nodes whose destinations fall in the partner's half of the
//! cube, and grow the extended-halo labelling plus the per-level gather
//! descriptors for both exchange variants.

use std::mem::size_of;

use bytemuck::Zeroable;

use crate::comm::{Communicator, Wait};
use crate::error::HaloError;
use crate::gather::GatherMap;
use crate::node::{restore_order, RouterNode, SharedNode, UNASSIGNED};
use crate::router::level::Level;
use crate::router::plan::{FoldPlan, FoldStep};
use crate::router::HaloLayout;

pub(crate) struct SetupResult {
    pub levels_n: Vec<Level>,
    pub levels_t: Vec<Level>,
    pub nsend_max: usize,
    pub nrecv_max: usize,
}

/// Build both level vectors. Collective over `comm`.
pub(crate) fn build_levels<C: Communicator>(
    comm: &C,
    halo: HaloLayout,
    shared: &[SharedNode],
) -> Result<SetupResult, HaloError> {
    let rank = comm.rank();
    let size = comm.size();
    let nhalo = halo.nhalo();
    let nhalo_p = halo.nhalo_p();

    for s in shared {
        if s.new_id >= nhalo {
            return Err(HaloError::SlotOutOfRange {
                slot: s.new_id,
                nhalo,
            });
        }
        if s.base_id == 0 {
            return Err(HaloError::ZeroBaseId);
        }
    }

    // Setup is easier if copies of the nodes we own sit in the list
    // alongside the remote participations.
    let mut nodes: Vec<RouterNode> = Vec::with_capacity(nhalo + shared.len());
    for n in 0..nhalo {
        nodes.push(RouterNode {
            base_id: 0,
            new_id: n as i64,
            local_id: 0,
            rank: rank as i32,
            sign: if n < nhalo_p { 2 } else { -2 },
        });
    }
    for s in shared {
        if nodes[s.new_id].base_id == 0 {
            nodes[s.new_id].base_id = if s.new_id < nhalo_p {
                s.base_id.abs()
            } else {
                -s.base_id.abs()
            };
        }
    }
    for s in shared {
        nodes.push(RouterNode {
            base_id: s.base_id,
            new_id: s.new_id as i64,
            local_id: 0,
            rank: s.rank as i32,
            sign: s.seed_sign(),
        });
    }
    nodes.sort_by_key(|n| n.new_id);

    let mut levels_n: Vec<Level> = Vec::new();
    let mut levels_t: Vec<Level> = Vec::new();
    let mut nhalo_ext_t = nhalo;
    let mut nhalo_ext_n = nhalo;

    for (round, step) in FoldPlan::new(rank, size).enumerate() {
        let r_half = step.r_half;

        // 1. count both halves and trade node counts with the partner(s)
        let n_lo = nodes.iter().filter(|n| (n.rank as usize) < r_half).count();
        let n_hi = nodes.len() - n_lo;
        let nsend_nodes = if step.is_lo { n_hi } else { n_lo };
        let (nrecv0, nrecv1) = exchange_counts(comm, &step, nsend_nodes as u32)?;

        // 2. physically split; the kept half continues, the rest departs
        let mut kept = Vec::with_capacity(nodes.len() - nsend_nodes + nrecv0 + nrecv1);
        let mut send_nodes = Vec::with_capacity(nsend_nodes);
        for n in nodes.drain(..) {
            if ((n.rank as usize) < r_half) == step.is_lo {
                kept.push(n);
            } else {
                send_nodes.push(n);
            }
        }

        // 3. one send entry per departing base-id group; the partner must
        // not interpret our local slots, so wipe them before transmission
        let mut send_ids_t = Vec::new();
        let mut send_ids_n = Vec::new();
        let mut prev_base = None;
        for n in send_nodes.iter_mut() {
            if prev_base != Some(n.base()) {
                if n.sign > 0 {
                    send_ids_n.push(n.new_id as usize);
                }
                send_ids_t.push(n.new_id as usize);
                prev_base = Some(n.base());
            }
            n.new_id = UNASSIGNED;
        }

        // 4. trade per-variant entry counts (T first, then N, mirroring the
        // order both sides post in)
        let (t_recv0, t_recv1) = exchange_counts(comm, &step, send_ids_t.len() as u32)?;
        let (n_recv0, n_recv1) = exchange_counts(comm, &step, send_ids_n.len() as u32)?;
        let recv_offset_t = nhalo_ext_t;
        let recv_offset_n = nhalo_ext_n;

        // 5. trade the node payloads themselves
        let (msg0, msg1) = exchange_nodes(comm, &step, &send_nodes, nrecv0, nrecv1)?;
        drop(send_nodes);
        let offset = kept.len();
        kept.extend(msg0);
        kept.extend(msg1);
        nodes = kept;

        // 6. re-label: coalesce received nodes with ours and hand out
        // extended-halo slots (positive groups first)
        let index_map = relabel(
            &mut nodes,
            nhalo,
            &mut nhalo_ext_n,
            &mut nhalo_ext_t,
        );

        // 7. both gather descriptors over the round's receive layout
        let first_round = round == 0;
        let (gather_n, gather_t) = build_gathers(
            &nodes,
            offset,
            nrecv0,
            GatherShape {
                nhalo,
                nhalo_p,
                first_round,
                nrows_n: nhalo_ext_n,
                nrows_t: nhalo_ext_t,
                recv_offset_n,
                recv_offset_t,
                nrecv_n: n_recv0 + n_recv1,
                nrecv_t: t_recv0 + t_recv1,
            },
            &index_map,
        );

        levels_t.push(Level {
            partner: step.partner,
            second: step.second,
            nmsg: step.nmsg,
            send_ids: send_ids_t,
            nrecv0: t_recv0,
            nrecv1: t_recv1,
            recv_offset: recv_offset_t,
            gather: gather_t,
        });
        levels_n.push(Level {
            partner: step.partner,
            second: step.second,
            nmsg: step.nmsg,
            send_ids: send_ids_n,
            nrecv0: n_recv0,
            nrecv1: n_recv1,
            recv_offset: recv_offset_n,
            gather: gather_n,
        });

        // 8. a positive participation discovered on a peer becomes visible
        // to every copy that had only been seen as negative
        nodes.sort_by_key(|n| n.new_id);
        propagate_signs(&mut nodes);
    }

    let nsend_max = levels_t.iter().map(Level::nsend).max().unwrap_or(0);
    let nrecv_max = levels_t
        .iter()
        .map(Level::recv_total)
        .max()
        .unwrap_or(0)
        .max(nhalo);

    log::debug!(
        "crystal router setup: rank {rank}/{size}, {} levels, nsend_max {nsend_max}, nrecv_max {nrecv_max}",
        levels_t.len()
    );

    Ok(SetupResult {
        levels_n,
        levels_t,
        nsend_max,
        nrecv_max,
    })
}

/// Post the receive leg(s), send our value, and wait everything out.
/// Receives come first so a pair can never deadlock.
fn exchange_counts<C: Communicator>(
    comm: &C,
    step: &FoldStep,
    value: u32,
) -> Result<(usize, usize), HaloError> {
    let h0 = (step.nmsg > 0).then(|| comm.irecv(step.partner, step.partner as u16, 4));
    let h1 = (step.nmsg == 2).then(|| comm.irecv(step.second, step.second as u16, 4));
    let s = comm.isend(step.partner, comm.rank() as u16, &value.to_le_bytes());

    let r0 = wait_count(h0, step.partner)?;
    let r1 = wait_count(h1, step.second)?;
    let _ = s.wait();
    Ok((r0, r1))
}

fn wait_count<H: Wait>(handle: Option<H>, peer: usize) -> Result<usize, HaloError> {
    let Some(h) = handle else { return Ok(0) };
    let bytes = h.wait().ok_or_else(|| HaloError::Comm {
        peer,
        reason: "count exchange returned no data".into(),
    })?;
    let arr: [u8; 4] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| HaloError::BufferSizeMismatch {
            peer,
            expected: 4,
            got: bytes.len(),
        })?;
    Ok(u32::from_le_bytes(arr) as usize)
}

/// Trade node records: ours go to the partner, `nrecv0`/`nrecv1` arrive.
fn exchange_nodes<C: Communicator>(
    comm: &C,
    step: &FoldStep,
    send: &[RouterNode],
    nrecv0: usize,
    nrecv1: usize,
) -> Result<(Vec<RouterNode>, Vec<RouterNode>), HaloError> {
    const NODE_BYTES: usize = size_of::<RouterNode>();

    let h0 = (step.nmsg > 0).then(|| comm.irecv(step.partner, step.partner as u16, nrecv0 * NODE_BYTES));
    let h1 = (step.nmsg == 2).then(|| comm.irecv(step.second, step.second as u16, nrecv1 * NODE_BYTES));
    let s = comm.isend(step.partner, comm.rank() as u16, bytemuck::cast_slice(send));

    let msg0 = wait_nodes(h0, step.partner, nrecv0)?;
    let msg1 = wait_nodes(h1, step.second, nrecv1)?;
    let _ = s.wait();
    Ok((msg0, msg1))
}

fn wait_nodes<H: Wait>(
    handle: Option<H>,
    peer: usize,
    count: usize,
) -> Result<Vec<RouterNode>, HaloError> {
    let Some(h) = handle else { return Ok(Vec::new()) };
    let bytes = h.wait().ok_or_else(|| HaloError::Comm {
        peer,
        reason: "node exchange returned no data".into(),
    })?;
    let expected = count * size_of::<RouterNode>();
    if bytes.len() != expected {
        return Err(HaloError::BufferSizeMismatch {
            peer,
            expected,
            got: bytes.len(),
        });
    }
    let mut out = vec![RouterNode::zeroed(); count];
    bytemuck::cast_slice_mut::<RouterNode, u8>(&mut out).copy_from_slice(&bytes);
    Ok(out)
}

/// Walk base-id groups, assign extended-halo slots (positive prefix, then
/// negative suffix), and propagate the chosen label through each group.
/// Returns the map from newly assigned slot (− nhalo) to the group's
/// previous label, then restores the pre-sort order.
fn relabel(
    nodes: &mut [RouterNode],
    nhalo: usize,
    nhalo_ext_n: &mut usize,
    nhalo_ext_t: &mut usize,
) -> Vec<i64> {
    for (i, n) in nodes.iter_mut().enumerate() {
        n.local_id = i as i64;
    }
    // Positive labels first within a group, so the representative is the
    // member that already carries a slot if any does.
    nodes.sort_by(|a, b| a.base().cmp(&b.base()).then(b.new_id.cmp(&a.new_id)));

    let needs_slot = |id: i64| id >= nhalo as i64 || id == UNASSIGNED;

    // First pass: how many groups need a slot, and how many of those have a
    // positively signed member anywhere.
    let mut new_pos = 0usize;
    let mut new_tot = 0usize;
    let mut start = 0usize;
    while start < nodes.len() {
        let mut end = start + 1;
        while end < nodes.len() && nodes[end].base() == nodes[start].base() {
            end += 1;
        }
        if needs_slot(nodes[start].new_id) {
            if nodes[start..end].iter().any(|n| n.sign > 0) {
                new_pos += 1;
            }
            new_tot += 1;
        }
        start = end;
    }

    // Second pass: hand out the slots and remember each group's previous
    // label so the gather can still reach its old extended position.
    let mut index_map = vec![UNASSIGNED; new_tot];
    let mut next_pos = nhalo;
    let mut next_neg = nhalo + new_pos;
    let mut start = 0usize;
    while start < nodes.len() {
        let mut end = start + 1;
        while end < nodes.len() && nodes[end].base() == nodes[start].base() {
            end += 1;
        }
        let mut id = nodes[start].new_id;
        if needs_slot(id) {
            let positive = nodes[start..end].iter().any(|n| n.sign > 0);
            let slot = if positive {
                let s = next_pos;
                next_pos += 1;
                s
            } else {
                let s = next_neg;
                next_neg += 1;
                s
            };
            index_map[slot - nhalo] = id;
            id = slot as i64;
        }
        for n in &mut nodes[start..end] {
            n.new_id = id;
        }
        start = end;
    }
    *nhalo_ext_n = next_pos;
    *nhalo_ext_t = next_neg;

    restore_order(nodes);
    index_map
}

struct GatherShape {
    nhalo: usize,
    nhalo_p: usize,
    first_round: bool,
    nrows_n: usize,
    nrows_t: usize,
    recv_offset_n: usize,
    recv_offset_t: usize,
    nrecv_n: usize,
    nrecv_t: usize,
}

/// Build both variants' gather descriptors from the relabelled node list.
///
/// Rows are extended-halo slots; columns index the round's receive layout
/// `[0, recv_offset) ∪ [recv_offset, recv_offset + received entries)`.
fn build_gathers(
    nodes: &[RouterNode],
    offset: usize,
    nrecv0: usize,
    shape: GatherShape,
    index_map: &[i64],
) -> (GatherMap, GatherMap) {
    let nhalo = shape.nhalo;
    let mut rows_n: Vec<Vec<usize>> = vec![Vec::new(); shape.nrows_n];
    let mut rows_t: Vec<Vec<usize>> = vec![Vec::new(); shape.nrows_t];

    // Carry the accumulated halo forward. On the first round the
    // non-symmetric variant seeds only the positively signed prefix; this
    // is what keeps negatively signed own-copies out of its result.
    for (n, row) in rows_t.iter_mut().enumerate().take(nhalo) {
        row.push(n);
    }
    let n_seed = if shape.first_round {
        shape.nhalo_p
    } else {
        nhalo
    };
    for (n, row) in rows_n.iter_mut().enumerate().take(n_seed) {
        row.push(n);
    }

    // Kept nodes whose groups live in the extended halo pull their old
    // slots forward through the index map.
    let mut prev_base = None;
    for n in &nodes[..offset] {
        if prev_base != Some(n.base()) {
            prev_base = Some(n.base());
            if n.new_id >= nhalo as i64 {
                let id = n.new_id as usize;
                let old = index_map[id - nhalo] as usize;
                if n.sign > 0 {
                    rows_n[id].push(old);
                }
                rows_t[id].push(old);
            }
        }
    }

    // Each received message contributes one column per arriving base-id
    // group, in arrival order; the non-symmetric variant only counts
    // positively signed representatives (matching the sender's packing).
    let mut next_n = shape.recv_offset_n;
    let mut next_t = shape.recv_offset_t;
    for msg in [&nodes[offset..offset + nrecv0], &nodes[offset + nrecv0..]] {
        let mut prev_base = None;
        for n in msg {
            if prev_base != Some(n.base()) {
                prev_base = Some(n.base());
                let id = n.new_id as usize;
                if n.sign > 0 {
                    rows_n[id].push(next_n);
                    next_n += 1;
                }
                rows_t[id].push(next_t);
                next_t += 1;
            }
        }
    }
    debug_assert_eq!(next_n, shape.recv_offset_n + shape.nrecv_n);
    debug_assert_eq!(next_t, shape.recv_offset_t + shape.nrecv_t);

    (
        GatherMap::from_rows(&rows_n, shape.recv_offset_n + shape.nrecv_n),
        GatherMap::from_rows(&rows_t, shape.recv_offset_t + shape.nrecv_t),
    )
}

/// Within each base-id group, promote every member to positive if any
/// member is positive. Expects the list grouped by base id.
fn propagate_signs(nodes: &mut [RouterNode]) {
    let mut start = 0usize;
    while start < nodes.len() {
        let mut end = start + 1;
        while end < nodes.len() && nodes[end].base() == nodes[start].base() {
            end += 1;
        }
        if let Some(pos) = nodes[start..end].iter().find(|n| n.sign > 0) {
            let sign = pos.sign;
            for n in &mut nodes[start..end] {
                n.sign = sign;
            }
        }
        start = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(base_id: i64, new_id: i64, sign: i32) -> RouterNode {
        RouterNode {
            base_id,
            new_id,
            local_id: 0,
            rank: 0,
            sign,
        }
    }

    #[test]
    fn relabel_reuses_home_slots() {
        // Group 7 has a home slot (1); the arrival coalesces onto it.
        let mut nodes = vec![node(7, 1, 2), node(7, UNASSIGNED, 2)];
        let mut ext_n = 4;
        let mut ext_t = 4;
        let map = relabel(&mut nodes, 4, &mut ext_n, &mut ext_t);
        assert!(map.is_empty());
        assert_eq!(ext_n, 4);
        assert_eq!(ext_t, 4);
        assert!(nodes.iter().all(|n| n.new_id == 1));
    }

    #[test]
    fn relabel_assigns_prefix_and_suffix() {
        // Two brand-new groups: one with a positive member, one without.
        let mut nodes = vec![
            node(9, UNASSIGNED, -2),
            node(9, UNASSIGNED, 2),
            node(11, UNASSIGNED, -2),
        ];
        let mut ext_n = 2;
        let mut ext_t = 2;
        let map = relabel(&mut nodes, 2, &mut ext_n, &mut ext_t);
        // Positive group gets the prefix slot 2, negative the suffix slot 3.
        assert_eq!(ext_n, 3);
        assert_eq!(ext_t, 4);
        assert_eq!(nodes[0].new_id, 2);
        assert_eq!(nodes[1].new_id, 2);
        assert_eq!(nodes[2].new_id, 3);
        assert_eq!(map, vec![UNASSIGNED, UNASSIGNED]);
    }

    #[test]
    fn relabel_recompacts_old_extended_slots() {
        // A group already in the extended halo is given a fresh slot and the
        // index map remembers where it used to live.
        let mut nodes = vec![node(5, 6, 2)];
        let mut ext_n = 7;
        let mut ext_t = 7;
        let map = relabel(&mut nodes, 4, &mut ext_n, &mut ext_t);
        assert_eq!(nodes[0].new_id, 4);
        assert_eq!(map[0], 6);
        assert_eq!(ext_n, 5);
        assert_eq!(ext_t, 5);
    }

    #[test]
    fn sign_propagation_promotes_groups() {
        let mut nodes = vec![
            node(-3, 0, -2),
            node(3, 0, 2),
            node(-4, 1, -2),
            node(-4, 1, -2),
        ];
        propagate_signs(&mut nodes);
        assert!(nodes[0].sign > 0 && nodes[1].sign > 0);
        assert!(nodes[2].sign < 0 && nodes[3].sign < 0);
    }
}
