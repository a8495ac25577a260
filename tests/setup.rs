//! Setup-level properties: determinism, sizing laws, variant containment,
//! and the hypercube round-count law.

mod util;

use halo_router::prelude::*;
use halo_router::router::level::Level;
use halo_router::router::plan::FoldPlan;
use proptest::prelude::*;
use std::sync::Arc;
use util::{rank_spec, run_ranks, Table};

fn three_rank_table() -> Arc<Table> {
    Arc::new(vec![
        (1, vec![(0, true), (1, true)]),
        (2, vec![(1, true), (2, false)]),
        (3, vec![(0, true), (1, false), (2, true)]),
    ])
}

fn build_levels(table: Arc<Table>, size: usize) -> Vec<(Vec<Level>, Vec<Level>)> {
    run_ranks(size, move |comm| {
        let rank = comm.rank();
        let spec = rank_spec(&table, rank);
        let router = Router::new(&spec.shared, spec.layout, comm).unwrap();
        (
            router.levels(Transpose::NoTrans).to_vec(),
            router.levels(Transpose::Trans).to_vec(),
        )
    })
}

#[test]
fn setup_is_idempotent() {
    // Rebuilding from the same inputs yields bitwise-identical descriptors.
    let a = build_levels(three_rank_table(), 3);
    let b = build_levels(three_rank_table(), 3);
    assert_eq!(a, b);
}

fn is_subsequence(needle: &[usize], hay: &[usize]) -> bool {
    let mut it = hay.iter();
    needle.iter().all(|n| it.any(|h| h == n))
}

#[test]
fn per_level_invariants_hold() {
    let table = three_rank_table();
    let checks = run_ranks(3, move |comm| {
        let rank = comm.rank();
        let spec = rank_spec(&table, rank);
        let router = Router::new(&spec.shared, spec.layout, comm).unwrap();

        let levels_n = router.levels(Transpose::NoTrans);
        let levels_t = router.levels(Transpose::Trans);
        assert_eq!(levels_n.len(), levels_t.len());

        for (ln, lt) in levels_n.iter().zip(levels_t) {
            // Both variants fold over the same hypercube round.
            assert_eq!(ln.partner, lt.partner);
            assert_eq!(ln.nmsg, lt.nmsg);

            // Buffer-size law.
            assert!(router.nsend_max() >= lt.nsend());
            assert!(router.nrecv_max() >= lt.recv_total());

            // Descriptor width matches the receive layout.
            assert_eq!(ln.gather.ncols(), ln.recv_total());
            assert_eq!(lt.gather.ncols(), lt.recv_total());

            // The symmetric extended halo dominates the non-symmetric one.
            assert!(lt.gather.nrows() >= ln.gather.nrows());
            assert!(lt.recv_offset >= ln.recv_offset);

            // N-variant sends are the positively signed subsequence of T's.
            assert!(lt.nsend() >= ln.nsend());
            assert!(is_subsequence(&ln.send_ids, &lt.send_ids));
        }
        router.nlevels()
    });
    assert_eq!(checks.len(), 3);
}

#[test]
fn round_count_matches_plan() {
    for size in 2..=9usize {
        let empty: Arc<Table> = Arc::new(Vec::new());
        let nlevels = run_ranks(size, move |comm| {
            let rank = comm.rank();
            let spec = rank_spec(&empty, rank);
            let router = Router::new(&spec.shared, spec.layout, comm).unwrap();
            (rank, router.nlevels())
        });
        for (rank, n) in nlevels {
            assert_eq!(n, FoldPlan::new(rank, size).count(), "size {size}");
            let bound = (size as f64).log2().ceil() as usize;
            if size.is_power_of_two() {
                assert_eq!(n, bound);
            } else {
                assert!(n <= bound + 1);
            }
        }
    }
}

proptest! {
    #[test]
    fn fold_plan_is_mutual_and_logarithmic(size in 1usize..96, pick in 0usize..96) {
        let rank = pick % size;
        let rounds: Vec<_> = FoldPlan::new(rank, size).collect();
        let bound = (size.max(1) as f64).log2().ceil() as usize;
        prop_assert!(rounds.len() <= bound + 1);
        if size.is_power_of_two() {
            prop_assert_eq!(rounds.len(), bound);
        }
        for (lvl, step) in rounds.iter().enumerate() {
            // The peer runs the same round and expects us as a source.
            let peer: Vec<_> = FoldPlan::new(step.partner, size).collect();
            prop_assert!(lvl < peer.len());
            prop_assert!(
                peer[lvl].partner == rank
                    || (peer[lvl].nmsg == 2 && peer[lvl].second == rank)
            );
        }
    }
}
