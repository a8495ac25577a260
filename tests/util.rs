#![allow(dead_code)]
//! Shared helpers: run one thread per rank over a fresh `LocalComm`
//! universe, and build per-rank router inputs from a global participation
//! table.

use halo_router::prelude::*;
use std::sync::Arc;

/// Run `f` once per rank, each on its own thread; results ordered by rank.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(LocalComm) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = LocalComm::universe(size)
        .into_iter()
        .map(|comm| {
            let f = Arc::clone(&f);
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

/// Global participation table: one entry per shared node, listing
/// `(rank, positively_signed)` for every participant.
pub type Table = Vec<(i64, Vec<(usize, bool)>)>;

/// What one rank feeds the router: its halo layout, its shared-node
/// records, and the global id living in each of its slots.
pub struct RankSpec {
    pub layout: HaloLayout,
    pub shared: Vec<SharedNode>,
    /// `globals[slot]` is the global id held in that slot.
    pub globals: Vec<i64>,
}

impl RankSpec {
    pub fn slot_of(&self, global: i64) -> usize {
        self.globals
            .iter()
            .position(|&g| g == global)
            .expect("rank does not hold this global")
    }
}

/// Derive one rank's router inputs from the table. Positively signed slots
/// occupy the prefix, in table order; negatives follow.
pub fn rank_spec(table: &Table, rank: usize) -> RankSpec {
    let mut held: Vec<(i64, bool)> = Vec::new();
    for (g, parts) in table {
        if let Some(&(_, pos)) = parts.iter().find(|&&(r, _)| r == rank) {
            held.push((*g, pos));
        }
    }
    held.sort_by_key(|&(_, pos)| !pos); // stable: positives first
    let nhalo = held.len();
    let nhalo_p = held.iter().filter(|&&(_, pos)| pos).count();
    let globals: Vec<i64> = held.iter().map(|&(g, _)| g).collect();

    let mut shared = Vec::new();
    for (g, parts) in table {
        let Some(slot) = globals.iter().position(|gg| gg == g) else {
            continue;
        };
        for &(r, pos) in parts {
            if r != rank {
                shared.push(SharedNode::new(r, if pos { *g } else { -*g }, slot));
            }
        }
    }

    RankSpec {
        layout: HaloLayout::new(nhalo_p, nhalo).expect("valid layout"),
        shared,
        globals,
    }
}
