//! Constructive enumeration of incompressible failure tuples.
//!
//! Rather than enumerating all `C(n,k)` tuples, the search *builds* failures:
//! it first picks wires covering enough shares of the studied input
//! (`secrets_step`), then repeatedly picks wires that unmask the pivot
//! randoms of the reduced tuple (`randoms_step`) until the shares are exposed
//! or the size budget runs out. Linear gadgets use a single elimination;
//! multiplication gadgets additionally factorize through the bilinear gates
//! and run a second elimination on the studied input side.

pub mod linear;
pub mod mult;

use std::sync::Mutex;

use anyhow::Result;
use rayon::prelude::*;

use crate::circuit::{Circuit, ShareMask, Var};
use crate::trie::Trie;

/// For every share and every random, the wires observing it (through
/// multiplication operands as well).
#[derive(Clone, Debug)]
pub struct Columns {
    /// Indexed by `input * share_count + share`.
    pub secrets: Vec<Vec<Var>>,
    /// Indexed by row slot; only random slots are populated.
    pub randoms: Vec<Vec<Var>>,
}

pub fn build_columns(c: &Circuit, include_outputs: bool) -> Columns {
    let layout = &c.layout;
    let mut secrets = vec![Vec::new(); c.secret_count * c.share_count];
    let mut randoms = vec![Vec::new(); layout.first_mult()];
    let limit = if include_outputs {
        c.var_count()
    } else {
        c.length
    };
    for v in 0..limit {
        let mut share_masks = vec![0 as ShareMask; c.secret_count];
        let mut rand_slots = vec![false; layout.first_mult()];
        for row in &c.wires[v].rows {
            for input in 0..c.secret_count {
                share_masks[input] |= row.share_mask(layout, input);
            }
            for slot in layout.first_random()..layout.first_mult() {
                if row.get(slot) != 0 {
                    rand_slots[slot] = true;
                }
            }
            // A probe on a multiplication sees both operands.
            for m in 0..layout.mult_count {
                if row.get(layout.mult_slot(m)) == 0 {
                    continue;
                }
                let gate = &c.mults[m];
                for input in 0..c.secret_count {
                    share_masks[input] |= gate.contained_secrets[input];
                }
                for operand in [&gate.left_expr, &gate.right_expr] {
                    for slot in layout.first_random()..layout.first_mult() {
                        if operand.get(slot) != 0 {
                            rand_slots[slot] = true;
                        }
                    }
                }
            }
        }
        for input in 0..c.secret_count {
            for share in 0..c.share_count {
                if share_masks[input] & (1 << share) != 0 {
                    secrets[input * c.share_count + share].push(v as Var);
                }
            }
        }
        for (slot, touched) in rand_slots.iter().enumerate() {
            if *touched {
                randoms[slot].push(v as Var);
            }
        }
    }
    Columns { secrets, randoms }
}

/// Parameters of one incompressible-tuple search.
#[derive(Clone, Copy, Debug)]
pub struct SearchConfig {
    /// Number of shares that must leak for a tuple to be a failure.
    pub t_in: usize,
    /// Maximal tuple size (internal probes).
    pub max_size: usize,
    /// Whether output wires may enter tuples at all.
    pub include_outputs: bool,
    /// Output-probe budget per tuple (`-1`: no outputs allowed).
    pub required_outputs: i64,
    /// Separate budget for the second output of a copy gadget
    /// (`-1`: single budget).
    pub required_outputs_2: i64,
    /// In RPC/RPE mode output probes do not count against the tuple size.
    pub rpc_mode: bool,
}

impl SearchConfig {
    pub fn random_probing(t_in: usize, max_size: usize) -> Self {
        Self {
            t_in,
            max_size,
            include_outputs: false,
            required_outputs: 0,
            required_outputs_2: -1,
            rpc_mode: false,
        }
    }

    pub fn with_outputs(t_in: usize, max_size: usize, required_outputs: usize) -> Self {
        Self {
            t_in,
            max_size,
            include_outputs: required_outputs > 0,
            required_outputs: required_outputs as i64,
            required_outputs_2: -1,
            rpc_mode: true,
        }
    }
}

/// Largest incompressible size worth searching: beyond `shares + randoms`
/// every failure has a smaller witness.
fn search_cap(c: &Circuit, cfg: &SearchConfig) -> usize {
    (c.share_count + c.random_count).min(cfg.max_size)
}

/// Runs the constructive search for the given inputs and returns the trie of
/// incompressible tuples. `prefix` wires are forced into every tuple.
pub fn incompressible_tuples(
    c: &Circuit,
    cfg: &SearchConfig,
    secret_indices: &[usize],
    prefix: &[Var],
    parallel: bool,
) -> Result<Trie> {
    let columns = build_columns(c, cfg.include_outputs);
    let trie = Mutex::new(Trie::new(c.var_count(), c.secret_count));
    let cap = search_cap(c, cfg);

    for target_size in 1..=cap {
        for &secret_idx in secret_indices {
            // The top secrets_step level branches over the last share
            // column plus the skip branch; each branch can run on its own
            // worker with a private Gaussian state.
            let top_column = &columns.secrets[secret_idx * c.share_count + c.share_count - 1];
            let branch_count = 1 + top_column.len();
            let run = |branch: Option<usize>| -> Result<()> {
                if c.contains_mults() {
                    mult::MultSearch::new(c, cfg, &columns, &trie, secret_idx)?
                        .run(target_size, prefix, branch);
                } else {
                    linear::LinearSearch::new(c, cfg, &columns, &trie, secret_idx)
                        .run(target_size, prefix, branch);
                }
                Ok(())
            };
            if parallel && branch_count > 1 {
                (0..branch_count)
                    .into_par_iter()
                    .map(|b| run(Some(b)))
                    .collect::<Result<Vec<_>>>()?;
            } else {
                run(None)?;
            }
        }
        log::debug!(
            "size {}: {} incompressible tuples",
            target_size,
            trie.lock().unwrap().count_of_size(target_size)
        );
    }

    Ok(trie.into_inner().unwrap())
}

/// Guarded insertion: drops the candidate when a subtuple is already known.
pub(crate) fn record_failure(
    trie: &Mutex<Trie>,
    c: &Circuit,
    tuple: &[Var],
    secret_idx: usize,
    revealed: ShareMask,
) {
    let mut sorted: Vec<Var> = tuple.to_vec();
    sorted.sort_unstable();
    let mut guard = trie.lock().unwrap();
    if guard.contains_subset(&sorted) {
        return;
    }
    let mut descriptor = vec![0 as ShareMask; c.secret_count];
    descriptor[secret_idx] = revealed;
    guard.insert_merge(&sorted, &descriptor);
}
