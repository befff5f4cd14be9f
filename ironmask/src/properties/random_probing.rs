//! Random-probing drivers: RP, RPC and RPE.
//!
//! All three share the same skeleton: run the constructive search to get the
//! trie(s) of incompressible tuples, expand into per-size failure counts, and
//! turn the coefficient vector into leakage-probability bounds. They differ
//! in how tuples may use output wires and in how the per-output-set vectors
//! combine: RPC takes the worst output set (max), the RPE "2" conditions
//! intersect over all near-full output sets, and two-input RPE additionally
//! reports the vector of tuples leaking both inputs at once.

use anyhow::{ensure, Result};
use itertools::Itertools;
use serde::Serialize;

use crate::circuit::{Circuit, Var};
use crate::coeffs::{CoeffContext, LeakageBounds};
use crate::enumerator::{incompressible_tuples, SearchConfig};
use crate::expand::{failure_coeffs, failure_coeffs_all_of};
use crate::trie::Trie;

#[derive(Clone, Debug, Serialize)]
pub struct RpReport {
    pub coeffs: Vec<u64>,
    pub bounds: LeakageBounds,
    pub incompressible_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RpcReport {
    pub coeffs: Vec<u64>,
    pub bounds: LeakageBounds,
}

#[derive(Clone, Debug, Serialize)]
pub enum RpeReport {
    /// Two-input gadgets: RPE1 and RPE2 vectors for input 1, input 2 and
    /// the simultaneous-leak intersection.
    TwoInput {
        rpe1: [Vec<u64>; 3],
        rpe2: [Vec<u64>; 3],
        bounds: LeakageBounds,
    },
    /// Refresh-style gadgets (one input, one output).
    Single {
        rpe1: Vec<u64>,
        rpe2: Vec<u64>,
        bounds: LeakageBounds,
    },
    /// Copy gadgets (one input, two outputs): the four RPEᵢⱼ combinations
    /// of chosen-set (i/j = 1) and all-near-full-sets (i/j = 2) conditions.
    Copy {
        vectors: [Vec<u64>; 4],
        bounds: LeakageBounds,
    },
}

/// The requested last precise coefficient, clamped to what tuples over the
/// internal wires can reach.
fn resolve_coeff_max(c: &Circuit, coeff_max: Option<usize>) -> usize {
    coeff_max.unwrap_or(usize::MAX).min(c.length)
}

fn output_wires(c: &Circuit) -> Vec<Var> {
    (c.length as Var..c.var_count() as Var).collect()
}

/// All size-`k` subsets of `pool`.
fn subsets_of(pool: &[Var], k: usize) -> Vec<Vec<Var>> {
    pool.iter().copied().combinations(k).collect()
}

fn max_into(acc: &mut [u64], other: &[u64]) {
    for (a, &b) in acc.iter_mut().zip(other.iter()) {
        *a = (*a).max(b);
    }
}

pub fn rp_coeffs(c: &Circuit, coeff_max: Option<usize>, parallel: bool) -> Result<RpReport> {
    let cm = resolve_coeff_max(c, coeff_max);
    let cfg = SearchConfig::random_probing(c.share_count, cm);
    let secrets: Vec<usize> = (0..c.secret_count).collect();
    let trie = incompressible_tuples(c, &cfg, &secrets, &[], parallel)?;
    log::info!("total incompressible tuples: {}", trie.len());

    let ctx = CoeffContext::new();
    let coeffs = failure_coeffs(c, &ctx, &trie, c.length, cm);
    let bounds = LeakageBounds::from_coeffs(&coeffs, cm, false);
    Ok(RpReport {
        coeffs,
        bounds,
        incompressible_count: trie.len(),
    })
}

pub fn rpc_coeffs(
    c: &Circuit,
    coeff_max: Option<usize>,
    t: usize,
    t_output: usize,
    parallel: bool,
) -> Result<RpcReport> {
    let cm = resolve_coeff_max(c, coeff_max);
    let cfg = SearchConfig::with_outputs(t + 1, cm, t_output);
    let secrets: Vec<usize> = (0..c.secret_count).collect();
    let trie = incompressible_tuples(c, &cfg, &secrets, &[], parallel)?;

    let ctx = CoeffContext::new();
    let mut coeffs = vec![0u64; c.total_wires as usize + 1];
    for subset in subsets_of(&output_wires(c), t_output) {
        let derived = trie.project_onto(&subset, c.length, cm);
        let set_coeffs = failure_coeffs(c, &ctx, &derived, c.length, cm);
        max_into(&mut coeffs, &set_coeffs);
    }
    let bounds = LeakageBounds::from_coeffs(&coeffs, cm, false);
    Ok(RpcReport { coeffs, bounds })
}

pub fn rpe_coeffs(
    c: &Circuit,
    coeff_max: Option<usize>,
    t_output: usize,
    parallel: bool,
) -> Result<RpeReport> {
    if c.secret_count == 1 {
        return if c.output_count == 2 {
            rpe_coeffs_copy(c, coeff_max, t_output, parallel)
        } else {
            rpe_coeffs_single(c, coeff_max, t_output, parallel)
        };
    }
    ensure!(
        c.secret_count == 2,
        "RPE expects gadgets with one or two inputs"
    );
    let cm = resolve_coeff_max(c, coeff_max);
    let t_in = t_output + 1;
    let ctx = CoeffContext::new();
    let total = c.total_wires as usize;
    let outputs = output_wires(c);

    // RPE1: worst chosen output set of size t_output.
    let cfg1 = SearchConfig::with_outputs(t_in, cm, t_output);
    let trie_i1 = incompressible_tuples(c, &cfg1, &[0], &[], parallel)?;
    let trie_i2 = incompressible_tuples(c, &cfg1, &[1], &[], parallel)?;
    let mut rpe1 = [
        vec![0u64; total + 1],
        vec![0u64; total + 1],
        vec![0u64; total + 1],
    ];
    for subset in subsets_of(&outputs, t_output) {
        let d1 = trie_i1.project_onto(&subset, c.length, cm);
        let d2 = trie_i2.project_onto(&subset, c.length, cm);
        max_into(&mut rpe1[0], &failure_coeffs(c, &ctx, &d1, c.length, cm));
        max_into(&mut rpe1[1], &failure_coeffs(c, &ctx, &d2, c.length, cm));
        max_into(
            &mut rpe1[2],
            &failure_coeffs_all_of(c, &ctx, &[&d1, &d2], c.length, cm),
        );
    }

    // RPE2: the tuple must fail for every output set of size n-1.
    let near_full = c.share_count - 1;
    let cfg2 = SearchConfig::with_outputs(t_in, cm, near_full);
    let trie2_i1 = incompressible_tuples(c, &cfg2, &[0], &[], parallel)?;
    let trie2_i2 = incompressible_tuples(c, &cfg2, &[1], &[], parallel)?;
    let subsets2 = subsets_of(&outputs, near_full);
    let derived1: Vec<Trie> = subsets2
        .iter()
        .map(|s| trie2_i1.project_onto(s, c.length, cm))
        .collect();
    let derived2: Vec<Trie> = subsets2
        .iter()
        .map(|s| trie2_i2.project_onto(s, c.length, cm))
        .collect();
    let refs1: Vec<&Trie> = derived1.iter().collect();
    let refs2: Vec<&Trie> = derived2.iter().collect();
    let both: Vec<&Trie> = refs1.iter().chain(refs2.iter()).copied().collect();
    let rpe2 = [
        failure_coeffs_all_of(c, &ctx, &refs1, c.length, cm),
        failure_coeffs_all_of(c, &ctx, &refs2, c.length, cm),
        failure_coeffs_all_of(c, &ctx, &both, c.length, cm),
    ];

    let bounds = rpe_bounds(
        &[
            (&rpe1[0], false),
            (&rpe1[1], false),
            (&rpe1[2], true),
            (&rpe2[0], false),
            (&rpe2[1], false),
            (&rpe2[2], true),
        ],
        cm,
    );
    Ok(RpeReport::TwoInput { rpe1, rpe2, bounds })
}

fn rpe_coeffs_single(
    c: &Circuit,
    coeff_max: Option<usize>,
    t_output: usize,
    parallel: bool,
) -> Result<RpeReport> {
    let cm = resolve_coeff_max(c, coeff_max);
    let t_in = t_output + 1;
    let ctx = CoeffContext::new();
    let outputs = output_wires(c);

    let cfg1 = SearchConfig::with_outputs(t_in, cm, t_output);
    let trie1 = incompressible_tuples(c, &cfg1, &[0], &[], parallel)?;
    let mut rpe1 = vec![0u64; c.total_wires as usize + 1];
    for subset in subsets_of(&outputs, t_output) {
        let derived = trie1.project_onto(&subset, c.length, cm);
        max_into(&mut rpe1, &failure_coeffs(c, &ctx, &derived, c.length, cm));
    }

    let near_full = c.share_count - 1;
    let cfg2 = SearchConfig::with_outputs(t_in, cm, near_full);
    let trie2 = incompressible_tuples(c, &cfg2, &[0], &[], parallel)?;
    let derived: Vec<Trie> = subsets_of(&outputs, near_full)
        .iter()
        .map(|s| trie2.project_onto(s, c.length, cm))
        .collect();
    let refs: Vec<&Trie> = derived.iter().collect();
    let rpe2 = failure_coeffs_all_of(c, &ctx, &refs, c.length, cm);

    let bounds = rpe_bounds(&[(&rpe1, false), (&rpe2, false)], cm);
    Ok(RpeReport::Single { rpe1, rpe2, bounds })
}

fn rpe_coeffs_copy(
    c: &Circuit,
    coeff_max: Option<usize>,
    t_output: usize,
    parallel: bool,
) -> Result<RpeReport> {
    let cm = resolve_coeff_max(c, coeff_max);
    let t_in = t_output + 1;
    let ctx = CoeffContext::new();
    let near_full = c.share_count - 1;
    let block = c.share_count * c.duplications;
    let out1: Vec<Var> = (c.length..c.length + block).map(|v| v as Var).collect();
    let out2: Vec<Var> = (c.length + block..c.var_count()).map(|v| v as Var).collect();

    // One search per (budget on output 1, budget on output 2) pair.
    let budgets = [
        (t_output, t_output),
        (t_output, near_full),
        (near_full, t_output),
        (near_full, near_full),
    ];
    let mut vectors: Vec<Vec<u64>> = Vec::with_capacity(4);
    for (idx, &(b1, b2)) in budgets.iter().enumerate() {
        if idx == 3 {
            // RPE22 intersects over both dimensions; computed below.
            vectors.push(vec![0u64; c.total_wires as usize + 1]);
            continue;
        }
        let cfg = SearchConfig {
            t_in,
            max_size: cm,
            include_outputs: true,
            required_outputs: b1 as i64,
            required_outputs_2: b2 as i64,
            rpc_mode: true,
        };
        let trie = incompressible_tuples(c, &cfg, &[0], &[], parallel)?;
        let sets1 = subsets_of(&out1, b1);
        let sets2 = subsets_of(&out2, b2);
        let first_chosen = idx < 2; // RPE11, RPE12 choose J1 adversarially
        let second_chosen = idx % 2 == 0; // RPE11, RPE21 choose J2 adversarially

        // For every (J1, J2): derive the trie. "Chosen" dimensions maximize,
        // "all-sets" dimensions intersect.
        let mut vector = vec![0u64; c.total_wires as usize + 1];
        let chosen_sets: Vec<&Vec<Var>> = if first_chosen {
            sets1.iter().collect()
        } else {
            sets2.iter().collect()
        };
        let other_sets: &[Vec<Var>] = if first_chosen { &sets2 } else { &sets1 };
        let other_chosen = if first_chosen { second_chosen } else { first_chosen };
        for j_fixed in chosen_sets {
            let coeffs = if other_chosen {
                // Both chosen: max over the other dimension as well.
                let mut acc = vec![0u64; c.total_wires as usize + 1];
                for j_other in other_sets {
                    let mut subset = j_fixed.clone();
                    subset.extend_from_slice(j_other);
                    let derived = trie.project_onto(&subset, c.length, cm);
                    max_into(&mut acc, &failure_coeffs(c, &ctx, &derived, c.length, cm));
                }
                acc
            } else {
                // The other dimension intersects over all its sets.
                let derived: Vec<Trie> = other_sets
                    .iter()
                    .map(|j_other| {
                        let mut subset = j_fixed.clone();
                        subset.extend_from_slice(j_other);
                        trie.project_onto(&subset, c.length, cm)
                    })
                    .collect();
                let refs: Vec<&Trie> = derived.iter().collect();
                failure_coeffs_all_of(c, &ctx, &refs, c.length, cm)
            };
            max_into(&mut vector, &coeffs);
        }
        vectors.push(vector);
    }

    // RPE22 intersects over both dimensions: recompute it directly as the
    // intersection over all (J1, J2) pairs.
    {
        let cfg = SearchConfig {
            t_in,
            max_size: cm,
            include_outputs: true,
            required_outputs: near_full as i64,
            required_outputs_2: near_full as i64,
            rpc_mode: true,
        };
        let trie = incompressible_tuples(c, &cfg, &[0], &[], parallel)?;
        let mut derived = Vec::new();
        for j1 in subsets_of(&out1, near_full) {
            for j2 in subsets_of(&out2, near_full) {
                let mut subset = j1.clone();
                subset.extend_from_slice(&j2);
                derived.push(trie.project_onto(&subset, c.length, cm));
            }
        }
        let refs: Vec<&Trie> = derived.iter().collect();
        vectors[3] = failure_coeffs_all_of(c, &ctx, &refs, c.length, cm);
    }

    let vectors: [Vec<u64>; 4] = vectors.try_into().expect("four RPE vectors");
    let bounds = rpe_bounds(
        &[
            (&vectors[0], false),
            (&vectors[1], false),
            (&vectors[2], false),
            (&vectors[3], false),
        ],
        cm,
    );
    Ok(RpeReport::Copy { vectors, bounds })
}

/// RPE bounds: the best (smallest) fixed point over the component searches;
/// the ∩ vectors compare against p² (square-root combination).
fn rpe_bounds(vectors: &[(&Vec<u64>, bool)], last_precise: usize) -> LeakageBounds {
    use crate::coeffs::{leakage_proba, TailBound};
    let mut pmin = f64::INFINITY;
    let mut pmax = f64::INFINITY;
    for &(coeffs, sqrt) in vectors {
        pmin = pmin.min(leakage_proba(coeffs, last_precise, TailBound::Binomial, sqrt));
        pmax = pmax.min(leakage_proba(coeffs, last_precise, TailBound::Zero, sqrt));
    }
    LeakageBounds { pmin, pmax }
}
