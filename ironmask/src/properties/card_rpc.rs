//! Cardinal RPC envelopes for refresh gadgets.
//!
//! For every pair `(t_in, t_out)` the envelope is a coefficient vector: for
//! each output-share set of size `t_out`, every tuple of internal wires is
//! enumerated (up to `coeff_max`), bucketed by how many input shares it
//! reveals together with the chosen outputs, and the dominant vector over
//! the output sets is kept per bucket.

use anyhow::{ensure, Result};
use serde::Serialize;

use crate::circuit::{Circuit, ShareMask, Var};
use crate::coeffs::CoeffContext;
use crate::gauss::GaussState;

#[derive(Clone, Debug, Serialize)]
pub struct CardRpcReport {
    /// `env[t_in][t_out]` is the coefficient vector of tuples revealing
    /// exactly `t_in` shares with `t_out` output shares observed.
    pub env: Vec<Vec<Vec<u64>>>,
}

struct EnvBuilder<'a> {
    c: &'a Circuit,
    ctx: CoeffContext,
    coeff_max: usize,
    tuple: Vec<Var>,
    gauss: GaussState,
    offsets: Vec<usize>,
}

impl<'a> EnvBuilder<'a> {
    fn new(c: &'a Circuit, coeff_max: usize) -> Self {
        Self {
            c,
            ctx: CoeffContext::new(),
            coeff_max,
            tuple: Vec::new(),
            gauss: GaussState::for_circuit(c),
            offsets: Vec::new(),
        }
    }

    fn push(&mut self, v: Var) -> ShareMask {
        self.offsets.push(self.gauss.len());
        let (start, end) = self.gauss.push_wire(self.c, v, None);
        let mut newly = 0;
        for i in start..end {
            if self.gauss.pivot(i).is_none() {
                newly |= self.gauss.row(i).share_mask(&self.c.layout, 0);
            }
        }
        newly
    }

    fn pop(&mut self) {
        let off = self.offsets.pop().expect("pop without push");
        self.gauss.truncate(off);
    }

    /// Extends the current tuple with internal wires from `start` on,
    /// counting every extension into its revealed-share bucket.
    fn explore(&mut self, start: usize, revealed: ShareMask, env: &mut [Vec<u64>]) {
        if self.tuple.len() == self.coeff_max {
            return;
        }
        let all = self.c.all_shares_mask();
        for v in start..self.c.length {
            self.tuple.push(v as Var);
            if revealed == all {
                // Fully revealed: every extension stays in the top bucket,
                // no elimination needed.
                let t_in = self.c.share_count;
                self.add_current(&mut env[t_in]);
                self.explore(v + 1, revealed, env);
            } else {
                let newly = self.push(v as Var);
                let new_revealed = revealed | newly;
                let t_in = new_revealed.count_ones() as usize;
                self.add_current(&mut env[t_in]);
                self.explore(v + 1, new_revealed, env);
                self.pop();
            }
            self.tuple.pop();
        }
    }

    fn add_current(&mut self, coeffs: &mut [u64]) {
        let mut sorted = self.tuple.clone();
        sorted.sort_unstable();
        self.ctx.add_tuple(self.c, coeffs, &sorted);
    }
}

/// Keeps the dominant vector: the one whose first differing coefficient is
/// larger (a vector that becomes non-zero earlier dominates).
fn keep_dominant(current: &mut [u64], candidate: &[u64]) {
    let mut replace = false;
    for (a, b) in current.iter().zip(candidate.iter()) {
        if a == b {
            continue;
        }
        if *a == 0 && *b != 0 {
            replace = true;
        } else if *a != 0 && *b == 0 {
            replace = false;
        } else {
            replace = b > a;
        }
        break;
    }
    if replace {
        current.copy_from_slice(candidate);
    }
}

pub fn card_rpc_envelopes(c: &Circuit, coeff_max: Option<usize>) -> Result<CardRpcReport> {
    ensure!(
        c.secret_count == 1 && c.output_count == 1,
        "cardinal RPC envelopes are defined for refresh gadgets (one input, one output)"
    );
    let n = c.share_count;
    let coeff_max = coeff_max.unwrap_or(usize::MAX).min(c.length);
    let total = c.total_wires as usize;
    let mut final_env = vec![vec![vec![0u64; total + 1]; n + 1]; n + 1];

    // Output shares are the trailing wires.
    let outputs: Vec<Var> = (c.length as Var..c.var_count() as Var).collect();

    for t_out in 0..=n {
        let subsets = output_subsets(&outputs, t_out);
        for subset in subsets {
            let mut env = vec![vec![0u64; total + 1]; n + 1];
            let mut builder = EnvBuilder::new(c, coeff_max);
            let mut revealed: ShareMask = 0;
            for &o in &subset {
                revealed |= builder.push(o);
            }
            // The empty internal tuple, together with the chosen outputs.
            env[revealed.count_ones() as usize][0] = 1;
            builder.explore(0, revealed, &mut env);
            for t_in in 0..=n {
                keep_dominant(&mut final_env[t_in][t_out], &env[t_in]);
            }
        }
    }

    Ok(CardRpcReport { env: final_env })
}

fn output_subsets(outputs: &[Var], k: usize) -> Vec<Vec<Var>> {
    use itertools::Itertools;
    outputs.iter().copied().combinations(k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::ModelOptions;
    use crate::parser::ParsedGadget;

    #[test]
    fn test_card_rpc_trivial_refresh() {
        // d_i = a_i + r_i with a circular random: internal wires a0 a1 r0 r1.
        let src = "\
#SHARES 2
#IN a
#RANDOMS r0 r1
#OUT d
d0 = a0 + r0
d1 = a1 + r1
";
        let parsed = ParsedGadget::parse_str(src).unwrap();
        let c = Circuit::build(&parsed, ModelOptions::default()).unwrap();
        let report = card_rpc_envelopes(&c, None).unwrap();
        let n = c.share_count;
        assert_eq!(report.env.len(), n + 1);
        assert_eq!(report.env[0].len(), n + 1);
        // With both output shares observed and no internal probe, nothing
        // is revealed (each output is masked by its own fresh random):
        // the (0, 2) bucket contains the empty tuple.
        assert_eq!(report.env[0][2][0], 1);
        // Probing a0 and a1 reveals both shares with no outputs.
        assert!(report.env[2][0].iter().any(|&x| x > 0));
    }

    #[test]
    fn test_card_rpc_rejects_two_inputs() {
        let src = "\
#SHARES 1
#IN a b
#OUT c
c0 = a0 + b0
";
        let parsed = ParsedGadget::parse_str(src).unwrap();
        let c = Circuit::build(&parsed, ModelOptions::default()).unwrap();
        assert!(card_rpc_envelopes(&c, None).is_err());
    }
}
