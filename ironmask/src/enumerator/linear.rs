//! Constructive search for gadgets without multiplications: one Gaussian
//! elimination over the tuple rows, pivots on any random.

use std::sync::Mutex;

use crate::circuit::{Circuit, ShareMask, Var};
use crate::enumerator::{record_failure, Columns, SearchConfig};
use crate::gauss::GaussState;
use crate::trie::Trie;

pub(crate) struct LinearSearch<'a> {
    c: &'a Circuit,
    cfg: &'a SearchConfig,
    columns: &'a Columns,
    trie: &'a Mutex<Trie>,
    secret_idx: usize,
    tuple: Vec<Var>,
    gauss: GaussState,
    /// Gaussian row offset per synced tuple position.
    offsets: Vec<usize>,
}

impl<'a> LinearSearch<'a> {
    pub fn new(
        c: &'a Circuit,
        cfg: &'a SearchConfig,
        columns: &'a Columns,
        trie: &'a Mutex<Trie>,
        secret_idx: usize,
    ) -> Self {
        Self {
            c,
            cfg,
            columns,
            trie,
            secret_idx,
            tuple: Vec::new(),
            gauss: GaussState::for_circuit(c),
            offsets: Vec::new(),
        }
    }

    pub fn run(&mut self, target_size: usize, prefix: &[Var], restrict_branch: Option<usize>) {
        self.tuple.clear();
        self.tuple.extend_from_slice(prefix);
        self.gauss.truncate(0);
        self.offsets.clear();
        self.secrets_step(
            self.c.share_count as isize - 1,
            0,
            self.cfg.required_outputs,
            self.cfg.required_outputs_2,
            target_size,
            restrict_branch,
        );
    }

    fn share_column(&self, share_idx: isize) -> &'a [Var] {
        &self.columns.secrets[self.secret_idx * self.c.share_count + share_idx as usize]
    }

    /// Appends a wire and its reduced rows.
    fn push_tuple(&mut self, w: Var) -> (usize, usize) {
        debug_assert_eq!(self.offsets.len(), self.tuple.len());
        self.tuple.push(w);
        self.offsets.push(self.gauss.len());
        self.gauss.push_wire(self.c, w, None)
    }

    fn pop_tuple(&mut self) {
        self.tuple.pop();
        if self.offsets.len() > self.tuple.len() {
            let off = self.offsets[self.tuple.len()];
            self.gauss.truncate(off);
            self.offsets.truncate(self.tuple.len());
        }
    }

    /// Catches the elimination up with tuple positions pushed without rows
    /// (the secrets step defers elimination until a base tuple is complete).
    fn sync_gauss(&mut self) {
        for i in self.offsets.len()..self.tuple.len() {
            self.offsets.push(self.gauss.len());
            self.gauss.push_wire(self.c, self.tuple[i], None);
        }
    }

    fn studied_mask(&self, row_idx: usize) -> ShareMask {
        self.gauss.row(row_idx).share_mask(&self.c.layout, self.secret_idx)
    }

    fn secrets_step(
        &mut self,
        next_share_idx: isize,
        selected: usize,
        required: i64,
        required_2: i64,
        target_size: usize,
        restrict_branch: Option<usize>,
    ) {
        let cfg = self.cfg;
        let c = self.c;
        if next_share_idx == -1 || self.tuple.len() == target_size || selected == cfg.t_in {
            if selected != cfg.t_in {
                // Out of room: only wires already in the tuple (or free
                // output probes in RPC mode) can still raise the share
                // count.
                if next_share_idx != -1 {
                    let column = self.share_column(next_share_idx);
                    let mut already_in = false;
                    for &w in column {
                        if self.tuple.contains(&w) {
                            if already_in {
                                continue;
                            }
                            already_in = true;
                            self.secrets_step(
                                next_share_idx - 1,
                                selected + 1,
                                required,
                                required_2,
                                target_size,
                                None,
                            );
                        } else if c.is_output(w) && cfg.rpc_mode && required > 0 {
                            self.tuple.push(w);
                            self.secrets_step(
                                next_share_idx - 1,
                                selected + 1,
                                required - 1,
                                required_2,
                                target_size + 1,
                                None,
                            );
                            self.pop_tuple();
                        }
                    }
                    self.secrets_step(
                        next_share_idx - 1,
                        selected,
                        required,
                        required_2,
                        target_size,
                        None,
                    );
                }
                return;
            }
            // A tuple that must still absorb mandatory outputs is not
            // evaluated yet.
            if !cfg.rpc_mode && required > 0 && required_2 == -1 {
                return;
            }
            self.evaluate(required, required_2, target_size);
        } else {
            let mut branch = 0usize;
            let mut take = |b: &mut usize| {
                let mine = *b;
                *b += 1;
                restrict_branch.map_or(true, |r| r == mine)
            };

            // Skipping the current share, if enough columns remain.
            if next_share_idx >= (cfg.t_in - selected) as isize && take(&mut branch) {
                self.secrets_step(
                    next_share_idx - 1,
                    selected,
                    required,
                    required_2,
                    target_size,
                    None,
                );
            }

            let column = self.share_column(next_share_idx);
            let mut already_in = false;
            for &w in column {
                let chosen = take(&mut branch);
                if self.tuple.contains(&w) {
                    if already_in {
                        continue;
                    }
                    already_in = true;
                    if !chosen {
                        continue;
                    }
                    self.secrets_step(
                        next_share_idx - 1,
                        selected + 1,
                        required,
                        required_2,
                        target_size,
                        None,
                    );
                } else {
                    if !chosen {
                        continue;
                    }
                    let mut req = required;
                    let mut req2 = required_2;
                    let mut ts = target_size;
                    if c.is_output(w) && required >= 0 {
                        if c.output_count == 1 || cfg.rpc_mode || required_2 == -1 {
                            if req == 0 {
                                continue;
                            }
                            req -= 1;
                            if cfg.rpc_mode {
                                ts += 1;
                            }
                        } else {
                            // Copy gadget: each output has its own budget.
                            let first_block = c.length + c.share_count * c.duplications;
                            if (w as usize) < first_block {
                                if req == 0 {
                                    continue;
                                }
                                req -= 1;
                            } else {
                                if req2 == 0 {
                                    continue;
                                }
                                req2 -= 1;
                            }
                            ts += 1;
                        }
                    }
                    self.tuple.push(w);
                    self.secrets_step(next_share_idx - 1, selected + 1, req, req2, ts, None);
                    self.pop_tuple();
                }
            }
        }
    }

    fn evaluate(&mut self, required: i64, required_2: i64, target_size: usize) {
        self.sync_gauss();
        let mut revealed: ShareMask = 0;
        for i in 0..self.gauss.len() {
            if self.gauss.pivot(i).is_none() {
                revealed |= self.studied_mask(i);
            }
        }
        self.randoms_step(0, revealed, required, required_2, target_size, false);
    }

    fn randoms_step(
        &mut self,
        unmask_idx: usize,
        revealed: ShareMask,
        required: i64,
        required_2: i64,
        target_size: usize,
        fill_only_with_output: bool,
    ) {
        let cfg = self.cfg;
        let c = self.c;
        if self.tuple.len() > target_size {
            return;
        }
        if cfg.include_outputs && required < 0 {
            return;
        }

        if revealed.count_ones() as usize >= cfg.t_in {
            record_failure(self.trie, c, &self.tuple, self.secret_idx, revealed);
            return;
        }
        if unmask_idx == self.gauss.len() {
            return;
        }
        let mut fill_only = fill_only_with_output;
        if self.tuple.len() == target_size {
            if cfg.include_outputs {
                fill_only = true;
            } else {
                return;
            }
        }

        // Skipping the element: some later row may expose its shares.
        self.randoms_step(
            unmask_idx + 1,
            revealed,
            required,
            required_2,
            target_size,
            fill_only,
        );

        let rand = match self.gauss.pivot(unmask_idx) {
            Some(r) => r,
            None => return,
        };
        let columns = self.columns;
        for &w in &columns.randoms[rand] {
            if self.tuple.contains(&w) {
                continue;
            }
            if fill_only && !c.is_output(w) {
                continue;
            }
            let mut req = required;
            let mut req2 = required_2;
            let mut ts = target_size;
            if c.is_output(w) {
                if req2 == -1 {
                    if req <= 0 {
                        continue;
                    }
                    req -= 1;
                } else {
                    let first_block = c.length + c.share_count * c.duplications;
                    if (w as usize) < first_block {
                        if req <= 0 {
                            continue;
                        }
                        req -= 1;
                    } else {
                        if req2 <= 0 {
                            continue;
                        }
                        req2 -= 1;
                    }
                }
                ts += 1;
            }

            let (start, end) = self.push_tuple(w);

            // The elimination may have cancelled the studied shares the new
            // wire was supposed to bring.
            let has_share = (start..end).any(|i| self.studied_mask(i) != 0);
            if !has_share {
                self.pop_tuple();
                continue;
            }
            let mut new_revealed = revealed;
            for i in start..end {
                if self.gauss.pivot(i).is_none() {
                    new_revealed |= self.studied_mask(i);
                }
            }
            self.randoms_step(unmask_idx + 1, new_revealed, req, req2, ts, fill_only);
            self.pop_tuple();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::ModelOptions;
    use crate::enumerator::{build_columns, incompressible_tuples};
    use crate::parser::ParsedGadget;

    fn build(src: &str) -> Circuit {
        let parsed = ParsedGadget::parse_str(src).unwrap();
        Circuit::build(&parsed, ModelOptions::default()).unwrap()
    }

    // Wires: a0 a1 r0 | t0 t1 | d0 d1 (outputs last). The sum of the two
    // output shares cancels r0.
    const REFRESH2: &str = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d
d0 = a0 + r0
d1 = a1 + r0
";

    #[test]
    fn test_columns() {
        let c = build(REFRESH2);
        let cols = build_columns(&c, false);
        // Share a0 is observed by wire 0 only among internal wires.
        assert_eq!(cols.secrets[0], vec![0]);
        assert_eq!(cols.secrets[1], vec![1]);
        // r0 is observed by itself.
        let r0_slot = c.layout.random_slot(0);
        assert_eq!(cols.randoms[r0_slot], vec![2]);
        let cols_out = build_columns(&c, true);
        assert_eq!(cols_out.secrets[0], vec![0, 3]);
        assert_eq!(cols_out.randoms[r0_slot], vec![2, 3, 4]);
    }

    #[test]
    fn test_refresh_incompressibles() {
        let c = build(REFRESH2);
        let cfg = SearchConfig::random_probing(c.share_count, c.length);
        let trie = incompressible_tuples(&c, &cfg, &[0], &[], false).unwrap();
        // The only incompressible failure among internal wires is {a0, a1}.
        assert_eq!(trie.len(), 1);
        assert_eq!(trie.get(&[0, 1]), Some(&[0b11u64][..]));
    }

    #[test]
    fn test_masked_wire_needs_unmasking() {
        // t = a0 + r0 forces the search to pull in r0 (or d1) to unmask.
        let src = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d
t0 = a0 + r0
d0 = t0
d1 = a1
";
        let c = build(src);
        let cfg = SearchConfig::random_probing(c.share_count, c.length);
        let trie = incompressible_tuples(&c, &cfg, &[0], &[], false).unwrap();
        // Internal wires: a0(0) a1(1) r0(2) t0(3).
        // Failures: {a0, a1}, {a1, t0, r0}.
        assert_eq!(trie.get(&[0, 1]), Some(&[0b11u64][..]));
        assert!(trie.get(&[1, 2, 3]).is_some());
        assert_eq!(trie.len(), 2);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let c = build(REFRESH2);
        let cfg = SearchConfig::random_probing(c.share_count, c.length);
        let seq = incompressible_tuples(&c, &cfg, &[0], &[], false).unwrap();
        let par = incompressible_tuples(&c, &cfg, &[0], &[], true).unwrap();
        let mut a = seq.all_tuples();
        let mut b = par.all_tuples();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn test_outputs_allowed_in_rpc_mode() {
        let c = build(REFRESH2);
        // t_in = 2, one output probe allowed: {a0, d1} reveals a0 and, with
        // d1 = a1 + r0 unmasked by... it does not reveal a1 alone; but
        // {d0, d1} (two outputs) exceeds the budget of 1, so the pair
        // {a1, d0} is the interesting incompressible with one output.
        let cfg = SearchConfig::with_outputs(2, c.length, 1);
        let trie = incompressible_tuples(&c, &cfg, &[0], &[], false).unwrap();
        // {a0(0), a1(1)} still found; {a0(0), r0(2), d1(6)} style tuples
        // must respect the budget: every stored tuple has at most 1 output.
        assert!(trie.get(&[0, 1]).is_some());
        let mut max_outputs = 0;
        trie.for_each(|t, _| {
            let outs = t.iter().filter(|&&v| c.is_output(v)).count();
            max_outputs = max_outputs.max(outs);
        });
        assert!(max_outputs <= 1);
    }
}
