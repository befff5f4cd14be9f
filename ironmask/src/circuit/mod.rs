//! The circuit contract: one symbolic dependency row per wire, multiplication
//! records, per-wire weights and random-classification masks. Built once from
//! a [`ParsedGadget`], immutable during verification.

pub mod bits;
pub mod row;

use anyhow::{bail, ensure, Context, Result};
use hashbrown::HashMap;
use ironmask_field::PrimeField;

use crate::parser::{Atom, Equation, Op, ParsedGadget, Term};
pub use bits::{BitRow, CORRECTION_WORDS, MULT_WORDS, RANDOM_WORDS};
pub use row::{Row, RowLayout};

/// Wire identifier: an index into [`Circuit::wires`].
pub type Var = u16;

/// Bitmask over the shares of one input (or one output).
pub type ShareMask = u64;

#[derive(Clone, Copy, Debug, Default)]
pub struct ModelOptions {
    pub glitch: bool,
    pub transition: bool,
}

/// One faulted variable of a fault scenario: the wire is forced to the
/// constant 1 (`set`) or 0 (reset). A faulted input share instead becomes an
/// inconsistent duplicate, tracked by a dedicated row slot.
#[derive(Clone, Debug)]
pub struct FaultVar {
    pub name: String,
    pub set: bool,
}

#[derive(Clone, Debug, Default)]
pub struct FaultScenario {
    pub vars: Vec<FaultVar>,
}

impl FaultScenario {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| v.name.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Wire {
    pub name: String,
    /// The combined symbolic expression of this wire.
    pub expr: Row,
    /// What a probe on this wire observes: a single row normally, the set of
    /// operand atoms under glitches, plus the previous value under
    /// transitions.
    pub rows: Vec<Row>,
    /// Number of physical wires (fan-out based), used by the glitch weighting.
    pub weight: u32,
}

#[derive(Clone, Debug)]
pub struct MultGate {
    pub name: String,
    pub left_expr: Row,
    pub right_expr: Row,
    /// Per input, the union of secret-share masks reachable through either
    /// operand.
    pub contained_secrets: Vec<ShareMask>,
}

/// Which input (or the output) each random refreshes. Indexed by row slot;
/// only random slots are ever set. A row-level query uses the first random
/// of the row, with input-1 taking precedence over input-2 over output.
#[derive(Clone, Debug)]
pub struct RandomClasses {
    pub in1: Vec<bool>,
    pub in2: Vec<bool>,
    pub out: Vec<bool>,
    pub has_input_rands: bool,
}

/// Packed random-class masks for the bitvector engine.
#[derive(Clone, Debug)]
pub struct BitClasses {
    pub out: [u64; RANDOM_WORDS],
    pub in1: [u64; RANDOM_WORDS],
    pub in2: [u64; RANDOM_WORDS],
}

#[derive(Clone, Debug)]
pub struct Circuit {
    pub field: PrimeField,
    pub layout: RowLayout,
    /// All wires; the trailing `output_count * share_count * duplications`
    /// entries are the output shares.
    pub wires: Vec<Wire>,
    /// Number of wires excluding the outputs.
    pub length: usize,
    pub secret_count: usize,
    pub share_count: usize,
    pub output_count: usize,
    pub random_count: usize,
    pub duplications: usize,
    /// Sum of the internal wires' weights.
    pub total_wires: u64,
    pub mults: Vec<MultGate>,
    pub classes: Option<RandomClasses>,
    pub glitch: bool,
    pub transition: bool,
    pub faults_on_inputs: bool,
    /// Packed rows per wire; only populated for GF(2).
    pub bit_rows: Vec<Vec<BitRow>>,
    pub bit_classes: Option<BitClasses>,
    /// Glitch decompositions of the correction-block outputs.
    pub correction_rows: Vec<Vec<Row>>,
}

impl Circuit {
    pub fn var_count(&self) -> usize {
        self.wires.len()
    }

    pub fn contains_mults(&self) -> bool {
        !self.mults.is_empty()
    }

    pub fn all_shares_mask(&self) -> ShareMask {
        (1 << self.share_count) - 1
    }

    pub fn is_output(&self, v: Var) -> bool {
        v as usize >= self.length
    }

    /// Which output this output wire belongs to (0-based).
    pub fn output_index(&self, v: Var) -> usize {
        debug_assert!(self.is_output(v));
        (v as usize - self.length) / (self.share_count * self.duplications)
    }

    /// Share index of an output wire within its output.
    pub fn output_share_index(&self, v: Var) -> usize {
        debug_assert!(self.is_output(v));
        ((v as usize - self.length) / self.duplications) % self.share_count
    }

    pub fn weight(&self, v: Var) -> u32 {
        self.wires[v as usize].weight
    }

    pub fn name(&self, v: Var) -> &str {
        &self.wires[v as usize].name
    }

    pub fn build(parsed: &ParsedGadget, opts: ModelOptions) -> Result<Self> {
        Builder::new(parsed, opts, None)?.run()
    }

    pub fn build_faulted(
        parsed: &ParsedGadget,
        opts: ModelOptions,
        faults: &FaultScenario,
    ) -> Result<Self> {
        Builder::new(parsed, opts, Some(faults))?.run()
    }
}

struct Symbol {
    expr: Row,
    rows: Vec<Row>,
    /// Wire index, `None` for the constants.
    position: Option<usize>,
    split: bool,
}

struct Builder<'a> {
    parsed: &'a ParsedGadget,
    opts: ModelOptions,
    faults: Option<&'a FaultScenario>,
    field: PrimeField,
    layout: RowLayout,
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
    wires: Vec<Wire>,
    mults: Vec<MultGate>,
    correction_rows: Vec<Vec<Row>>,
    faults_on_inputs: bool,
}

impl<'a> Builder<'a> {
    fn new(
        parsed: &'a ParsedGadget,
        opts: ModelOptions,
        faults: Option<&'a FaultScenario>,
    ) -> Result<Self> {
        let field = parsed.field();
        ensure!(
            parsed.shares < 64,
            "share masks are 64-bit; {} shares is beyond the compiled-in maximum",
            parsed.shares
        );
        if faults.is_some() && opts.transition {
            bail!("unsupported combination of transitions and faults");
        }

        let mult_count = parsed
            .equations
            .iter()
            .filter(|e| e.expr.op == Op::Mult && !e.correction)
            .count();
        let correction_count = parsed
            .equations
            .iter()
            .filter(|e| e.correction_output)
            .count();

        // Faults on input shares need the duplicated-share slots.
        let share_names: Vec<String> = input_share_names(parsed).map(|(n, _, _, _)| n).collect();
        let faults_on_inputs = faults.map_or(false, |fv| {
            fv.vars.iter().any(|v| share_names.contains(&v.name))
        });

        let layout = RowLayout {
            secret_count: parsed.inputs.len(),
            share_count: parsed.shares,
            duplications: parsed.duplications,
            dup_shares: faults_on_inputs,
            random_count: parsed.randoms.len(),
            mult_count,
            correction_count,
        };

        Ok(Self {
            parsed,
            opts,
            faults,
            field,
            layout,
            symbols: Vec::new(),
            by_name: HashMap::new(),
            wires: Vec::new(),
            mults: Vec::new(),
            correction_rows: Vec::new(),
            faults_on_inputs,
        })
    }

    fn add_symbol(&mut self, name: String, expr: Row, rows: Vec<Row>, wire: bool) -> usize {
        let position = if wire {
            self.wires.push(Wire {
                name: name.clone(),
                expr: expr.clone(),
                rows: rows.clone(),
                weight: 0,
            });
            Some(self.wires.len() - 1)
        } else {
            None
        };
        self.symbols.push(Symbol {
            expr,
            rows,
            position,
            split: false,
        });
        let id = self.symbols.len() - 1;
        self.by_name.insert(name, id);
        id
    }

    fn lookup(&self, name: &str, line: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .with_context(|| format!("unknown identifier '{name}' in '{line}'"))
    }

    fn fault_for(&self, name: &str) -> Option<&'a FaultVar> {
        self.faults
            .and_then(|fv| fv.vars.iter().find(|v| v.name == name))
    }

    fn term_row(&self, term: &Term, line: &str) -> Result<(Row, Option<usize>)> {
        match &term.atom {
            Atom::Const(c) => {
                let value = self.field.mul(term.coeff, *c);
                Ok((Row::constant(&self.layout, value), None))
            }
            Atom::Var(name) => {
                let id = self.lookup(name, line)?;
                let mut row = self.symbols[id].expr.clone();
                row.scale(term.coeff, self.field);
                Ok((row, Some(id)))
            }
        }
    }

    fn run(mut self) -> Result<Circuit> {
        let parsed = self.parsed;
        let layout = self.layout.clone();
        let field = self.field;

        // Constants "0" and "1" are always in scope.
        for value in 0..2u16 {
            self.add_symbol(
                value.to_string(),
                Row::constant(&layout, field.canonicalize(value as i64)),
                Vec::new(),
                false,
            );
        }

        // Input share wires.
        let shares: Vec<(String, usize, usize, usize)> = input_share_names(parsed)
            .map(|(n, i, s, d)| (n.to_string(), i, s, d))
            .collect();
        for (name, input, share, dup) in shares {
            let mut expr = Row::unit(&layout, layout.share_slot(input, share));
            if self.fault_for(&name).is_some() {
                // A faulted duplicate no longer carries the share: it becomes
                // an independent symbol that cannot cancel against its
                // siblings. Whether the fault sets or resets does not matter
                // at this level.
                expr = Row::unit(&layout, layout.dup_share_slot(input, share, dup));
            }
            let rows = vec![expr.clone()];
            self.add_symbol(name, expr, rows, true);
        }

        // Random wires.
        for (r, name) in parsed.randoms.iter().enumerate() {
            let mut expr = Row::unit(&layout, layout.random_slot(r));
            if let Some(fault) = self.fault_for(name) {
                expr = Row::constant(&layout, if fault.set { 1 } else { 0 });
            }
            let rows = vec![expr.clone()];
            self.add_symbol(name.clone(), expr, rows, true);
        }

        let mut mult_idx = 0usize;
        let mut corr_idx = 0usize;

        for eq in &parsed.equations {
            self.process_equation(eq, &mut mult_idx, &mut corr_idx)?;
        }

        // Move the output shares to the end of the wire list.
        let output_names: Vec<String> = output_share_names(parsed).collect();
        let mut is_out = vec![false; self.wires.len()];
        for name in &output_names {
            let id = self
                .by_name
                .get(name.as_str())
                .copied()
                .with_context(|| format!("output share '{name}' is never assigned"))?;
            let pos = self.symbols[id]
                .position
                .with_context(|| format!("output share '{name}' is not a wire"))?;
            is_out[pos] = true;
        }

        let mut order: Vec<usize> = (0..self.wires.len()).filter(|&i| !is_out[i]).collect();
        let internal_len = order.len();
        order.extend((0..self.wires.len()).filter(|&i| is_out[i]));

        let mut wires = Vec::with_capacity(self.wires.len());
        for &old in &order {
            let mut w = self.wires[old].clone();
            w.weight = w.weight.max(1);
            wires.push(w);
        }

        ensure!(
            wires.len() <= Var::MAX as usize + 1,
            "this circuit contains more than {} variables and cannot be processed; \
             change Var to a wider integer and rebuild",
            Var::MAX as usize + 1
        );

        let total_wires: u64 = wires[..internal_len].iter().map(|w| w.weight as u64).sum();

        let mut circuit = Circuit {
            field,
            layout,
            wires,
            length: internal_len,
            secret_count: parsed.inputs.len(),
            share_count: parsed.shares,
            output_count: parsed.outputs.len(),
            random_count: parsed.randoms.len(),
            duplications: parsed.duplications,
            total_wires,
            mults: self.mults,
            classes: None,
            glitch: self.opts.glitch,
            transition: self.opts.transition,
            faults_on_inputs: self.faults_on_inputs,
            bit_rows: Vec::new(),
            bit_classes: None,
            correction_rows: self.correction_rows,
        };

        compute_contained_secrets(&mut circuit);
        compute_random_classes(&mut circuit);
        compute_bit_rows(&mut circuit)?;
        Ok(circuit)
    }

    fn process_equation(
        &mut self,
        eq: &Equation,
        mult_idx: &mut usize,
        corr_idx: &mut usize,
    ) -> Result<()> {
        let layout = self.layout.clone();
        let field = self.field;
        let line = &eq.dst;

        let (left_row, left_id) = self.term_row(&eq.expr.left, line)?;
        let (right_row, right_id) = match &eq.expr.right {
            Some(t) => {
                let (r, id) = self.term_row(t, line)?;
                (Some(r), id)
            }
            None => (None, None),
        };

        let mut split = left_id.map_or(false, |id| self.symbols[id].split)
            || right_id.map_or(false, |id| self.symbols[id].split);

        let mut expr = match eq.expr.op {
            Op::Assign => left_row.clone(),
            Op::Add => {
                let mut row = left_row.clone();
                row.add_scaled(right_row.as_ref().unwrap(), 1, field);
                row
            }
            Op::Mult if !eq.correction => {
                let right_row = right_row.as_ref().unwrap();
                ensure!(
                    !left_row.has_mult(&layout) && !right_row.has_mult(&layout),
                    "unsupported mult. variable {}: multiplicative depth > 1",
                    eq.dst
                );
                self.mults.push(MultGate {
                    name: eq.dst.clone(),
                    left_expr: left_row.clone(),
                    right_expr: right_row.clone(),
                    contained_secrets: Vec::new(),
                });
                let row = Row::unit(&layout, layout.mult_slot(*mult_idx));
                *mult_idx += 1;
                // A constant operand keeps the multiplication linear.
                if is_constant_row(&left_row, &layout) {
                    split = left_row.get(layout.constant_slot()) != 0
                        && right_id.map_or(false, |id| self.symbols[id].split);
                } else if is_constant_row(right_row, &layout) {
                    split = right_row.get(layout.constant_slot()) != 0
                        && left_id.map_or(false, |id| self.symbols[id].split);
                }
                row
            }
            Op::Mult => {
                // Correction-block multiplication: the AND of two redundant
                // copies of the same value. Fault-free, it computes that
                // value; once a fault made the copies diverge, the result is
                // no longer expressible linearly and the wire is split.
                let right_row = right_row.as_ref().unwrap();
                if left_row == *right_row {
                    split = false;
                    left_row.clone()
                } else if is_constant_row(&left_row, &layout) {
                    if left_row.get(layout.constant_slot()) != 0 {
                        right_row.clone()
                    } else {
                        split = false;
                        Row::zero(&layout)
                    }
                } else if is_constant_row(right_row, &layout) {
                    if right_row.get(layout.constant_slot()) != 0 {
                        left_row.clone()
                    } else {
                        split = false;
                        Row::zero(&layout)
                    }
                } else {
                    split = true;
                    Row::zero(&layout)
                }
            }
        };

        // A faulted wire computes a constant no matter its expression.
        let mut faulted = false;
        if let Some(fault) = self.fault_for(&eq.dst) {
            expr = Row::constant(&layout, if fault.set { 1 } else { 0 });
            split = false;
            faulted = true;
        }

        // A split correction output exposes a fresh correction symbol
        // instead of its (now fault-dependent) expression.
        let mut correction_glitch_rows = Vec::new();
        if eq.correction_output {
            if split && !faulted {
                expr = Row::unit(&layout, layout.correction_slot(*corr_idx));
                correction_glitch_rows = self.operand_glitch_rows(left_id, right_id);
            }
            self.correction_rows.push(correction_glitch_rows);
            *corr_idx += 1;
        }

        // Glitch and transition decomposition of what a probe observes.
        let mut rows = if faulted || ((!self.opts.glitch || eq.anti_glitch) && !split) {
            vec![expr.clone()]
        } else {
            self.operand_glitch_rows(left_id, right_id)
        };
        if self.opts.transition && !faulted {
            if let Some(&prev) = self.by_name.get(eq.dst.as_str()) {
                rows.push(self.symbols[prev].expr.clone());
            }
        }
        if rows.is_empty() {
            rows.push(expr.clone());
        }

        // Fan-out weights: first use costs one wire, further uses two.
        for id in [left_id, right_id].into_iter().flatten() {
            if let Some(pos) = self.symbols[id].position {
                let w = &mut self.wires[pos].weight;
                *w += if *w == 0 { 1 } else { 2 };
            }
        }

        let id = self.add_symbol(eq.dst.clone(), expr, rows, true);
        self.symbols[id].split = split;
        Ok(())
    }

    fn operand_glitch_rows(&self, left: Option<usize>, right: Option<usize>) -> Vec<Row> {
        let mut rows: Vec<Row> = Vec::new();
        for id in [left, right].into_iter().flatten() {
            for r in &self.symbols[id].rows {
                if !rows.contains(r) {
                    rows.push(r.clone());
                }
            }
        }
        rows
    }
}

fn is_constant_row(row: &Row, layout: &RowLayout) -> bool {
    row.slots()[..layout.constant_slot()].iter().all(|&c| c == 0)
}

fn input_share_names(
    parsed: &ParsedGadget,
) -> impl Iterator<Item = (String, usize, usize, usize)> + '_ {
    parsed.inputs.iter().enumerate().flat_map(move |(i, name)| {
        (0..parsed.shares).flat_map(move |s| {
            (0..parsed.duplications).map(move |d| {
                let wire_name = if parsed.duplications <= 1 {
                    format!("{name}{s}")
                } else {
                    format!("{name}{s}_{d}")
                };
                (wire_name, i, s, d)
            })
        })
    })
}

fn output_share_names(parsed: &ParsedGadget) -> impl Iterator<Item = String> + '_ {
    parsed.outputs.iter().flat_map(move |name| {
        (0..parsed.shares).flat_map(move |s| {
            (0..parsed.duplications).map(move |d| {
                if parsed.duplications <= 1 {
                    format!("{name}{s}")
                } else {
                    format!("{name}{s}_{d}")
                }
            })
        })
    })
}

fn compute_contained_secrets(c: &mut Circuit) {
    let layout = c.layout.clone();
    let secret_count = c.secret_count;
    for mult in &mut c.mults {
        let mut contained = vec![0 as ShareMask; secret_count];
        for input in 0..secret_count {
            contained[input] =
                mult.left_expr.share_mask(&layout, input) | mult.right_expr.share_mask(&layout, input);
        }
        mult.contained_secrets = contained;
    }
}

/// Classifies every random as refreshing input 1, input 2 or the output of a
/// multiplication gadget. A random seen in an expression next to input
/// shares joins that input's class; one seen next to a multiplication column
/// joins the output class; anything still unclassified inherits transitively
/// from the wires it appears in, and defaults to the output class.
fn compute_random_classes(c: &mut Circuit) {
    if !c.contains_mults() {
        return;
    }
    let layout = c.layout.clone();
    let width = layout.first_mult();
    let mut in1 = vec![false; width];
    let mut in2 = vec![false; width];
    let mut out = vec![false; width];
    let mut has_input_rands = false;

    for wire in &c.wires {
        let expr = &wire.expr;
        let touches_in1 = expr.share_mask(&layout, 0) != 0;
        let touches_in2 = c.secret_count > 1 && expr.share_mask(&layout, 1) != 0;
        let touches_mult = expr.has_mult(&layout);
        for slot in layout.first_random()..layout.first_mult() {
            if expr.get(slot) == 0 {
                continue;
            }
            if touches_in1 {
                in1[slot] = true;
                has_input_rands = true;
            }
            if touches_in2 {
                in2[slot] = true;
                has_input_rands = true;
            }
            if touches_mult {
                out[slot] = true;
            }
        }
    }

    // Transitive closure for randoms only ever combined with other randoms
    // (e.g. `r = r0 + r1` used to refresh an input).
    let mut changed = true;
    while changed {
        changed = false;
        for wire in &c.wires {
            let expr = &wire.expr;
            let slots: Vec<usize> = (layout.first_random()..layout.first_mult())
                .filter(|&s| expr.get(s) != 0)
                .collect();
            if slots.len() < 2 {
                continue;
            }
            let any_in1 = slots.iter().any(|&s| in1[s]);
            let any_in2 = slots.iter().any(|&s| in2[s]);
            let any_out = slots.iter().any(|&s| out[s]);
            for &s in &slots {
                if any_in1 && !in1[s] {
                    in1[s] = true;
                    changed = true;
                }
                if any_in2 && !in2[s] {
                    in2[s] = true;
                    changed = true;
                }
                if any_out && !out[s] {
                    out[s] = true;
                    changed = true;
                }
            }
        }
    }
    for slot in layout.first_random()..layout.first_mult() {
        if !in1[slot] && !in2[slot] && !out[slot] {
            out[slot] = true;
        }
    }

    c.classes = Some(RandomClasses {
        in1,
        in2,
        out,
        has_input_rands,
    });
}

fn compute_bit_rows(c: &mut Circuit) -> Result<()> {
    if !c.field.is_binary() {
        return Ok(());
    }
    let layout = c.layout.clone();
    let mut bit_rows = Vec::with_capacity(c.wires.len());
    for wire in &c.wires {
        let rows: Result<Vec<BitRow>> =
            wire.rows.iter().map(|r| BitRow::from_row(r, &layout)).collect();
        bit_rows.push(rows?);
    }
    c.bit_rows = bit_rows;

    if let Some(classes) = &c.classes {
        let mut bits = BitClasses {
            out: [0; RANDOM_WORDS],
            in1: [0; RANDOM_WORDS],
            in2: [0; RANDOM_WORDS],
        };
        for r in 0..c.random_count {
            let slot = layout.random_slot(r);
            // Exclusive masks: output class takes precedence, then input 1.
            if classes.out[slot] {
                bits.out[r / 64] |= 1 << (r % 64);
            } else if classes.in1[slot] {
                bits.in1[r / 64] |= 1 << (r % 64);
            } else if classes.in2[slot] {
                bits.in2[r / 64] |= 1 << (r % 64);
            }
        }
        c.bit_classes = Some(bits);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedGadget;

    fn build(src: &str) -> Circuit {
        let parsed = ParsedGadget::parse_str(src).unwrap();
        Circuit::build(&parsed, ModelOptions::default()).unwrap()
    }

    const REFRESH: &str = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d
d0 = a0 + r0
d1 = a1 + r0
";

    #[test]
    fn test_refresh_circuit_shape() {
        let c = build(REFRESH);
        assert_eq!(c.var_count(), 5); // a0 a1 r0 | d0 d1
        assert_eq!(c.length, 3);
        assert_eq!(c.share_count, 2);
        assert_eq!(c.random_count, 1);
        assert!(!c.contains_mults());
        // Outputs last, internals keep their order.
        assert_eq!(c.name(0), "a0");
        assert_eq!(c.name(1), "a1");
        assert_eq!(c.name(2), "r0");
        assert_eq!(c.name(3), "d0");
        assert_eq!(c.name(4), "d1");
        assert!(c.is_output(3) && c.is_output(4));
        assert_eq!(c.output_share_index(4), 1);
    }

    #[test]
    fn test_refresh_rows() {
        let c = build(REFRESH);
        let l = &c.layout;
        let d0 = &c.wires[3].expr;
        assert_eq!(d0.get(l.share_slot(0, 0)), 1);
        assert_eq!(d0.get(l.share_slot(0, 1)), 0);
        assert_eq!(d0.get(l.random_slot(0)), 1);
        let d1 = &c.wires[4].expr;
        assert_eq!(d1.get(l.share_slot(0, 1)), 1);
        assert_eq!(d1.get(l.random_slot(0)), 1);
    }

    #[test]
    fn test_weights_and_total_wires() {
        let c = build(REFRESH);
        // a0 and a1 are used once, r0 twice (1 + 2), outputs unused.
        assert_eq!(c.weight(0), 1);
        assert_eq!(c.weight(1), 1);
        assert_eq!(c.weight(2), 3);
        assert_eq!(c.total_wires, 5);
    }

    const ISW2: &str = "\
#SHARES 2
#IN a b
#RANDOMS r0
#OUT c
t00 = a0 * b0
t01 = a0 * b1
t10 = a1 * b0
t11 = a1 * b1
u01 = t01 + r0
u10 = t10 + u01
c0 = t00 + r0
c1 = t11 + u10
";

    #[test]
    fn test_mult_gates() {
        let c = build(ISW2);
        assert_eq!(c.mults.len(), 4);
        assert_eq!(c.mults[1].name, "t01");
        assert_eq!(c.mults[1].contained_secrets[0], 0b01); // a0
        assert_eq!(c.mults[1].contained_secrets[1], 0b10); // b1
        let l = &c.layout;
        // t01's expression is a unit on its mult slot.
        let t01 = c.wires.iter().find(|w| w.name == "t01").unwrap();
        assert_eq!(t01.expr.get(l.mult_slot(1)), 1);
        assert!(t01.expr.share_mask(l, 0) == 0);
    }

    #[test]
    fn test_random_classes() {
        let c = build(ISW2);
        let classes = c.classes.as_ref().unwrap();
        let slot = c.layout.random_slot(0);
        // r0 only ever appears next to multiplication columns.
        assert!(classes.out[slot]);
        assert!(!classes.in1[slot]);
        assert!(!classes.has_input_rands);
        let bits = c.bit_classes.as_ref().unwrap();
        assert_eq!(bits.out[0], 1);
    }

    #[test]
    fn test_mult_depth_rejected() {
        let src = "\
#SHARES 1
#IN a b
#OUT c
t = a0 * b0
c0 = t * b0
";
        let parsed = ParsedGadget::parse_str(src).unwrap();
        assert!(Circuit::build(&parsed, ModelOptions::default()).is_err());
    }

    #[test]
    fn test_glitch_decomposition() {
        let parsed = ParsedGadget::parse_str(REFRESH).unwrap();
        let c = Circuit::build(
            &parsed,
            ModelOptions {
                glitch: true,
                transition: false,
            },
        )
        .unwrap();
        // Under glitches, probing d0 observes the atoms {a0, r0}.
        let d0 = &c.wires[3];
        assert_eq!(d0.rows.len(), 2);
        let l = &c.layout;
        assert!(d0.rows.iter().any(|r| r.get(l.share_slot(0, 0)) == 1
            && r.get(l.random_slot(0)) == 0));
        assert!(d0.rows.iter().any(|r| r.get(l.random_slot(0)) == 1
            && r.get(l.share_slot(0, 0)) == 0));
    }

    #[test]
    fn test_anti_glitch_keeps_combined_row() {
        let src = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d
d0 = ![ a0 + r0 ]
d1 = a1 + r0
";
        let parsed = ParsedGadget::parse_str(src).unwrap();
        let c = Circuit::build(
            &parsed,
            ModelOptions {
                glitch: true,
                transition: false,
            },
        )
        .unwrap();
        let d0 = c.wires.iter().find(|w| w.name == "d0").unwrap();
        assert_eq!(d0.rows.len(), 1);
        let d1 = c.wires.iter().find(|w| w.name == "d1").unwrap();
        assert_eq!(d1.rows.len(), 2);
    }

    #[test]
    fn test_faulted_wire_is_constant() {
        let parsed = ParsedGadget::parse_str(REFRESH).unwrap();
        let scenario = FaultScenario {
            vars: vec![FaultVar {
                name: "r0".into(),
                set: true,
            }],
        };
        let c = Circuit::build_faulted(&parsed, ModelOptions::default(), &scenario).unwrap();
        let r0 = c.wires.iter().find(|w| w.name == "r0").unwrap();
        let l = &c.layout;
        assert_eq!(r0.expr.get(l.random_slot(0)), 0);
        assert_eq!(r0.expr.get(l.constant_slot()), 1);
        // d0 = a0 + r0 now leaks a0 masked by a constant.
        let d0 = c.wires.iter().find(|w| w.name == "d0").unwrap();
        assert_eq!(d0.expr.get(l.random_slot(0)), 0);
        assert_eq!(d0.expr.get(l.constant_slot()), 1);
        assert_eq!(d0.expr.get(l.share_slot(0, 0)), 1);
    }

    #[test]
    fn test_arith_coefficients() {
        let src = "\
#SHARES 2
#CHARACTERISTIC 7
#IN a
#RANDOMS r0
#OUT d
d0 = 3 a0 + 2 r0
d1 = a1 + 5 r0
";
        let c = build(src);
        let l = &c.layout;
        let d0 = c.wires.iter().find(|w| w.name == "d0").unwrap();
        assert_eq!(d0.expr.get(l.share_slot(0, 0)), 3);
        assert_eq!(d0.expr.get(l.random_slot(0)), 2);
    }
}
