//! Incremental Gaussian elimination over dependency rows.
//!
//! The eliminator is persistent: appending a row only reduces the new row
//! against the already-reduced prefix, and rewinding to a previous length
//! restores the exact earlier state. This is what makes the backtracking
//! search affordable, since a recursion step only pays for the rows it adds.

use ironmask_field::PrimeField;

use crate::circuit::bits::{BitRow, RANDOM_WORDS};
use crate::circuit::row::{Row, RowLayout};
use crate::circuit::{Circuit, Var};

/// Echelon state over coefficient rows. `pivots[i]` is the random slot that
/// masks row `i`, or `None` when the row has no (eligible) random left.
#[derive(Clone, Debug)]
pub struct GaussState {
    layout: RowLayout,
    field: PrimeField,
    rows: Vec<Row>,
    pivots: Vec<Option<usize>>,
}

impl GaussState {
    pub fn new(layout: RowLayout, field: PrimeField) -> Self {
        Self {
            layout,
            field,
            rows: Vec::new(),
            pivots: Vec::new(),
        }
    }

    pub fn for_circuit(c: &Circuit) -> Self {
        Self::new(c.layout.clone(), c.field)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, i: usize) -> &Row {
        &self.rows[i]
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn pivot(&self, i: usize) -> Option<usize> {
        self.pivots[i]
    }

    /// Reduces `src` against the current echelon and appends it. The pivot is
    /// chosen as the lowest-index random of the reduced row, restricted to
    /// `class` when given; pivoted rows are normalized so their pivot
    /// coefficient is 1.
    pub fn push_row(&mut self, src: &Row, class: Option<&[bool]>) -> usize {
        let mut row = src.clone();
        for i in 0..self.rows.len() {
            if let Some(p) = self.pivots[i] {
                let k = row.get(p);
                if k != 0 {
                    row.sub_scaled(&self.rows[i], k, self.field);
                }
            }
        }
        let pivot = row.first_random(&self.layout, class);
        if let Some(p) = pivot {
            let inv = self.field.inverse(row.get(p));
            if inv != 1 {
                row.scale(inv, self.field);
            }
        }
        self.rows.push(row);
        self.pivots.push(pivot);
        self.rows.len() - 1
    }

    /// Pushes every observation row of wire `v`; returns the index range of
    /// the appended rows.
    pub fn push_wire(&mut self, c: &Circuit, v: Var, class: Option<&[bool]>) -> (usize, usize) {
        let start = self.rows.len();
        for row in &c.wires[v as usize].rows {
            self.push_row(row, class);
        }
        (start, self.rows.len())
    }

    /// Rewinds to a previous state.
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
        self.pivots.truncate(len);
    }
}

/// Echelon state over packed rows (GF(2) only).
#[derive(Clone, Debug, Default)]
pub struct BitGauss {
    rows: Vec<BitRow>,
    pivots: Vec<Option<(usize, u64)>>,
}

impl BitGauss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, i: usize) -> &BitRow {
        &self.rows[i]
    }

    pub fn is_pivoted(&self, i: usize) -> bool {
        self.pivots[i].is_some()
    }

    pub fn push_row(&mut self, src: &BitRow, class: Option<&[u64; RANDOM_WORDS]>) -> usize {
        let mut row = *src;
        for i in 0..self.rows.len() {
            if let Some((word, mask)) = self.pivots[i] {
                if row.randoms[word] & mask != 0 {
                    row.xor_assign(&self.rows[i]);
                }
            }
        }
        let pivot = row
            .first_random(class)
            .map(|idx| (idx / 64, 1u64 << (idx % 64)));
        self.rows.push(row);
        self.pivots.push(pivot);
        self.rows.len() - 1
    }

    /// Pushes the packed rows of wire `v`. Output wires additionally tag
    /// their rows with the output-share mask, which the freeSNI/IOS checks
    /// track through the elimination.
    pub fn push_wire(&mut self, c: &Circuit, v: Var, class: Option<&[u64; RANDOM_WORDS]>) -> (usize, usize) {
        let start = self.rows.len();
        let out_mask = if c.is_output(v) {
            1 << c.output_share_index(v)
        } else {
            0
        };
        for bits in &c.bit_rows[v as usize] {
            let mut row = *bits;
            row.out = out_mask;
            self.push_row(&row, class);
        }
        (start, self.rows.len())
    }

    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
        self.pivots.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::row::RowLayout;
    use ironmask_field::PrimeField;

    fn layout() -> RowLayout {
        RowLayout {
            secret_count: 1,
            share_count: 2,
            duplications: 1,
            dup_shares: false,
            random_count: 3,
            mult_count: 0,
            correction_count: 0,
        }
    }

    fn row_with(layout: &RowLayout, slots: &[(usize, u16)]) -> Row {
        let mut r = Row::zero(layout);
        for &(s, v) in slots {
            r.set(s, v);
        }
        r
    }

    #[test]
    fn test_gauss_unmasks_pair() {
        // a0 + r0 and r0: the pair reveals a0.
        let l = layout();
        let mut g = GaussState::new(l.clone(), PrimeField::binary());
        let masked = row_with(&l, &[(l.share_slot(0, 0), 1), (l.random_slot(0), 1)]);
        let r0 = row_with(&l, &[(l.random_slot(0), 1)]);
        g.push_row(&masked, None);
        g.push_row(&r0, None);
        assert_eq!(g.pivot(0), Some(l.random_slot(0)));
        assert_eq!(g.pivot(1), None);
        assert_eq!(g.row(1).share_mask(&l, 0), 0b01);
    }

    #[test]
    fn test_gauss_idempotence() {
        // Reducing any already-reduced row again gives the zero row.
        let l = layout();
        let f = PrimeField::new(7).unwrap();
        let mut g = GaussState::new(l.clone(), f);
        let rows = [
            row_with(&l, &[(l.share_slot(0, 0), 3), (l.random_slot(0), 2), (l.random_slot(1), 1)]),
            row_with(&l, &[(l.random_slot(0), 5), (l.random_slot(2), 6)]),
            row_with(&l, &[(l.share_slot(0, 1), 1), (l.random_slot(1), 4)]),
        ];
        for r in &rows {
            g.push_row(r, None);
        }
        let len = g.len();
        for r in &rows {
            let idx = g.push_row(r, None);
            assert!(g.row(idx).is_zero(), "re-reduced row must vanish");
            g.truncate(len);
        }
    }

    #[test]
    fn test_gauss_rewind() {
        let l = layout();
        let mut g = GaussState::new(l.clone(), PrimeField::binary());
        let a = row_with(&l, &[(l.share_slot(0, 0), 1), (l.random_slot(0), 1)]);
        g.push_row(&a, None);
        let snapshot_rows: Vec<Row> = (0..g.len()).map(|i| g.row(i).clone()).collect();
        let b = row_with(&l, &[(l.random_slot(0), 1), (l.random_slot(1), 1)]);
        g.push_row(&b, None);
        g.truncate(1);
        assert_eq!(g.len(), 1);
        for (i, r) in snapshot_rows.iter().enumerate() {
            assert_eq!(g.row(i), r);
        }
    }

    #[test]
    fn test_gauss_class_restriction() {
        let l = layout();
        let mut class = vec![false; l.first_mult()];
        class[l.random_slot(1)] = true;
        let mut g = GaussState::new(l.clone(), PrimeField::binary());
        // Contains r0 and r1, but only r1 is eligible as pivot.
        let row = row_with(&l, &[(l.random_slot(0), 1), (l.random_slot(1), 1)]);
        g.push_row(&row, Some(&class));
        assert_eq!(g.pivot(0), Some(l.random_slot(1)));
        // A row with only r0 gets no pivot under the class.
        let row = row_with(&l, &[(l.random_slot(0), 1)]);
        g.push_row(&row, Some(&class));
        assert_eq!(g.pivot(1), None);
    }

    #[test]
    fn test_gauss_normalizes_mod_p() {
        let l = layout();
        let f = PrimeField::new(7).unwrap();
        let mut g = GaussState::new(l.clone(), f);
        let row = row_with(&l, &[(l.share_slot(0, 0), 2), (l.random_slot(0), 3)]);
        g.push_row(&row, None);
        assert_eq!(g.row(0).get(l.random_slot(0)), 1);
        // 2 * 3^{-1} = 2 * 5 = 10 = 3 mod 7
        assert_eq!(g.row(0).get(l.share_slot(0, 0)), 3);
    }

    #[test]
    fn test_bit_gauss_matches_row_gauss() {
        let l = layout();
        let mut g = GaussState::new(l.clone(), PrimeField::binary());
        let mut bg = BitGauss::new();
        let rows = [
            row_with(&l, &[(l.share_slot(0, 0), 1), (l.random_slot(0), 1)]),
            row_with(&l, &[(l.random_slot(0), 1), (l.random_slot(1), 1)]),
            row_with(&l, &[(l.share_slot(0, 1), 1), (l.random_slot(1), 1)]),
        ];
        for r in &rows {
            g.push_row(r, None);
            bg.push_row(&BitRow::from_row(r, &l).unwrap(), None);
        }
        for i in 0..rows.len() {
            assert_eq!(g.pivot(i).is_some(), bg.is_pivoted(i));
            assert_eq!(g.row(i).share_mask(&l, 0), bg.row(i).secrets[0]);
        }
        // The three rows sum to a0 + a1: the last row is unpivoted and holds
        // both shares.
        assert_eq!(bg.row(2).secrets[0], 0b11);
    }
}
