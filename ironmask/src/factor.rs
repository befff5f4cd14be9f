//! Multiplication-aware factorization.
//!
//! A reduced row that still carries multiplication columns cannot be
//! eliminated linearly: `a_j · b_k` is bilinear. Relative to a chosen input
//! side, though, the row *is* linear: it can be rewritten over a virtual
//! basis made of the other side's shares, that side's refresh randoms, and a
//! constant column, with coefficient vectors over the studied input's
//! variables. Those vectors are ordinary rows again, and the search can keep
//! eliminating them against the studied input's randoms.

use anyhow::{ensure, Result};
use ironmask_field::Coeff;

use crate::circuit::row::Row;
use crate::circuit::Circuit;

/// The virtual basis for revealing input `studied` of a multiplication
/// gadget: one column per share of the other input, one per refresh random
/// of the other input's class, plus the constant column.
#[derive(Clone, Debug)]
pub struct VirtualBasis {
    pub studied: usize,
    pub basis_input: usize,
    pub width: usize,
    /// Random slot -> basis column, for the basis input's class.
    col_of_rand: Vec<Option<usize>>,
}

impl VirtualBasis {
    pub fn new(c: &Circuit, studied: usize) -> Result<Self> {
        ensure!(
            c.secret_count == 2,
            "factorization expects a two-input multiplication gadget"
        );
        ensure!(studied < 2, "input index out of range");
        let classes = c
            .classes
            .as_ref()
            .expect("multiplication circuits always carry random classes");
        let basis_input = 1 - studied;
        let class = if basis_input == 0 {
            &classes.in1
        } else {
            &classes.in2
        };
        let layout = &c.layout;
        let mut col_of_rand = vec![None; layout.first_mult()];
        let mut rank = 0;
        for slot in layout.first_random()..layout.first_mult() {
            if class[slot] {
                col_of_rand[slot] = Some(c.share_count + rank);
                rank += 1;
            }
        }
        Ok(Self {
            studied,
            basis_input,
            width: c.share_count + rank + 1,
            col_of_rand,
        })
    }

    pub fn const_col(&self) -> usize {
        self.width - 1
    }

    fn share_col(&self, share: usize) -> usize {
        share
    }
}

enum AtomKind {
    BasisShare(usize),
    StudiedShare(usize),
    BasisRand(usize),
    StudiedRand(usize),
    /// A random of neither side's class (it acts as a fresh mask) or a
    /// duplicated-share symbol.
    Opaque,
    Constant,
}

fn classify(c: &Circuit, basis: &VirtualBasis, slot: usize) -> AtomKind {
    let layout = &c.layout;
    let shares_len = layout.shares_len();
    if slot < shares_len {
        let input = slot / c.share_count;
        let share = slot % c.share_count;
        return if input == basis.basis_input {
            AtomKind::BasisShare(share)
        } else {
            AtomKind::StudiedShare(share)
        };
    }
    if slot == layout.constant_slot() {
        return AtomKind::Constant;
    }
    if (layout.first_random()..layout.first_mult()).contains(&slot) {
        let classes = c.classes.as_ref().unwrap();
        let basis_class = if basis.basis_input == 0 {
            &classes.in1
        } else {
            &classes.in2
        };
        let studied_class = if basis.studied == 0 {
            &classes.in1
        } else {
            &classes.in2
        };
        if basis_class[slot] {
            return AtomKind::BasisRand(slot);
        }
        if studied_class[slot] {
            return AtomKind::StudiedRand(slot);
        }
        return AtomKind::Opaque;
    }
    AtomKind::Opaque
}

/// How a single reduced row factorizes.
enum RowShape {
    /// Masked by an output random: reveals nothing, contributes nothing.
    OutputMasked,
    /// Masked by an input random: its linear part goes to the constant
    /// column unchanged.
    InputMasked,
    /// Multiplication columns (plus possibly a linear part) to expand.
    Bilinear,
    /// Plain linear row.
    Linear,
}

fn row_shape(c: &Circuit, row: &Row) -> RowShape {
    let layout = &c.layout;
    let classes = c.classes.as_ref().unwrap();
    for slot in layout.first_random()..layout.first_mult() {
        if row.get(slot) == 0 {
            continue;
        }
        if classes.in1[slot] || classes.in2[slot] {
            return RowShape::InputMasked;
        }
        if classes.out[slot] {
            return RowShape::OutputMasked;
        }
    }
    if row.has_mult(layout) {
        RowShape::Bilinear
    } else {
        RowShape::Linear
    }
}

/// Appends the `basis.width` virtual-basis rows of `row` to `out`. Rows are
/// over the same layout, with only share/random/constant slots populated.
pub fn factorize_row(c: &Circuit, basis: &VirtualBasis, row: &Row, out: &mut Vec<Row>) {
    let layout = &c.layout;
    let start = out.len();
    for _ in 0..basis.width {
        out.push(Row::zero(layout));
    }
    let cols = &mut out[start..];

    match row_shape(c, row) {
        RowShape::OutputMasked => {}
        RowShape::InputMasked => {
            // Already linearly masked on the input side: keep the linear
            // part as the constant column's coefficient vector.
            let dst = &mut cols[basis.const_col()];
            for slot in 0..layout.first_mult() {
                dst.set(slot, row.get(slot));
            }
            dst.set(layout.constant_slot(), row.get(layout.constant_slot()));
        }
        RowShape::Bilinear | RowShape::Linear => {
            // The studied input's linear part always lands in the constant
            // column.
            {
                let dst = &mut cols[basis.const_col()];
                for share in 0..c.share_count {
                    let slot = layout.share_slot(basis.studied, share);
                    dst.set(slot, row.get(slot));
                }
                dst.set(layout.constant_slot(), row.get(layout.constant_slot()));
            }
            for m in 0..layout.mult_count {
                let mult_coeff = row.get(layout.mult_slot(m));
                if mult_coeff == 0 {
                    continue;
                }
                let gate = &c.mults[m];
                expand_product(c, basis, mult_coeff, &gate.left_expr, &gate.right_expr, cols);
            }
        }
    }
}

/// Distributes `coeff · left · right` over the virtual columns, one atomic
/// pair at a time.
fn expand_product(
    c: &Circuit,
    basis: &VirtualBasis,
    coeff: Coeff,
    left: &Row,
    right: &Row,
    cols: &mut [Row],
) {
    let layout = &c.layout;
    let field = c.field;
    for (ls, &lc) in left.slots().iter().enumerate() {
        if lc == 0 {
            continue;
        }
        for (rs, &rc) in right.slots().iter().enumerate() {
            if rc == 0 {
                continue;
            }
            let k = field.mul(coeff, field.mul(lc, rc));
            if k == 0 {
                continue;
            }
            dispatch_pair(c, basis, k, ls, rs, cols);
        }
    }
}

fn dispatch_pair(
    c: &Circuit,
    basis: &VirtualBasis,
    k: Coeff,
    left_slot: usize,
    right_slot: usize,
    cols: &mut [Row],
) {
    use AtomKind::*;
    let layout = &c.layout;
    let field = c.field;
    let studied = basis.studied;

    let mut add = |col: usize, slot: usize| {
        let dst = &mut cols[col];
        let v = field.add(dst.get(slot), k);
        dst.set(slot, v);
    };

    let pair = (
        classify(c, basis, left_slot),
        classify(c, basis, right_slot),
    );
    match pair {
        // A share of the basis side times something of the studied side.
        (BasisShare(j), StudiedShare(s)) | (StudiedShare(s), BasisShare(j)) => {
            add(basis.share_col(j), layout.share_slot(studied, s));
        }
        (BasisShare(j), StudiedRand(r)) | (StudiedRand(r), BasisShare(j)) => {
            add(basis.share_col(j), r);
        }
        (BasisShare(j), Constant) | (Constant, BasisShare(j)) => {
            add(basis.share_col(j), layout.constant_slot());
        }
        // A basis-class random times something of the studied side.
        (BasisRand(br), StudiedShare(s)) | (StudiedShare(s), BasisRand(br)) => {
            let col = basis.col_of_rand[br].expect("basis random has a column");
            add(col, layout.share_slot(studied, s));
        }
        (BasisRand(br), StudiedRand(r)) | (StudiedRand(r), BasisRand(br)) => {
            let col = basis.col_of_rand[br].expect("basis random has a column");
            add(col, r);
        }
        (BasisRand(br), Constant) | (Constant, BasisRand(br)) => {
            let col = basis.col_of_rand[br].expect("basis random has a column");
            add(col, layout.constant_slot());
        }
        // Purely studied-side products: the studied share times a constant
        // belongs to the constant column; a studied random acting alone
        // masks the product.
        (StudiedShare(s), Constant) | (Constant, StudiedShare(s)) => {
            add(basis.const_col(), layout.share_slot(studied, s));
        }
        (StudiedRand(r), Constant) | (Constant, StudiedRand(r)) => {
            add(basis.const_col(), r);
        }
        (Constant, Constant) => {
            add(basis.const_col(), layout.constant_slot());
        }
        // `r_a · a_j`, `r_b · b_k`, same-class random pairs, opaque
        // symbols: the random stays a fresh mask, nothing to factorize.
        _ => {}
    }
}

/// Factorizes a batch of reduced rows; the result has
/// `rows.len() * basis.width` entries.
pub fn factorize_rows(c: &Circuit, basis: &VirtualBasis, rows: &[Row]) -> Vec<Row> {
    let mut out = Vec::with_capacity(rows.len() * basis.width);
    for row in rows {
        factorize_row(c, basis, row, &mut out);
    }
    out
}
