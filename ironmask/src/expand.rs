//! Failure generation from incompressible tuples.
//!
//! Once the trie of incompressible tuples is known, the number of size-`i`
//! failures is the number of size-`i` supersets of any stored tuple, counted
//! once each. The expander grows the size-`(i-1)` failure set one wire at a
//! time into a fixed-size chained hash table, deduplicating with an
//! incremental hash: `hash(T ∪ {w}) = hash(T) + mix(w)` modulo the bucket
//! mask, so a candidate never has to be materialized to be looked up.

use ironmask_util::log2_ceil;

use crate::circuit::{Circuit, Var};
use crate::coeffs::{binomial_big, CoeffContext};
use crate::trie::Trie;

/// Integer mix (Wang-style) used for the per-wire hash contribution.
fn mix(x: u32) -> u32 {
    let x = ((x >> 16) ^ x).wrapping_mul(0x45d9f3b);
    let x = ((x >> 16) ^ x).wrapping_mul(0x45d9f3b);
    (x >> 16) ^ x
}

/// Picks a power-of-two bucket count from the expected peak layer size.
/// Resizing mid-layer is not possible (entries cache their hashes), so the
/// table is sized for the worst layer up front, capped at 2^25 buckets.
pub fn hash_mask(var_count: usize, coeff_max: usize) -> u32 {
    let k = coeff_max.min(var_count / 2).max(1);
    let mut estimate: f64 = 1.0;
    for j in 0..k {
        estimate *= (var_count - j) as f64 / (j + 1) as f64;
        if estimate > (1u64 << 26) as f64 {
            break;
        }
    }
    let bits = log2_ceil(estimate as usize + 1).clamp(8, 25);
    (1u32 << bits) - 1
}

const NO_NODE: u32 = u32::MAX;

struct Node {
    comb: Box<[Var]>,
    hash: u32,
    next: u32,
}

/// Fixed-size chained hash table of sorted tuples of one length.
pub struct TupleTable {
    mask: u32,
    buckets: Vec<u32>,
    nodes: Vec<Node>,
}

impl TupleTable {
    pub fn new(mask: u32) -> Self {
        Self {
            mask,
            buckets: vec![NO_NODE; mask as usize + 1],
            nodes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.fill(NO_NODE);
        self.nodes.clear();
    }

    fn hash_of(&self, comb: &[Var]) -> u32 {
        let mut h = 0u32;
        for &v in comb {
            h = h.wrapping_add(mix(v as u32));
        }
        h & self.mask
    }

    fn push_node(&mut self, comb: Box<[Var]>, hash: u32) {
        let bucket = hash as usize;
        let node = Node {
            comb,
            hash,
            next: self.buckets[bucket],
        };
        self.buckets[bucket] = self.nodes.len() as u32;
        self.nodes.push(node);
    }

    /// Insert without a presence check (safe for incompressible tuples,
    /// which cannot have been generated by expansion of a smaller one —
    /// still checked, cheaply, to be safe).
    pub fn insert_checked(&mut self, comb: &[Var]) {
        let hash = self.hash_of(comb);
        let mut at = self.buckets[hash as usize];
        while at != NO_NODE {
            let node = &self.nodes[at as usize];
            if &*node.comb == comb {
                return;
            }
            at = node.next;
        }
        self.push_node(comb.to_vec().into_boxed_slice(), hash);
    }

    pub fn contains(&self, comb: &[Var]) -> bool {
        let hash = self.hash_of(comb);
        let mut at = self.buckets[hash as usize];
        while at != NO_NODE {
            let node = &self.nodes[at as usize];
            if &*node.comb == comb {
                return true;
            }
            at = node.next;
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Var]> {
        self.nodes.iter().map(|n| &*n.comb)
    }

    /// Checks whether `comb ∪ {x}` is present at `hash`; inserts it
    /// otherwise. The candidate is only materialized on insertion.
    fn check_and_add(&mut self, hash: u32, comb: &[Var], x: Var) {
        let mut at = self.buckets[hash as usize];
        while at != NO_NODE {
            let node = &self.nodes[at as usize];
            if equals_with_insert(&node.comb, comb, x) {
                return;
            }
            at = node.next;
        }
        let mut merged = Vec::with_capacity(comb.len() + 1);
        let split = comb.partition_point(|&v| v < x);
        merged.extend_from_slice(&comb[..split]);
        merged.push(x);
        merged.extend_from_slice(&comb[split..]);
        self.push_node(merged.into_boxed_slice(), hash);
    }

    /// Inserts every one-wire superset of `comb` (drawn from `0..var_count`)
    /// into `self`. Sortedness makes the "not already a member" test free.
    fn expand_tuple(&mut self, base_hash: u32, comb: &[Var], var_count: usize) {
        let mask = self.mask;
        let mut add = |table: &mut Self, x: usize| {
            let h = base_hash.wrapping_add(mix(x as u32)) & mask;
            table.check_and_add(h, comb, x as Var);
        };
        let first = comb[0] as usize;
        let last = comb[comb.len() - 1] as usize;
        for x in 0..first {
            add(self, x);
        }
        for w in comb.windows(2) {
            for x in (w[0] as usize + 1)..w[1] as usize {
                add(self, x);
            }
        }
        for x in (last + 1)..var_count {
            add(self, x);
        }
    }
}

/// Element-wise comparison of `cand` against the (virtual) sorted insertion
/// of `x` into `comb`.
fn equals_with_insert(cand: &[Var], comb: &[Var], x: Var) -> bool {
    debug_assert_eq!(cand.len(), comb.len() + 1);
    let mut j = 0;
    for &cv in cand {
        if cv != x {
            if j >= comb.len() || cv != comb[j] {
                return false;
            }
            j += 1;
        }
    }
    true
}

/// Rolling expansion of one trie: `advance` moves from the size-`i-1` failure
/// layer to the size-`i` layer.
pub struct Expansion<'t> {
    trie: &'t Trie,
    var_count: usize,
    curr: TupleTable,
    next: TupleTable,
    size: usize,
}

impl<'t> Expansion<'t> {
    pub fn new(trie: &'t Trie, var_count: usize, mask: u32) -> Self {
        Self {
            trie,
            var_count,
            curr: TupleTable::new(mask),
            next: TupleTable::new(mask),
            size: 0,
        }
    }

    pub fn table(&self) -> &TupleTable {
        &self.curr
    }

    pub fn advance(&mut self) -> &TupleTable {
        self.size += 1;
        self.next.clear();
        let nodes_len = self.curr.nodes.len();
        for i in 0..nodes_len {
            // Split borrow: read the node out of `curr` while writing `next`.
            let (hash, comb) = {
                let n = &self.curr.nodes[i];
                (n.hash, n.comb.clone())
            };
            self.next.expand_tuple(hash, &comb, self.var_count);
        }
        for tuple in self.trie.list_of_size(self.size) {
            self.next.insert_checked(&tuple);
        }
        core::mem::swap(&mut self.curr, &mut self.next);
        &self.curr
    }
}

/// Coefficient vector `[c_0 … c_total_wires]` of a single trie. `var_count`
/// is the universe the tuples are drawn from (internal wires).
pub fn failure_coeffs(
    c: &Circuit,
    ctx: &CoeffContext,
    trie: &Trie,
    var_count: usize,
    coeff_max: usize,
) -> Vec<u64> {
    let total = c.total_wires as usize;
    let mut coeffs = vec![0u64; total + 1];
    if trie.contains_empty() {
        saturate_coeffs(&mut coeffs, total);
        return coeffs;
    }
    let mask = hash_mask(var_count, coeff_max);
    let mut expansion = Expansion::new(trie, var_count, mask);
    for size in 1..=coeff_max.min(var_count) {
        let table = expansion.advance();
        for comb in table.iter() {
            ctx.add_tuple(c, &mut coeffs, comb);
        }
        log::debug!("c{} = {} ({} tuples)", size, coeffs[size], table.len());
    }
    coeffs
}

/// Coefficient vector of the tuples that are failures for *every* trie in
/// `tries` (the ∩ combination of RPE).
pub fn failure_coeffs_all_of(
    c: &Circuit,
    ctx: &CoeffContext,
    tries: &[&Trie],
    var_count: usize,
    coeff_max: usize,
) -> Vec<u64> {
    let total = c.total_wires as usize;
    let mut coeffs = vec![0u64; total + 1];

    // A trie holding the empty tuple constrains nothing: everything fails
    // for it already.
    let active: Vec<&Trie> = tries.iter().copied().filter(|t| !t.contains_empty()).collect();
    if active.is_empty() {
        saturate_coeffs(&mut coeffs, total);
        return coeffs;
    }
    if active.iter().any(|t| t.is_empty()) {
        // One side never fails: the intersection is empty.
        return coeffs;
    }

    let mask = hash_mask(var_count, coeff_max);
    let mut expansions: Vec<Expansion> = active
        .iter()
        .map(|t| Expansion::new(t, var_count, mask))
        .collect();
    for size in 1..=coeff_max.min(var_count) {
        for e in expansions.iter_mut() {
            e.advance();
        }
        let (smallest, rest): (&Expansion, Vec<&Expansion>) = {
            let idx = (0..expansions.len())
                .min_by_key(|&i| expansions[i].table().len())
                .unwrap();
            (
                &expansions[idx],
                expansions
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != idx)
                    .map(|(_, e)| e)
                    .collect(),
            )
        };
        let mut layer = 0u64;
        for comb in smallest.table().iter() {
            if rest.iter().all(|e| e.table().contains(comb)) {
                ctx.add_tuple(c, &mut coeffs, comb);
                layer += 1;
            }
        }
        log::debug!("c{} (∩ of {}): {} tuples", size, tries.len(), layer);
    }
    coeffs
}

/// Every size-`i` wire subset is a failure: `c_i = C(total_wires, i)`.
fn saturate_coeffs(coeffs: &mut [u64], total: usize) {
    use num::ToPrimitive;
    for (i, c) in coeffs.iter_mut().enumerate().skip(1) {
        *c = binomial_big(total, i).to_u64().unwrap_or(u64::MAX);
    }
}
