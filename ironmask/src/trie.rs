//! Trie of incompressible failure tuples.
//!
//! Tuples are stored sorted ascending. Because the search only inserts a
//! tuple after checking that none of its subtuples is already stored, the
//! trie normally contains an antichain: no stored tuple is a subtuple of
//! another. Projections onto output subsets may relax this; the expansion
//! pass deduplicates set-wise, so a stray subset pair only costs time.

use crate::circuit::{ShareMask, Var};

#[derive(Clone, Debug, Default)]
struct TrieNode {
    childs: Option<Box<[Option<Box<TrieNode>>]>>,
    /// Revelation descriptor: per input, the share mask this tuple
    /// determines. Present exactly on stored-tuple endpoints.
    descriptor: Option<Box<[ShareMask]>>,
}

impl TrieNode {
    fn child(&self, v: usize) -> Option<&TrieNode> {
        self.childs.as_ref().and_then(|c| c[v].as_deref())
    }
}

#[derive(Clone, Debug)]
pub struct Trie {
    childs_len: usize,
    secret_count: usize,
    head: TrieNode,
    count: usize,
}

impl Trie {
    pub fn new(childs_len: usize, secret_count: usize) -> Self {
        Self {
            childs_len,
            secret_count,
            head: TrieNode::default(),
            count: 0,
        }
    }

    pub fn childs_len(&self) -> usize {
        self.childs_len
    }

    pub fn secret_count(&self) -> usize {
        self.secret_count
    }

    /// Number of stored tuples.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when the empty tuple is stored, i.e. the property fails with no
    /// probes at all (possible once projected output shares reveal enough on
    /// their own).
    pub fn contains_empty(&self) -> bool {
        self.head.descriptor.is_some()
    }

    /// Inserts a sorted tuple, merging descriptors share-wise if it is
    /// already present.
    pub fn insert_merge(&mut self, tuple: &[Var], descriptor: &[ShareMask]) {
        debug_assert!(tuple.windows(2).all(|w| w[0] < w[1]), "tuple must be sorted");
        debug_assert_eq!(descriptor.len(), self.secret_count);
        let childs_len = self.childs_len;
        let mut node = &mut self.head;
        for &v in tuple {
            let childs = node
                .childs
                .get_or_insert_with(|| vec![None; childs_len].into_boxed_slice());
            node = childs[v as usize].get_or_insert_with(Box::default);
        }
        match &mut node.descriptor {
            Some(existing) => {
                for (dst, src) in existing.iter_mut().zip(descriptor.iter()) {
                    *dst |= src;
                }
            }
            None => {
                node.descriptor = Some(descriptor.to_vec().into_boxed_slice());
                self.count += 1;
            }
        }
    }

    /// Exact lookup.
    pub fn get(&self, tuple: &[Var]) -> Option<&[ShareMask]> {
        let mut node = &self.head;
        for &v in tuple {
            node = node.child(v as usize)?;
        }
        node.descriptor.as_deref()
    }

    /// Whether some stored tuple is a (non-strict) subtuple of `tuple`.
    pub fn contains_subset(&self, tuple: &[Var]) -> bool {
        fn descend(node: &TrieNode, tuple: &[Var]) -> bool {
            if node.descriptor.is_some() {
                return true;
            }
            let childs = match &node.childs {
                Some(c) => c,
                None => return false,
            };
            for (i, &v) in tuple.iter().enumerate() {
                if let Some(child) = childs[v as usize].as_deref() {
                    if descend(child, &tuple[i + 1..]) {
                        return true;
                    }
                }
            }
            false
        }
        descend(&self.head, tuple)
    }

    pub fn for_each(&self, mut f: impl FnMut(&[Var], &[ShareMask])) {
        let mut path = Vec::new();
        Self::walk(&self.head, &mut path, &mut f);
    }

    fn walk(node: &TrieNode, path: &mut Vec<Var>, f: &mut impl FnMut(&[Var], &[ShareMask])) {
        if let Some(desc) = &node.descriptor {
            f(path, desc);
        }
        if let Some(childs) = &node.childs {
            for (v, child) in childs.iter().enumerate() {
                if let Some(child) = child {
                    path.push(v as Var);
                    Self::walk(child, path, f);
                    path.pop();
                }
            }
        }
    }

    pub fn count_of_size(&self, size: usize) -> usize {
        let mut n = 0;
        self.for_each(|t, _| {
            if t.len() == size {
                n += 1;
            }
        });
        n
    }

    /// The largest stored tuple size.
    pub fn max_size(&self) -> usize {
        let mut max = 0;
        self.for_each(|t, _| max = max.max(t.len()));
        max
    }

    pub fn list_of_size(&self, size: usize) -> Vec<Box<[Var]>> {
        let mut out = Vec::new();
        self.for_each(|t, _| {
            if t.len() == size {
                out.push(t.to_vec().into_boxed_slice());
            }
        });
        out
    }

    pub fn all_tuples(&self) -> Vec<(Box<[Var]>, Box<[ShareMask]>)> {
        let mut out = Vec::new();
        self.for_each(|t, d| out.push((t.to_vec().into_boxed_slice(), d.to_vec().into_boxed_slice())));
        out
    }

    /// Projects the trie onto an output subset: keeps the tuples whose
    /// output wires (indices `>= internal_len`) all belong to `subset`,
    /// stripped of those output wires. Tuples whose internal part exceeds
    /// `max_len` are dropped.
    pub fn project_onto(&self, subset: &[Var], internal_len: usize, max_len: usize) -> Trie {
        let mut derived = Trie::new(self.childs_len, self.secret_count);
        self.for_each(|tuple, desc| {
            let internal: Vec<Var> = tuple
                .iter()
                .copied()
                .filter(|&v| (v as usize) < internal_len)
                .collect();
            if internal.len() > max_len {
                return;
            }
            let outputs_ok = tuple
                .iter()
                .filter(|&&v| v as usize >= internal_len)
                .all(|v| subset.contains(v));
            if outputs_ok {
                derived.insert_merge(&internal, desc);
            }
        });
        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie() -> Trie {
        Trie::new(16, 1)
    }

    #[test]
    fn test_insert_and_get() {
        let mut t = trie();
        t.insert_merge(&[1, 3, 5], &[0b101]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(&[1, 3, 5]), Some(&[0b101u64][..]));
        assert_eq!(t.get(&[1, 3]), None);
        assert_eq!(t.get(&[1, 3, 6]), None);
    }

    #[test]
    fn test_double_insert_merges() {
        let mut t = trie();
        t.insert_merge(&[2, 4], &[0b001]);
        t.insert_merge(&[2, 4], &[0b100]);
        assert_eq!(t.len(), 1, "re-inserting must not change cardinality");
        assert_eq!(t.get(&[2, 4]), Some(&[0b101u64][..]));
    }

    #[test]
    fn test_contains_subset() {
        let mut t = trie();
        t.insert_merge(&[3, 7], &[1]);
        assert!(t.contains_subset(&[3, 7]));
        assert!(t.contains_subset(&[1, 3, 5, 7, 9]));
        assert!(!t.contains_subset(&[3, 6]));
        assert!(!t.contains_subset(&[7]));
        assert!(!t.contains_subset(&[]));
    }

    #[test]
    fn test_contains_empty() {
        let mut t = trie();
        assert!(!t.contains_empty());
        t.insert_merge(&[], &[0b11]);
        assert!(t.contains_empty());
        assert!(t.contains_subset(&[4, 9]));
    }

    #[test]
    fn test_sizes_and_listing() {
        let mut t = trie();
        t.insert_merge(&[0, 1, 2], &[0b111]);
        t.insert_merge(&[4, 9], &[0b11]);
        t.insert_merge(&[5, 8], &[0b11]);
        assert_eq!(t.count_of_size(2), 2);
        assert_eq!(t.count_of_size(3), 1);
        assert_eq!(t.max_size(), 3);
        let pairs = t.list_of_size(2);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().any(|p| &**p == [4, 9]));
    }

    #[test]
    fn test_project_onto() {
        // Internal wires are 0..10, outputs 10..14.
        let mut t = Trie::new(14, 1);
        t.insert_merge(&[1, 2, 10], &[0b01]);
        t.insert_merge(&[1, 3, 11], &[0b10]);
        t.insert_merge(&[4, 5], &[0b11]);
        let p = t.project_onto(&[10], 10, 10);
        // {1,2,10} projects to {1,2}; {1,3,11} is dropped; {4,5} is kept.
        assert_eq!(p.len(), 2);
        assert_eq!(p.get(&[1, 2]), Some(&[0b01u64][..]));
        assert!(p.get(&[1, 3]).is_none());
        assert_eq!(p.get(&[4, 5]), Some(&[0b11u64][..]));
    }

    #[test]
    fn test_minimality_preserved_by_guarded_insert() {
        // The search protocol: check contains_subset before inserting.
        let mut t = trie();
        let candidates: Vec<Vec<Var>> = vec![vec![1, 2], vec![1, 2, 3], vec![4], vec![4, 5]];
        for cand in &candidates {
            if !t.contains_subset(cand) {
                t.insert_merge(cand, &[1]);
            }
        }
        let stored = t.all_tuples();
        assert_eq!(stored.len(), 2);
        for (a, _) in &stored {
            for (b, _) in &stored {
                if a != b {
                    assert!(!a.iter().all(|x| b.contains(x)), "{a:?} ⊂ {b:?}");
                }
            }
        }
    }
}
