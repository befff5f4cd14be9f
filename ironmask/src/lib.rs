#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![deny(rustdoc::broken_intra_doc_links)]

//! IronMask: verification of masking countermeasures against side-channel
//! and fault attacks.
//!
//! A gadget is parsed into a [`circuit::Circuit`] — one symbolic dependency
//! row per wire over GF(2) or GF(p) — and a security property reduces to a
//! search over wire tuples: either the constructive enumeration of
//! incompressible failure tuples followed by the hash-based expansion into
//! failure coefficients (random-probing notions), or the exhaustive
//! rules-based scan (probing notions).

pub use ironmask_field as field;

pub mod circuit;
pub mod coeffs;
pub mod enumerator;
pub mod expand;
pub mod factor;
pub mod gauss;
pub mod parser;
pub mod properties;
pub mod rules;
pub mod trie;
