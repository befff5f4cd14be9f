#![allow(clippy::needless_range_loop)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

//! Finite field arithmetic for masking verification.
//!
//! Unlike a SNARK field, the characteristic here is a *runtime* value: it
//! comes from the `#CHARACTERISTIC` directive of the gadget under
//! verification. [`PrimeField`] therefore carries the modulus as data and all
//! operations take elements as plain integers in canonical form.

pub mod prime;

pub use prime::{Coeff, PrimeField};
