//! End-to-end scenarios on small reference gadgets.

use ironmask::circuit::{Circuit, ModelOptions};
use ironmask::coeffs::CoeffContext;
use ironmask::parser::ParsedGadget;
use ironmask::properties::random_probing::{rp_coeffs, rpc_coeffs, rpe_coeffs, RpeReport};
use ironmask::rules::{exhaustive_rp_coeffs, verify_probing, ProbingProperty};

fn build(src: &str) -> Circuit {
    let parsed = ParsedGadget::parse_str(src).unwrap();
    Circuit::build(&parsed, ModelOptions::default()).unwrap()
}

/// 3-share circular refresh: y_i = x_i + r_i + r_{i-1}.
const REFRESH3: &str = "\
#SHARES 3
#IN x
#RANDOMS r0 r1 r2
#OUT y
t0 = x0 + r0
t1 = x1 + r1
t2 = x2 + r2
y0 = t0 + r2
y1 = t1 + r0
y2 = t2 + r1
";

/// 2-share multiplication with a single mask random.
const AND2: &str = "\
#SHARES 2
#IN a b
#RANDOMS r0
#OUT c
m00 = a0 * b0
m01 = a0 * b1
m10 = a1 * b0
m11 = a1 * b1
u01 = m01 + r0
u10 = m10 + u01
c0 = m00 + r0
c1 = m11 + u10
";

/// 3-share ISW multiplication with its three output randoms.
const ISW3: &str = "\
#SHARES 3
#IN a b
#RANDOMS r01 r02 r12
#OUT c
m00 = a0 * b0
m01 = a0 * b1
m02 = a0 * b2
m10 = a1 * b0
m11 = a1 * b1
m12 = a1 * b2
m20 = a2 * b0
m21 = a2 * b1
m22 = a2 * b2
t01 = r01 + m01
t01b = t01 + m10
t02 = r02 + m02
t02b = t02 + m20
t12 = r12 + m12
t12b = t12 + m21
s0 = m00 + r01
c0 = s0 + r02
s1 = m11 + t01b
c1 = s1 + r12
s2 = m22 + t02b
c2 = s2 + t12b
";

/// 3-share refresh with one random too few: y0 and t1 share r0.
const BROKEN_REFRESH3: &str = "\
#SHARES 3
#IN x
#RANDOMS r0 r1
#OUT y
t1 = x1 + r0
y0 = x0 + r0
y1 = t1 + r1
y2 = x2 + r1
";

/// SC1: the only small failure of the circular refresh is the share triple.
#[test]
fn sc1_refresh_rp_coefficients() {
    let c = build(REFRESH3);
    let report = rp_coeffs(&c, Some(3), false).unwrap();
    assert_eq!(report.coeffs[1], 0);
    assert_eq!(report.coeffs[2], 0);
    assert_eq!(report.coeffs[3], 1);
    assert_eq!(report.incompressible_count, 1);
}

#[test]
fn sc1_refresh_constructive_matches_exhaustive() {
    let c = build(REFRESH3);
    let report = rp_coeffs(&c, Some(4), false).unwrap();
    let ctx = CoeffContext::new();
    let reference = exhaustive_rp_coeffs(&c, &ctx, c.share_count, 4);
    assert_eq!(report.coeffs, reference);
}

/// SC2: the 2-share AND is NI at order 1 but not at order 2.
#[test]
fn sc2_and2_ni() {
    let c = build(AND2);
    let order1 = verify_probing(&c, ProbingProperty::Ni, 1, false).unwrap();
    assert_eq!(order1.failures, 0, "AND2 must be 1-NI");

    let order2 = verify_probing(&c, ProbingProperty::Ni, 2, true).unwrap();
    assert!(order2.failures > 0, "two probes must defeat a 2-share AND");
    assert!(order2.first_failure.is_some());
}

/// SC3: ISW multiplication at 3 shares is SNI at order 2.
#[test]
fn sc3_isw3_sni() {
    let c = build(ISW3);
    let outcome = verify_probing(&c, ProbingProperty::Sni, 2, false).unwrap();
    assert_eq!(outcome.failures, 0, "ISW3 must be 2-SNI");
    assert!(outcome.checked > 0);
}

/// SC4: dropping a random from the refresh breaks SNI with a pair.
#[test]
fn sc4_broken_refresh_sni() {
    let c = build(BROKEN_REFRESH3);
    let outcome = verify_probing(&c, ProbingProperty::Sni, 2, false).unwrap();
    assert!(outcome.failures > 0);
    let tuple = outcome.first_failure.unwrap();
    assert_eq!(tuple.len(), 2, "the smallest witness is a pair");
}

/// SC5: arithmetic multiplication over GF(7); RPC coefficients stay within
/// the combinatorial bounds and the gadget is (as expected) leaky.
#[test]
fn sc5_arith_mult_rpc() {
    let src = "\
#SHARES 2
#CHARACTERISTIC 7
#IN a b
#RANDOMS r0
#OUT c
m00 = a0 * b0
m01 = a0 * b1
m10 = a1 * b0
m11 = a1 * b1
u01 = m01 + r0
u10 = m10 + u01
c0 = m00 + r0
c1 = m11 + u10
";
    let c = build(src);
    assert_eq!(c.field.characteristic(), 7);
    let report = rpc_coeffs(&c, Some(3), 1, 1, false).unwrap();
    let ctx = CoeffContext::new();
    for (i, &coeff) in report.coeffs.iter().enumerate() {
        assert!(
            coeff <= ctx.binomial(c.total_wires as usize, i),
            "c_{i} exceeds C(total_wires, {i})"
        );
    }
    assert!(
        report.coeffs.iter().any(|&x| x > 0),
        "a single-random multiplication cannot be RPC-tight"
    );
    assert!(report.bounds.pmax <= 1.0 + 1e-9);
}

/// SC6: copy-gadget RPE vectors are dominated by the RPC vector with the
/// same total output budget.
#[test]
fn sc6_copy_gadget_rpe() {
    let src = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d e
t0 = a0 + r0
t1 = a1 + r0
d0 = t0
d1 = t1
e0 = a0
e1 = a1
";
    let c = build(src);
    let rpe = rpe_coeffs(&c, None, 1, false).unwrap();
    let rpc = rpc_coeffs(&c, None, 1, 2, false).unwrap();
    match rpe {
        RpeReport::Copy { vectors, .. } => {
            assert_eq!(vectors.len(), 4);
            for (idx, v) in vectors.iter().enumerate() {
                for (i, (a, b)) in v.iter().zip(rpc.coeffs.iter()).enumerate() {
                    assert!(
                        a <= b,
                        "RPE vector {idx} exceeds RPC at coefficient {i}: {a} > {b}"
                    );
                }
            }
        }
        _ => panic!("copy gadget must produce the four RPE vectors"),
    }
}

/// A gadget invariant under swapping its two inputs yields identical RPE
/// vectors for both inputs.
#[test]
fn rpe_vectors_symmetric_for_symmetric_gadget() {
    let src = "\
#SHARES 2
#IN a b
#RANDOMS r0
#OUT c
t00 = a0 * b0
t01 = a0 * b1
t10 = a1 * b0
t11 = a1 * b1
w = t01 + t10
ww = w + r0
c0 = t00 + r0
c1 = t11 + ww
";
    let c = build(src);
    let rpe = rpe_coeffs(&c, Some(3), 1, false).unwrap();
    match rpe {
        RpeReport::TwoInput { rpe1, rpe2, .. } => {
            assert_eq!(rpe1[0], rpe1[1], "RPE1 must not distinguish the inputs");
            assert_eq!(rpe2[0], rpe2[1], "RPE2 must not distinguish the inputs");
        }
        _ => panic!("two-input gadget must yield the two-input report"),
    }
}

/// Boundary: a gadget with no randoms leaks exactly through the share
/// tuple; all supersets fail.
#[test]
fn boundary_trivially_leaky_gadget() {
    let src = "\
#SHARES 2
#IN x
#OUT y
y0 = x0
y1 = x1
";
    let c = build(src);
    let report = rp_coeffs(&c, None, false).unwrap();
    // Internal wires are exactly the two shares, both of weight 1.
    assert_eq!(c.length, 2);
    assert_eq!(report.coeffs[1], 0);
    assert_eq!(report.coeffs[2], 1);
    assert_eq!(report.incompressible_count, 1);
}

/// Boundary: with `t_in = share_count` the empty circuit's only
/// incompressible tuple is the full share set.
#[test]
fn boundary_empty_circuit() {
    let src = "\
#SHARES 3
#IN x
#RANDOMS r0
#OUT y
y0 = x0
y1 = x1
y2 = x2
";
    let c = build(src);
    let report = rp_coeffs(&c, None, false).unwrap();
    assert_eq!(report.incompressible_count, 1);
    assert_eq!(report.coeffs[3], 1);
    assert_eq!(report.coeffs[2], 0);
}

/// Determinism: parsing the same description twice yields byte-identical
/// coefficient vectors.
#[test]
fn reparse_is_deterministic() {
    let c1 = build(REFRESH3);
    let c2 = build(REFRESH3);
    let r1 = rp_coeffs(&c1, None, false).unwrap();
    let r2 = rp_coeffs(&c2, None, false).unwrap();
    assert_eq!(r1.coeffs, r2.coeffs);
}

/// The AND gadget leaks through pairs under RP: the constructive engine must
/// agree with brute force on the failure counts it can reach. (The brute
/// force expands multiplications through operand shares, which is exact for
/// pair-sized tuples here.)
#[test]
fn and2_rp_smoke() {
    let c = build(AND2);
    let report = rp_coeffs(&c, Some(2), false).unwrap();
    // {m00, m11} reveals both shares of both inputs: c2 > 0.
    assert!(report.coeffs[2] > 0);
    assert_eq!(report.coeffs[1], 0);
}
