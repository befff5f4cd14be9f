//! Fault-combined properties: CNI, CRP and CRPC.
//!
//! The layer itself is thin: it enumerates fault scenarios (subsets of at
//! most `k` faultable wires, all forced to the same polarity), rebuilds the
//! circuit for each scenario and invokes the probing or random-probing core
//! on the faulted circuit. Scenario results aggregate pessimistically: a
//! single failing scenario fails CNI, and CRP/CRPC keep the worst
//! coefficient vector. With leak and fault rates given, the per-scenario
//! failure probabilities are folded into a single bound, weighting each
//! scenario by its fault probability.

use anyhow::Result;
use itertools::Itertools;
use serde::Serialize;

use crate::circuit::{Circuit, FaultScenario, FaultVar, ModelOptions};
use crate::coeffs::failure_proba_at;
use crate::parser::ParsedGadget;
use crate::properties::random_probing::{rp_coeffs, rpc_coeffs};
use crate::rules::{verify_probing, ProbingOutcome, ProbingProperty};

/// Wires a fault can target: inputs, randoms and internal computations, but
/// not the output block (faulting a value after it leaves the gadget is
/// outside the model).
fn faultable_names(parsed: &ParsedGadget) -> Vec<String> {
    let mut names = Vec::new();
    for input in &parsed.inputs {
        for s in 0..parsed.shares {
            for d in 0..parsed.duplications {
                if parsed.duplications <= 1 {
                    names.push(format!("{input}{s}"));
                } else {
                    names.push(format!("{input}{s}_{d}"));
                }
            }
        }
    }
    names.extend(parsed.randoms.iter().cloned());
    let output_names: Vec<String> = parsed
        .outputs
        .iter()
        .flat_map(|o| {
            (0..parsed.shares).flat_map(move |s| {
                (0..parsed.duplications).map(move |d| {
                    if parsed.duplications <= 1 {
                        format!("{o}{s}")
                    } else {
                        format!("{o}{s}_{d}")
                    }
                })
            })
        })
        .collect();
    for eq in &parsed.equations {
        if !output_names.contains(&eq.dst) && !names.contains(&eq.dst) {
            names.push(eq.dst.clone());
        }
    }
    names
}

/// All scenarios of 1..=k faults with the given polarity.
pub fn fault_scenarios(parsed: &ParsedGadget, k: usize, set: bool) -> Vec<FaultScenario> {
    let names = faultable_names(parsed);
    let mut scenarios = Vec::new();
    for size in 1..=k.min(names.len()) {
        for combo in names.iter().combinations(size) {
            scenarios.push(FaultScenario {
                vars: combo
                    .into_iter()
                    .map(|name| FaultVar {
                        name: name.clone(),
                        set,
                    })
                    .collect(),
            });
        }
    }
    scenarios
}

/// A user-supplied list of fault combinations to skip silently.
pub fn is_ignored(scenario: &FaultScenario, ignored: &[Vec<String>]) -> bool {
    ignored.iter().any(|combo| {
        combo.len() == scenario.vars.len()
            && scenario.vars.iter().all(|v| combo.contains(&v.name))
    })
}

#[derive(Clone, Debug, Serialize)]
pub struct CniReport {
    pub scenarios_checked: usize,
    pub scenarios_ignored: usize,
    pub failing_scenarios: Vec<(Vec<String>, u64)>,
}

impl CniReport {
    pub fn is_secure(&self) -> bool {
        self.failing_scenarios.is_empty()
    }
}

pub fn cni(
    parsed: &ParsedGadget,
    opts: ModelOptions,
    t: usize,
    k: usize,
    set: bool,
    ignored: &[Vec<String>],
) -> Result<CniReport> {
    let mut report = CniReport {
        scenarios_checked: 0,
        scenarios_ignored: 0,
        failing_scenarios: Vec::new(),
    };
    for scenario in fault_scenarios(parsed, k, set) {
        if is_ignored(&scenario, ignored) {
            report.scenarios_ignored += 1;
            continue;
        }
        let circuit = Circuit::build_faulted(parsed, opts, &scenario)?;
        let outcome: ProbingOutcome = verify_probing(&circuit, ProbingProperty::Ni, t, true)?;
        report.scenarios_checked += 1;
        if !outcome.is_secure() {
            log::info!(
                "NI failure under faults on {:?}",
                scenario.names().collect::<Vec<_>>()
            );
            report
                .failing_scenarios
                .push((scenario.names().map(str::to_string).collect(), outcome.failures));
        }
    }
    Ok(report)
}

#[derive(Clone, Debug, Serialize)]
pub struct CombinedRpReport {
    /// Worst coefficient vector across fault scenarios (the fault-free run
    /// included).
    pub worst_coeffs: Vec<u64>,
    pub scenarios_checked: usize,
    pub scenarios_ignored: usize,
    /// Combined failure probability, when leak and fault rates were given.
    pub epsilon: Option<f64>,
}

#[allow(clippy::too_many_arguments)]
pub fn crp(
    parsed: &ParsedGadget,
    opts: ModelOptions,
    coeff_max: Option<usize>,
    k: usize,
    set: bool,
    ignored: &[Vec<String>],
    rates: Option<(f64, f64)>,
    parallel: bool,
) -> Result<CombinedRpReport> {
    combined_random_probing(parsed, opts, coeff_max, k, set, ignored, rates, parallel, None)
}

#[allow(clippy::too_many_arguments)]
pub fn crpc(
    parsed: &ParsedGadget,
    opts: ModelOptions,
    coeff_max: Option<usize>,
    k: usize,
    t: usize,
    t_output: usize,
    set: bool,
    ignored: &[Vec<String>],
    rates: Option<(f64, f64)>,
    parallel: bool,
) -> Result<CombinedRpReport> {
    combined_random_probing(
        parsed,
        opts,
        coeff_max,
        k,
        set,
        ignored,
        rates,
        parallel,
        Some((t, t_output)),
    )
}

#[allow(clippy::too_many_arguments)]
fn combined_random_probing(
    parsed: &ParsedGadget,
    opts: ModelOptions,
    coeff_max: Option<usize>,
    k: usize,
    set: bool,
    ignored: &[Vec<String>],
    rates: Option<(f64, f64)>,
    parallel: bool,
    rpc: Option<(usize, usize)>,
) -> Result<CombinedRpReport> {
    let scenario_coeffs = |scenario: Option<&FaultScenario>| -> Result<Vec<u64>> {
        let circuit = match scenario {
            Some(s) => Circuit::build_faulted(parsed, opts, s)?,
            None => Circuit::build(parsed, opts)?,
        };
        match rpc {
            Some((t, t_output)) => {
                Ok(rpc_coeffs(&circuit, coeff_max, t, t_output, parallel)?.coeffs)
            }
            None => Ok(rp_coeffs(&circuit, coeff_max, parallel)?.coeffs),
        }
    };

    let base = scenario_coeffs(None)?;
    let mut worst = base.clone();
    let mut checked = 0usize;
    let mut ignored_count = 0usize;

    let scenarios = fault_scenarios(parsed, k, set);
    let faultable = faultable_names(parsed).len();
    let mut epsilon = rates.map(|(pleak, pfault)| {
        (1.0 - pfault).powi(faultable as i32) * failure_proba_at(&base, pleak)
    });

    for scenario in &scenarios {
        if is_ignored(scenario, ignored) {
            ignored_count += 1;
            continue;
        }
        let coeffs = scenario_coeffs(Some(scenario))?;
        checked += 1;
        // Vectors can have different lengths (faults change wire weights);
        // compare on the common prefix and keep the longer tail.
        if worst.len() < coeffs.len() {
            worst.resize(coeffs.len(), 0);
        }
        for (w, &c) in worst.iter_mut().zip(coeffs.iter()) {
            *w = (*w).max(c);
        }
        if let (Some(eps), Some((pleak, pfault))) = (epsilon.as_mut(), rates) {
            let j = scenario.vars.len() as i32;
            let weight = pfault.powi(j) * (1.0 - pfault).powi(faultable as i32 - j);
            *eps += weight * failure_proba_at(&coeffs, pleak).min(1.0);
        }
    }

    Ok(CombinedRpReport {
        worst_coeffs: worst,
        scenarios_checked: checked,
        scenarios_ignored: ignored_count,
        epsilon: epsilon.map(|e| e.min(1.0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedGadget;

    const REFRESH2: &str = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d
d0 = a0 + r0
d1 = a1 + r0
";

    #[test]
    fn test_fault_scenarios_enumeration() {
        let parsed = ParsedGadget::parse_str(REFRESH2).unwrap();
        // Faultable: a0 a1 r0 (outputs excluded) -> 3 singletons + 3 pairs.
        let scenarios = fault_scenarios(&parsed, 2, true);
        assert_eq!(scenarios.len(), 6);
        assert!(scenarios.iter().all(|s| s.vars.iter().all(|v| v.set)));
    }

    #[test]
    fn test_ignored_scenarios() {
        let parsed = ParsedGadget::parse_str(REFRESH2).unwrap();
        let scenarios = fault_scenarios(&parsed, 1, false);
        let ignored = vec![vec!["r0".to_string()]];
        let skipped: Vec<_> = scenarios.iter().filter(|s| is_ignored(s, &ignored)).collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].vars[0].name, "r0");
    }

    #[test]
    fn test_cni_detects_random_fault() {
        // Faulting r0 to a constant unmasks d0: a single probe then leaks
        // a0... which is fine for NI at t = 1 (1 probe, 1 share). The
        // refresh stays CNI(1, 1): check it runs and reports scenarios.
        let parsed = ParsedGadget::parse_str(REFRESH2).unwrap();
        let report = cni(&parsed, ModelOptions::default(), 1, 1, false, &[]).unwrap();
        assert_eq!(report.scenarios_checked, 3);
        // With t = 1 no single faulted wire makes one probe reveal both
        // shares of a.
        assert!(report.is_secure());
    }

    #[test]
    fn test_cni_broken_by_sum_wire() {
        // s = a0 + a1 + r0 is NI; faulting r0 turns s into a0 + a1.
        let src = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d
s = a0 + a1
t = s + r0
d0 = t
d1 = r0
";
        let parsed = ParsedGadget::parse_str(src).unwrap();
        let clean = Circuit::build(&parsed, ModelOptions::default()).unwrap();
        // Unfaulted, the wire s already leaks both shares: NI(1) fails even
        // without faults, so CNI must fail as well.
        let base = verify_probing(&clean, ProbingProperty::Ni, 1, true).unwrap();
        assert!(!base.is_secure());
        let report = cni(&parsed, ModelOptions::default(), 1, 1, false, &[]).unwrap();
        assert!(!report.is_secure());
    }

    #[test]
    fn test_crp_worst_vector_dominates_base() {
        let parsed = ParsedGadget::parse_str(REFRESH2).unwrap();
        let report = crp(
            &parsed,
            ModelOptions::default(),
            None,
            1,
            false,
            &[],
            Some((0.01, 0.001)),
            false,
        )
        .unwrap();
        let base = rp_coeffs(
            &Circuit::build(&parsed, ModelOptions::default()).unwrap(),
            None,
            false,
        )
        .unwrap();
        for (w, b) in report.worst_coeffs.iter().zip(base.coeffs.iter()) {
            assert!(w >= b);
        }
        let eps = report.epsilon.unwrap();
        assert!((0.0..=1.0).contains(&eps));
    }
}
