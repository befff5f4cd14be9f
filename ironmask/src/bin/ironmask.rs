use std::path::PathBuf;
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use env_logger::Env;
use log::info;
use structopt::StructOpt;

use ironmask::circuit::{Circuit, ModelOptions};
use ironmask::coeffs::format_coeffs;
use ironmask::parser::ParsedGadget;
use ironmask::properties::{card_rpc, faults, random_probing, Property};
use ironmask::rules::verify_probing;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "ironmask",
    about = "Verification of masked gadgets against probing, random-probing \
             and combined fault properties."
)]
struct Options {
    /// Property to verify: NI|SNI|freeSNI|IOS|PINI|RP|RPC|RPE|cardRPC|CNI|CRP|CRPC
    property: Property,

    /// Gadget description file
    #[structopt(parse(from_os_str))]
    file: PathBuf,

    /// Threshold for NI/SNI/PINI/freeSNI/IOS/RPC/RPE/CNI/CRPC
    #[structopt(short = "t")]
    t: Option<usize>,

    /// Number of faults for CNI/CRP/CRPC
    #[structopt(short = "k")]
    k: Option<usize>,

    /// Last precise coefficient to compute for RP-like properties
    #[structopt(short = "c", long = "coeff_max")]
    coeff_max: Option<usize>,

    /// Output-share count for RPC/RPE (defaults to -t)
    #[structopt(short = "o", long = "t_output")]
    t_output: Option<usize>,

    /// Number of cores to use (-1: all cores)
    #[structopt(short = "j", long = "jobs", default_value = "1", allow_hyphen_values = true)]
    jobs: i64,

    /// Leakage probability for CRP/CRPC
    #[structopt(short = "l")]
    leak_rate: Option<f64>,

    /// Fault probability for CRP/CRPC
    #[structopt(short = "f")]
    fault_rate: Option<f64>,

    /// Fault polarity: 1 faults set wires to one, 0 resets them
    #[structopt(short = "s", default_value = "1")]
    set: u8,

    /// Takes glitches into account
    #[structopt(long)]
    glitch: bool,

    /// Takes transitions into account
    #[structopt(long)]
    transition: bool,

    /// Verbosity (repeat for more)
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Options::from_args();

    let default_filter = match opts.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    if opts.jobs != 1 {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if opts.jobs > 1 {
            builder = builder.num_threads(opts.jobs as usize);
        }
        builder
            .build_global()
            .context("failed to configure the thread pool")?;
    }
    let parallel = opts.jobs != 1;

    if opts.property.requires_t() {
        ensure!(
            opts.t.is_some(),
            "when computing property {}, argument -t is mandatory",
            opts.property.name()
        );
    }
    if opts.property.requires_k() {
        ensure!(
            opts.k.is_some(),
            "when computing property {}, argument -k is mandatory",
            opts.property.name()
        );
    }
    let t_output = opts.t_output.or(opts.t);

    let parsed = ParsedGadget::parse_file(&opts.file)?;
    let model = ModelOptions {
        glitch: opts.glitch,
        transition: opts.transition,
    };
    let circuit = Circuit::build(&parsed, model)?;

    println!(
        "Gadget with {} input(s), {} output(s), {} share(s)",
        circuit.secret_count, circuit.output_count, circuit.share_count
    );
    println!(
        "Total number of intermediate variables: {}\n\
         Total number of variables: {}\n\
         Total number of wires: {}",
        circuit.length,
        circuit.var_count(),
        circuit.total_wires
    );
    if circuit.duplications > 1 {
        println!("Total number of duplications: {}", circuit.duplications);
    }
    println!();

    let start = Instant::now();
    run_property(&opts, &parsed, &circuit, model, t_output, parallel)?;
    let elapsed = start.elapsed().as_secs();
    println!(
        "\nVerification completed in {} min {} sec.",
        elapsed / 60,
        elapsed % 60
    );
    Ok(())
}

fn run_property(
    opts: &Options,
    parsed: &ParsedGadget,
    circuit: &Circuit,
    model: ModelOptions,
    t_output: Option<usize>,
    parallel: bool,
) -> Result<()> {
    let property = opts.property;
    if let Some(probing) = property.probing() {
        let t = opts.t.unwrap();
        let outcome = verify_probing(circuit, probing, t, false)?;
        println!(
            "{} with t = {}: {} failure(s) out of {} tuple(s) checked",
            property.name(),
            t,
            outcome.failures,
            outcome.checked
        );
        if let Some(tuple) = &outcome.first_failure {
            let names: Vec<&str> = tuple.iter().map(|&v| circuit.name(v)).collect();
            println!("Failing tuple: [ {} ]", names.join(" "));
        }
        return Ok(());
    }

    match property {
        Property::Rp => {
            let report = random_probing::rp_coeffs(circuit, opts.coeff_max, parallel)?;
            info!("{} incompressible tuples", report.incompressible_count);
            println!("f(p) = {}", format_coeffs(&report.coeffs));
            print_bounds(report.bounds);
        }
        Property::Rpc => {
            let t = opts.t.context("RPC requires -t")?;
            let o = t_output.unwrap_or(t);
            let report = random_probing::rpc_coeffs(circuit, opts.coeff_max, t, o, parallel)?;
            println!("f(p) = {}", format_coeffs(&report.coeffs));
            print_bounds(report.bounds);
        }
        Property::Rpe => {
            let t = opts.t.context("RPE requires -t")?;
            let o = t_output.unwrap_or(t);
            let report = random_probing::rpe_coeffs(circuit, opts.coeff_max, o, parallel)?;
            print_rpe(&report);
        }
        Property::CardRpc => {
            let report = card_rpc::card_rpc_envelopes(circuit, opts.coeff_max)?;
            for (t_in, row) in report.env.iter().enumerate() {
                for (t_out, coeffs) in row.iter().enumerate() {
                    println!("tin = {t_in}, tout = {t_out}");
                    println!("f(p) = {}", format_coeffs(coeffs));
                    println!();
                }
            }
        }
        Property::Cni => {
            let t = opts.t.unwrap();
            let k = opts.k.unwrap();
            let report = faults::cni(parsed, model, t, k, opts.set != 0, &[])?;
            println!(
                "CNI with t = {}, k = {}: {} scenario(s) checked, {} ignored",
                t, k, report.scenarios_checked, report.scenarios_ignored
            );
            if report.is_secure() {
                println!("No failing fault scenario.");
            } else {
                println!("{} failing scenario(s):", report.failing_scenarios.len());
                for (names, failures) in &report.failing_scenarios {
                    println!("  faults on [ {} ]: {} failure(s)", names.join(" "), failures);
                }
            }
        }
        Property::Crp => {
            let k = opts.k.unwrap();
            let rates = match (opts.leak_rate, opts.fault_rate) {
                (Some(l), Some(f)) => Some((l, f)),
                _ => None,
            };
            let report = faults::crp(
                parsed,
                model,
                opts.coeff_max,
                k,
                opts.set != 0,
                &[],
                rates,
                parallel,
            )?;
            print_combined(&report);
        }
        Property::Crpc => {
            let t = opts.t.unwrap();
            let k = opts.k.unwrap();
            let o = t_output.unwrap_or(t);
            let rates = match (opts.leak_rate, opts.fault_rate) {
                (Some(l), Some(f)) => Some((l, f)),
                _ => None,
            };
            let report = faults::crpc(
                parsed,
                model,
                opts.coeff_max,
                k,
                t,
                o,
                opts.set != 0,
                &[],
                rates,
                parallel,
            )?;
            print_combined(&report);
        }
        _ => unreachable!("probing properties handled above"),
    }
    Ok(())
}

fn print_bounds(bounds: ironmask::coeffs::LeakageBounds) {
    println!();
    println!(
        "pmax = {:.10} -- log2(pmax) = {:.10}",
        bounds.pmax,
        bounds.pmax.log2()
    );
    println!(
        "pmin = {:.10} -- log2(pmin) = {:.10}",
        bounds.pmin,
        bounds.pmin.log2()
    );
}

fn print_rpe(report: &random_probing::RpeReport) {
    use random_probing::RpeReport;
    match report {
        RpeReport::TwoInput { rpe1, rpe2, bounds } => {
            println!("Coeffs RPE1:");
            println!("I1 = {}", format_coeffs(&rpe1[0]));
            println!("I2 = {}", format_coeffs(&rpe1[1]));
            println!("I1 and I2 = {}", format_coeffs(&rpe1[2]));
            println!();
            println!("Coeffs RPE2:");
            println!("I1 = {}", format_coeffs(&rpe2[0]));
            println!("I2 = {}", format_coeffs(&rpe2[1]));
            println!("I1 and I2 = {}", format_coeffs(&rpe2[2]));
            print_bounds(*bounds);
        }
        RpeReport::Single { rpe1, rpe2, bounds } => {
            println!("RPE1 = {}", format_coeffs(rpe1));
            println!("RPE2 = {}", format_coeffs(rpe2));
            print_bounds(*bounds);
        }
        RpeReport::Copy { vectors, bounds } => {
            for (i, v) in vectors.iter().enumerate() {
                let label = ["RPE11", "RPE12", "RPE21", "RPE22"][i];
                println!("{label} = {}", format_coeffs(v));
            }
            print_bounds(*bounds);
        }
    }
}

fn print_combined(report: &faults::CombinedRpReport) {
    println!(
        "{} fault scenario(s) checked, {} ignored",
        report.scenarios_checked, report.scenarios_ignored
    );
    println!("worst f(p) = {}", format_coeffs(&report.worst_coeffs));
    if let Some(eps) = report.epsilon {
        println!("epsilon = {:.10} -- log2(epsilon) = {:.10}", eps, eps.log2());
    }
}
