//! Write a synthetic APOGEE-like catalog for exercising `apogee-qc` offline.
//!
//! Stars are drawn from a red-giant branch and a main sequence. A fraction
//! carry PARAMFLAG / ASPCAPFLAG bits, missing values (NaN) or the zero
//! sentinel, so every quality cut has something to reject.

use std::path::PathBuf;

use anyhow::Result;
use apogee_qc::data::model::{Catalog, Column, ColumnData};
use apogee_qc::data::rules::{AspcapFlagBit, ParamFlagBit};
use apogee_qc::data::writer::write_parquet;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

/// Entries per PARAMFLAG row, as in the DR17 allStar files.
const PARAMFLAG_WIDTH: usize = 9;

#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
#[command(about = "Write a synthetic APOGEE-like catalog as Parquet")]
struct Args {
    /// Number of stars
    #[arg(short, long, default_value = "20000")]
    rows: usize,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Fraction of stars given a random flag bit
    #[arg(long, default_value = "0.08")]
    flagged: f64,

    /// Fraction of measurements replaced by NaN or the zero sentinel
    #[arg(long, default_value = "0.02")]
    missing: f64,

    #[arg(short, long, default_value = "sample_allstar.parquet")]
    output: PathBuf,
}

struct Star {
    teff: f64,
    logg: f64,
    fe_h: f64,
}

fn draw_star(rng: &mut StdRng, giants: &Normal<f64>, noise: &Normal<f64>) -> Star {
    let fe_h = -0.2 + 0.3 * noise.sample(rng);
    if rng.random_bool(0.6) {
        // Red-giant branch: cooler stars have lower surface gravity.
        let teff = giants.sample(rng);
        let logg = 2.5 + (teff - 4700.0) * 1.2e-3 + 0.25 * noise.sample(rng);
        Star { teff, logg, fe_h }
    } else {
        let teff = 5600.0 + 500.0 * noise.sample(rng);
        let logg = 4.4 + 0.15 * noise.sample(rng);
        Star { teff, logg, fe_h }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let catalog = synthesize(&args)?;
    write_parquet(&catalog, &args.output)?;

    println!(
        "Wrote {} synthetic stars to {}",
        catalog.len(),
        args.output.display()
    );
    Ok(())
}

fn synthesize(args: &Args) -> Result<Catalog> {
    let mut rng = StdRng::seed_from_u64(args.seed);

    let giants: Normal<f64> = Normal::new(4700.0, 300.0)?;
    let noise: Normal<f64> = Normal::new(0.0, 1.0)?;
    let teff_err: Normal<f64> = Normal::new(60.0, 20.0)?;
    let logg_err: Uniform<f64> = Uniform::new(0.02, 0.5)?;
    let fe_h_err: Uniform<f64> = Uniform::new(0.005, 0.25)?;

    let param_bits = [
        ParamFlagBit::GridedgeBad,
        ParamFlagBit::CalrangeBad,
        ParamFlagBit::OtherBad,
        ParamFlagBit::TeffCut,
    ];
    let aspcap_bits = [
        AspcapFlagBit::TeffBad,
        AspcapFlagBit::LoggBad,
        AspcapFlagBit::MHBad,
        AspcapFlagBit::StarBad,
        AspcapFlagBit::ColorteBad,
        AspcapFlagBit::Chi2Bad,
    ];

    let n = args.rows;
    let mut measurements: [Vec<f64>; 6] = Default::default();
    let mut paramflag = vec![0i64; n * PARAMFLAG_WIDTH];
    let mut aspcapflag = vec![0i64; n];

    for row in 0..n {
        let star = draw_star(&mut rng, &giants, &noise);
        let values = [
            star.teff,
            teff_err.sample(&mut rng).abs() + 5.0,
            star.logg,
            logg_err.sample(&mut rng),
            star.fe_h,
            fe_h_err.sample(&mut rng),
        ];
        for (col, mut value) in measurements.iter_mut().zip(values) {
            if rng.random_bool(args.missing) {
                value = if rng.random_bool(0.5) { f64::NAN } else { 0.0 };
            }
            col.push(value);
        }

        if rng.random_bool(args.flagged) {
            let index = rng.random_range(0..4);
            let bit = param_bits[rng.random_range(0..param_bits.len())].bit();
            paramflag[row * PARAMFLAG_WIDTH + index] |= 1 << bit;
        }
        if rng.random_bool(args.flagged / 2.0) {
            let bit = aspcap_bits[rng.random_range(0..aspcap_bits.len())].bit();
            aspcapflag[row] |= 1 << bit;
        }
    }

    let names = ["TEFF", "TEFF_ERR", "LOGG", "LOGG_ERR", "FE_H", "FE_H_ERR"];
    let mut columns: Vec<Column> = names
        .into_iter()
        .zip(measurements)
        .map(|(name, values)| Column::new(name, ColumnData::Float(values)))
        .collect();
    columns.push(Column::new(
        "PARAMFLAG",
        ColumnData::IntArray {
            width: PARAMFLAG_WIDTH,
            values: paramflag,
        },
    ));
    columns.push(Column::new("ASPCAPFLAG", ColumnData::Int(aspcapflag)));

    Ok(Catalog::from_columns(columns)?)
}
