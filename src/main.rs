//! `apogee-qc`: prepare a clean APOGEE training catalog and plot it.
//!
//! - `prepare`: download (or read) the catalog, apply the quality cuts and
//!   write the surviving rows to Parquet
//! - `plot`: render a Kiel diagram from a catalog

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use apogee_qc::color::Colormap;
use apogee_qc::config::PipelineConfig;
use apogee_qc::data::filter::screen_catalog;
use apogee_qc::data::loader::{load_catalog, load_for_rules};
use apogee_qc::data::model::{Catalog, ColumnData};
use apogee_qc::data::writer::{to_record_batch, write_parquet};
use apogee_qc::download::fetch_catalog;
use apogee_qc::plot::render_kiel;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "apogee-qc")]
#[command(about = "APOGEE catalog quality cuts and Kiel diagrams")]
#[command(version)]
struct Args {
    /// JSON pipeline configuration; omitted keys use the DR17 defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the quality cuts and write the cleaned catalog
    Prepare {
        /// Local catalog (.fits, .parquet or .csv) instead of downloading
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Download again even if the catalog is already on disk
        #[arg(long)]
        force_download: bool,

        /// Output Parquet file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rows of the cleaned table to print
        #[arg(long, default_value = "5")]
        preview: usize,
    },

    /// Render a Kiel diagram
    Plot {
        /// Catalog to plot
        input: PathBuf,

        /// Output image (.png, .jpg, .bmp or .svg)
        #[arg(short, long, default_value = "kiel.png")]
        output: PathBuf,

        #[arg(long, default_value = "TEFF")]
        x: String,

        #[arg(long, default_value = "LOGG")]
        y: String,

        /// Column mapped onto the colormap
        #[arg(long, default_value = "FE_H")]
        color: String,

        #[arg(long)]
        vmin: Option<f64>,

        #[arg(long)]
        vmax: Option<f64>,

        /// viridis, plasma, magma, inferno, cividis or gray
        #[arg(long)]
        cmap: Option<Colormap>,

        /// Density raster resolution in cells per inch
        #[arg(long)]
        dpi: Option<f64>,

        /// Figure width and height in inches
        #[arg(long, num_args = 2, value_names = ["W", "H"])]
        figsize: Option<Vec<f64>>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        xlabel: Option<String>,

        #[arg(long)]
        ylabel: Option<String>,

        #[arg(long)]
        colorbar_label: Option<String>,

        /// Draw individual points instead of a density raster
        #[arg(long)]
        scatter: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    match args.command {
        Command::Prepare {
            input,
            force_download,
            output,
            preview,
        } => {
            let output = output.unwrap_or_else(|| config.output_path());
            prepare(&config, input, force_download, &output, preview)
        }
        Command::Plot {
            input,
            output,
            x,
            y,
            color,
            vmin,
            vmax,
            cmap,
            dpi,
            figsize,
            title,
            xlabel,
            ylabel,
            colorbar_label,
            scatter,
        } => {
            let mut opts = config.plot.clone();
            if let Some(v) = vmin {
                opts.vmin = v;
            }
            if let Some(v) = vmax {
                opts.vmax = v;
            }
            if let Some(c) = cmap {
                opts.cmap = c;
            }
            if let Some(d) = dpi {
                opts.dpi = d;
            }
            if let Some(size) = figsize {
                opts.figsize = (size[0], size[1]);
            }
            if let Some(t) = title {
                opts.title = t;
            }
            if let Some(l) = xlabel {
                opts.xlabel = l;
            }
            if let Some(l) = ylabel {
                opts.ylabel = l;
            }
            if let Some(l) = colorbar_label {
                opts.colorbar_label = l;
            }
            opts.scatter |= scatter;

            let columns = [x.as_str(), y.as_str(), color.as_str()];
            let catalog = load_catalog(&input, &columns, config.hdu)?;
            let xs = numeric(&catalog, &x)?;
            let ys = numeric(&catalog, &y)?;
            let cs = numeric(&catalog, &color)?;
            render_kiel(&xs, &ys, &cs, &opts, &config.style, &output)
                .with_context(|| format!("rendering {}", output.display()))?;
            println!("Wrote {}", output.display());
            Ok(())
        }
    }
}

fn prepare(
    config: &PipelineConfig,
    input: Option<PathBuf>,
    force_download: bool,
    output: &Path,
    preview: usize,
) -> Result<()> {
    let input = match input {
        Some(path) => path,
        None => fetch_catalog(&config.url, &config.catalog_path(), force_download)?,
    };

    let catalog = load_for_rules(&input, &config.rules, config.hdu)?;

    let screening = screen_catalog(&catalog, &config.rules)?;
    log::info!("Quality cuts: {}", screening.report);
    write_parquet(&screening.catalog, output)?;

    println!(
        "Kept {} of {} rows, wrote {}",
        screening.report.output_rows,
        screening.report.input_rows,
        output.display()
    );
    if preview > 0 && !screening.catalog.is_empty() {
        let batch = to_record_batch(&screening.catalog)?;
        let head = batch.slice(0, preview.min(batch.num_rows()));
        println!("{}", arrow::util::pretty::pretty_format_batches(&[head])?);
    }
    Ok(())
}

/// A plottable column; integers are widened.
fn numeric(catalog: &Catalog, name: &str) -> Result<Vec<f64>> {
    match catalog.column(name) {
        Some(ColumnData::Float(v)) => Ok(v.clone()),
        Some(ColumnData::Int(v)) => Ok(v.iter().map(|&i| i as f64).collect()),
        Some(other) => anyhow::bail!("column '{name}' is not plottable ({})", other.kind()),
        None => anyhow::bail!("column '{name}' is missing"),
    }
}
