use anyhow::{anyhow, Result};
use betashrink_utils::crosstab::Crosstab;
use betashrink_utils::fit::FitOptions;
use betashrink_utils::io::{self, OutcomeChunkReader, OutcomeColumns, ShrinkageReport};
use betashrink_utils::table::stack_chunks;
use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Instant;

mod cli;

fn main() {
    let args = cli::Cli::parse();
    // Set up logging level
    let filter = match args.verbosity {
        cli::LogLevel::Silent => "off",
        cli::LogLevel::Normal => "info",
        cli::LogLevel::Verbose => "debug",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    betashrink(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
}

fn fit_options(args: &cli::Cli) -> FitOptions {
    let options = FitOptions::default()
        .with_tolerance(args.tol)
        .with_max_iter(args.max_iter)
        .with_max_evaluations(args.max_evaluations);
    if args.moments {
        options.with_method_of_moments()
    } else {
        options
    }
}

fn betashrink(args: &cli::Cli) -> Result<()> {
    let global_timer = Instant::now();
    let options = fit_options(args);
    options.validate()?;

    let out_path = Path::new(&args.out);
    if out_path.exists() {
        return Err(anyhow!("Output directory already exists: {}", args.out));
    }

    info!("Reading outcomes from: {}", args.input);
    let timer = Instant::now();
    let file = File::open(&args.input)
        .map_err(|e| anyhow!("Could not open input file: {} ({})", args.input, e))?;
    let columns = OutcomeColumns::new(&args.outcome, &args.row, &args.column);
    let mut reader = OutcomeChunkReader::new(file, &columns, args.chunk_size)?;
    let chunks = reader.read_all()?;
    let table = stack_chunks(&chunks);
    drop(chunks);
    info!(
        "Loaded {} outcomes, {} row groups, {} column groups in {:?}",
        table.len(),
        table.row_levels().len(),
        table.column_levels().len(),
        timer.elapsed()
    );

    let crosstab = Crosstab::from_rows(table.outcome_rows());
    debug!("{} of {} cells observed", crosstab.n_observed_cells(), crosstab.rows().len() * crosstab.columns().len());
    let shrinkage = crosstab.shrinkage_table(&options)?;
    if args.strict {
        shrinkage.fit.ensure_converged()?;
    }
    if let Some([se_alpha, se_beta]) = shrinkage.fit.standard_errors {
        debug!("Standard errors: α ± {:.4}, β ± {:.4}", se_alpha, se_beta);
    } else {
        warn!("Standard errors unavailable, observed information is not positive definite");
    }

    std::fs::create_dir(out_path)?;
    info!("Created output directory: {}", args.out);

    let label = |levels: &[String], code: &u32| {
        levels
            .get(*code as usize)
            .cloned()
            .unwrap_or_else(|| code.to_string())
    };
    let row_label = |code: &u32| label(table.row_levels(), code);
    let column_label = |code: &u32| label(table.column_levels(), code);

    let shrunken = shrinkage.shrunken.clone().relabel(row_label, column_label);
    let counts = shrinkage.counts.clone().relabel(row_label, column_label);

    let shrunken_path = out_path.join("shrunken.tsv");
    io::write_matrix(BufWriter::new(File::create(&shrunken_path)?), &shrunken, &args.row)?;
    let counts_path = out_path.join("counts.tsv");
    io::write_matrix(BufWriter::new(File::create(&counts_path)?), &counts, &args.row)?;

    let report = ShrinkageReport::from_table(&shrinkage);
    let report_path = out_path.join("diagnostics.json");
    io::write_report(BufWriter::new(File::create(&report_path)?), &report)?;

    let sd = |v: Option<f64>| v.map_or_else(|| "NA".to_string(), |v| format!("{:.6}", v));
    info!("SD of row means: {}", sd(report.diagnostics.row_mean_sd));
    info!("SD of column means: {}", sd(report.diagnostics.column_mean_sd));
    info!("SD of interaction: {}", sd(report.diagnostics.interaction_sd));
    info!("Finished in {:?}", global_timer.elapsed());
    Ok(())
}
