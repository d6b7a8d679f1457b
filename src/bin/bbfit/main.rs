use anyhow::{anyhow, Result};
use betashrink_utils::fit::{fit_beta_binomial, FitOptions};
use betashrink_utils::io::{read_count_observations, write_report};
use clap::Parser;
use env_logger::Env;
use log::info;
use std::fs::File;

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

    bbfit(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
}

fn bbfit(args: &cli::Cli) -> Result<()> {
    let mut options = FitOptions::default()
        .with_initial(args.alpha, args.beta)
        .with_tolerance(args.tol)
        .with_max_iter(args.max_iter)
        .with_max_evaluations(args.max_evaluations);
    if args.moments {
        options = options.with_method_of_moments();
    }

    let file = File::open(&args.input)
        .map_err(|e| anyhow!("Could not open input file: {} ({})", args.input, e))?;
    let observations = read_count_observations(file, &args.successes, &args.trials)?;
    info!("Loaded {} groups from {}", observations.len(), args.input);

    let fit = fit_beta_binomial(&observations, &options)?;
    if args.strict {
        fit.ensure_converged()?;
    }
    info!("AIC = {:.3}, BIC = {:.3}", fit.aic(), fit.bic());
    write_report(std::io::stdout().lock(), &fit)?;
    Ok(())
}
