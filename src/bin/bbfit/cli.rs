use clap::{Parser, ValueEnum};

/// Maximum-likelihood fit of a beta-binomial model to grouped counts.
#[derive(Parser, Debug)]
#[command(name = "bbfit", version, about = "Beta-binomial maximum-likelihood fit")]
pub struct Cli {
    #[arg(
        long,
        short = 'i',
        value_name = "TABLE",
        help = "Tab-separated table with one group per line"
    )]
    pub input: String,

    #[arg(long, default_value = "successes", help = "Name of the success count column")]
    pub successes: String,

    #[arg(long, default_value = "trials", help = "Name of the trial count column")]
    pub trials: String,

    #[arg(long, default_value = "2.0", help = "Starting value of alpha")]
    pub alpha: f64,

    #[arg(long, default_value = "2.0", help = "Starting value of beta")]
    pub beta: f64,

    #[arg(long, help = "Start from a method-of-moments estimate, ignoring --alpha and --beta")]
    pub moments: bool,

    #[arg(long, default_value = "0.0001", help = "Parameter and objective tolerance")]
    pub tol: f64,

    #[arg(long, default_value = "500", help = "Maximum number of optimizer iterations")]
    pub max_iter: usize,

    #[arg(long, default_value = "1000", help = "Maximum number of objective evaluations")]
    pub max_evaluations: usize,

    #[arg(long, help = "Fail when the fit does not converge")]
    pub strict: bool,

    #[arg(
        value_enum,
        long,
        default_value = "normal",
        value_name = "VERBOSITY",
        help = "Verbosity level"
    )]
    pub verbosity: LogLevel,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogLevel {
    Verbose,
    Normal,
    Silent,
}
