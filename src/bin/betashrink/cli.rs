use clap::{Parser, ValueEnum};

/// Empirical-Bayes shrinkage of a two-way table of binary outcomes.
#[derive(Parser, Debug)]
#[command(name = "betashrink", version, about = "Beta-binomial crosstab shrinkage")]
pub struct Cli {
    #[arg(
        long,
        short = 'i',
        value_name = "TABLE",
        help = "Tab-separated table with one binary outcome per line"
    )]
    pub input: String,

    #[arg(long, default_value = "outcome", help = "Name of the 0/1 outcome column")]
    pub outcome: String,

    #[arg(long, default_value = "row", help = "Name of the row group column")]
    pub row: String,

    #[arg(long, default_value = "column", help = "Name of the column group column")]
    pub column: String,

    #[arg(
        long,
        short = 'o',
        default_value = "betashrink",
        value_name = "OUT",
        help = "Output directory, must not exist"
    )]
    pub out: String,

    #[arg(
        long,
        default_value = "100000",
        help = "Number of input lines to read and encode at once"
    )]
    pub chunk_size: usize,

    #[arg(long, default_value = "0.0001", help = "Parameter and objective tolerance of the fit")]
    pub tol: f64,

    #[arg(long, default_value = "500", help = "Maximum number of optimizer iterations")]
    pub max_iter: usize,

    #[arg(long, default_value = "1000", help = "Maximum number of objective evaluations")]
    pub max_evaluations: usize,

    #[arg(long, help = "Start the fit from a method-of-moments estimate instead of (2, 2)")]
    pub moments: bool,

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
