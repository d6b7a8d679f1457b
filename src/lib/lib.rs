pub mod crosstab;
pub mod error;
pub mod fit;
pub mod io;
pub mod likelihood;
pub mod logfact;
pub mod model;
pub mod optimizer;
pub mod shrink;
pub mod stats;
pub mod table;

pub use crosstab::{shrinkage_table, Crosstab, OutcomeRow, ShrinkageTable};
pub use error::{Error, Result};
pub use fit::{fit_beta_binomial, fit_beta_binomial_with, FitOptions, FitResult, InitialGuess};
pub use likelihood::{log_pmf, negative_log_likelihood};
pub use model::{BetaParams, CountObservation};
pub use shrink::shrink;
