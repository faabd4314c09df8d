pub mod csv_source;
pub mod loader;

pub use csv_source::{read_standardized_csv, read_standardized_csv_from_reader, standardize_cell};
pub use loader::RuleLoader;
