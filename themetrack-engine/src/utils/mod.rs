pub mod log_format;

pub use log_format::{compress_column_list, preview_compact};
