pub mod output;
pub mod progress;
pub mod table;

pub use output::{error, header, info, is_quiet, section, success, summary_row, theme, warn, Icons, Theme};
pub use progress::{IngestProgress, Spinner};
pub use table::{layer_table, results_table};
