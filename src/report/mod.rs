//! Progress reporting and result output.

pub mod console;
pub mod display_mode;
pub mod progress;
pub mod results;

pub use console::{print_report, ConsoleReporter};
pub use display_mode::DisplayMode;
pub use progress::{NullReporter, PhaseProgress, ProgressEvent, ProgressReporter};
pub use results::RunReport;
