//! Output formatting for the s3migrate binary

mod formatter;

pub use formatter::Formatter;

/// How results are printed
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Emit the run summary as JSON
    pub json: bool,
    pub no_color: bool,
    /// Suppress everything but errors
    pub quiet: bool,
}
