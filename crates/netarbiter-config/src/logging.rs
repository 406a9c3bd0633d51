use clap::ValueEnum;
use strum::{Display, EnumString};

/// How the arbiter renders its diagnostics on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display, ValueEnum)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event.
    Json,
    /// Single-line human-readable events.
    #[default]
    Compact,
}
