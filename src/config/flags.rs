//! Framework command-line flags.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

/// Flags every Ego application understands.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "ego", disable_version_flag = true)]
pub struct EgoFlags {
    /// Config file path (falls back to EGO_CONFIG_PATH, then config/local.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Reload the config file when it changes.
    #[arg(long)]
    pub watch: bool,

    /// Comma-separated names of the jobs to run.
    #[arg(long, value_delimiter = ',')]
    pub job: Vec<String>,

    /// Ignore job registrations entirely.
    #[arg(long)]
    pub disable_job: bool,

    /// Print version information and exit.
    #[arg(long)]
    pub version: bool,

    /// Default bind host for servers that do not configure one.
    #[arg(long)]
    pub host: Option<String>,
}

impl EgoFlags {
    pub fn parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    /// Job names selected with `--job`, trimmed and without blanks.
    pub fn selected_jobs(&self) -> Vec<String> {
        self.job
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}
