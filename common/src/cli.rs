use clap::{ArgAction, Args};

#[derive(Debug, Args)]
#[clap(next_help_heading = "Global Options")]
pub struct GlobalOpts {
    /// More log output (-v debug, -vv trace)
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Stop after this many engine ticks
    #[arg(long, global = true)]
    pub ticks: Option<u64>,
}

impl GlobalOpts {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
