use clap::{Parser, Subcommand};

/// BankLink — unified OAuth token gateway for banking providers
#[derive(Parser)]
#[command(name = "banklink", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Run one maintenance sweep and print the per-category counts
    Cleanup,
}
