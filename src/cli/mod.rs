use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "apurador")]
#[command(
    version,
    about = "Monthly capital-gains tax engine (DARF) for B3 closed positions"
)]
#[command(
    long_about = "Compute monthly swing-trade and day-trade tax obligations from a \
                  snapshot of closed positions: loss carryforward compensation, the \
                  R$ 20.000,00 swing exemption, IRRF credits, and DARF due dates."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute monthly results from a closed-positions CSV
    Compute {
        /// Path to the closed-positions CSV file
        positions: String,

        /// Allow a history that omits previously seen positions
        /// (explicit full recompute)
        #[arg(short, long)]
        force: bool,
    },

    /// List DARF obligations with due dates and payment status
    Darf {
        /// Path to the closed-positions CSV file
        positions: String,

        /// Only the given competency month (YYYY-MM)
        #[arg(long)]
        month: Option<String>,

        /// Allow a history that omits previously seen positions
        #[arg(short, long)]
        force: bool,
    },

    /// Show the loss-compensation breakdown for one closed position
    Explain {
        /// Path to the closed-positions CSV file
        positions: String,

        /// Ticker of the position to explain
        #[arg(long)]
        ticker: String,

        /// Closing date of the position (YYYY-MM-DD)
        #[arg(long)]
        closed_at: String,
    },

    /// Payment status management
    Status {
        #[command(subcommand)]
        action: StatusCommands,
    },

    /// Initialize the local database
    Init,
}

#[derive(Subcommand)]
pub enum StatusCommands {
    /// Mark a month/bucket obligation as paid or pending
    Set {
        /// Competency month (YYYY-MM)
        month: String,

        /// Trade bucket: swing or day-trade
        bucket: String,

        /// New status: pending or paid
        status: String,
    },

    /// List all persisted payment statuses
    List,
}
