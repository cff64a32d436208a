//! CLI argument definitions

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use macspoof_core::filter::SortField;
use macspoof_core::interface::LinkStatus;
use macspoof_core::mac::MacAddress;
use macspoof_core::scheduler::Frequency;
use macspoof_core::transaction::TransactionStatus;
use macspoof_core::SpoofOptions;

#[derive(Parser)]
#[command(name = "macspoof")]
#[command(about = "Change MAC addresses transactionally, with automatic rollback")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search ./macspoof.toml, then the user config dirs)
    #[arg(long, env = "MACSPOOF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Directory for history, profiles and schedules
    #[arg(long, env = "MACSPOOF_STATE_DIR", global = true)]
    pub state_dir: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (-v debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Overrides for the `[transaction]` config defaults
#[derive(Args, Debug, Clone, Default)]
pub struct TxArgs {
    /// Skip reading the address back after each write
    #[arg(long)]
    pub no_verify: bool,
    /// Leave applied steps in place when a later step fails
    #[arg(long)]
    pub no_rollback: bool,
    /// Accept multicast and unknown-vendor addresses
    #[arg(long)]
    pub force: bool,
}

impl TxArgs {
    pub fn apply(&self, defaults: SpoofOptions) -> SpoofOptions {
        SpoofOptions {
            verify: defaults.verify && !self.no_verify,
            auto_rollback: defaults.auto_rollback && !self.no_rollback,
            force: defaults.force || self.force,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List network interfaces
    List {
        /// Name contains (case-insensitive)
        #[arg(long)]
        name: Option<String>,
        /// Name matches regular expression
        #[arg(long)]
        regex: Option<String>,
        /// Link status (up, down, unknown)
        #[arg(long)]
        status: Option<LinkStatus>,
        /// Driver contains (case-insensitive)
        #[arg(long)]
        driver: Option<String>,
        /// Vendor of the current address contains (case-insensitive)
        #[arg(long)]
        vendor: Option<String>,
        /// Only interfaces with an IP address
        #[arg(long)]
        has_ip: bool,
        /// Show the loopback interface too
        #[arg(long)]
        include_loopback: bool,
        /// Free-text search over name, address, driver and description
        #[arg(long, short)]
        search: Option<String>,
        /// Order by name, mac, status, driver, vendor or ip
        #[arg(long, default_value = "name")]
        sort: SortField,
        /// Descending order
        #[arg(long)]
        reverse: bool,
        /// Only show addresses shared by more than one interface
        #[arg(long)]
        duplicates: bool,
    },
    /// Show one interface
    Show {
        interface: String,
    },
    /// Check a MAC address and describe it
    Validate {
        mac: String,
    },
    /// Generate addresses without applying them
    Generate {
        /// Locally administered instead of vendor-prefixed
        #[arg(long, conflicts_with = "vendor")]
        random: bool,
        /// Use a prefix of this vendor (e.g. intel, apple)
        #[arg(long)]
        vendor: Option<String>,
        /// How many to generate
        #[arg(long, short = 'n', default_value = "1")]
        count: usize,
    },
    /// Set an interface's MAC address
    Spoof {
        interface: String,
        mac: MacAddress,
        #[command(flatten)]
        tx: TxArgs,
    },
    /// Generate an address and apply it
    Random {
        interface: String,
        /// Locally administered instead of vendor-prefixed
        #[arg(long, conflicts_with = "vendor")]
        local: bool,
        /// Use a prefix of this vendor
        #[arg(long)]
        vendor: Option<String>,
        #[command(flatten)]
        tx: TxArgs,
    },
    /// Apply several changes as one all-or-nothing transaction
    Batch {
        /// IFACE=MAC pairs, applied in the given order
        #[arg(required = true, value_parser = parse_mapping)]
        mappings: Vec<(String, MacAddress)>,
        #[command(flatten)]
        tx: TxArgs,
    },
    /// Undo the most recent committed change to an interface
    Restore {
        interface: String,
        /// Go back to the address before the first recorded change
        #[arg(long)]
        original: bool,
    },
    /// Undo the applied steps of a failed transaction
    Recover {
        /// Transaction ID (or prefix of at least 8 characters)
        transaction_id: String,
    },
    /// Show the transaction log
    History {
        /// Only transactions touching this interface
        #[arg(long, short)]
        interface: Option<String>,
        /// Filter by status (committed, failed, rolled_back, partial)
        #[arg(long, short)]
        status: Option<TransactionStatus>,
        /// Maximum number of entries
        #[arg(long, short, default_value = "20")]
        limit: usize,
        /// Show one transaction in full
        #[arg(long, conflicts_with_all = ["stats", "clear"])]
        show: Option<String>,
        /// Write the whole log to a JSON file
        #[arg(long, value_name = "FILE", conflicts_with_all = ["show", "stats", "clear", "import"])]
        export: Option<PathBuf>,
        /// Append transactions from an exported file
        #[arg(long, value_name = "FILE", conflicts_with_all = ["show", "stats", "clear"])]
        import: Option<PathBuf>,
        /// Show aggregate counts instead
        #[arg(long)]
        stats: bool,
        /// Delete entries (only those touching --interface when given)
        #[arg(long)]
        clear: bool,
    },
    /// Manage saved interface-to-address mappings
    #[command(subcommand)]
    Profile(ProfileCommands),
    /// Manage timed changes
    #[command(subcommand)]
    Schedule(ScheduleCommands),
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Create or replace a profile
    Save {
        name: String,
        /// IFACE=MAC pairs
        #[arg(required = true, value_parser = parse_mapping)]
        mappings: Vec<(String, MacAddress)>,
        #[arg(long, short)]
        description: Option<String>,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// List profiles
    List {
        /// Match name, description or tags
        #[arg(long, short)]
        search: Option<String>,
    },
    /// Show a profile
    Show {
        name: String,
    },
    /// Delete a profile
    Delete {
        name: String,
    },
    /// Apply every mapping of a profile as one batch
    Apply {
        name: String,
        #[command(flatten)]
        tx: TxArgs,
    },
    /// Copy a profile under a new name
    Clone {
        source: String,
        dest: String,
    },
    /// Write a profile to a JSON file
    Export {
        name: String,
        path: PathBuf,
    },
    /// Add a profile from a JSON file
    Import {
        path: PathBuf,
        /// Store under this name instead of the one in the file
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    /// Generated address (config decides realistic or random)
    SpoofRandom,
    /// The address given with --mac
    Spoof,
    Restore,
    RestoreOriginal,
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Add a task
    Add {
        name: String,
        interface: String,
        #[arg(long, short, value_enum, default_value = "spoof-random")]
        action: ActionArg,
        /// Address for --action spoof
        #[arg(long, required_if_eq("action", "spoof"))]
        mac: Option<MacAddress>,
        /// once, hourly, daily, weekly, monthly, or a period in seconds
        #[arg(long, short, default_value = "once")]
        every: Frequency,
        /// First run as RFC 3339 (default: now)
        #[arg(long)]
        start: Option<String>,
        /// Stop after this many runs
        #[arg(long)]
        max_runs: Option<u32>,
        #[arg(long, short)]
        description: Option<String>,
    },
    /// List tasks
    List {
        /// Match name, interface, description or tags
        #[arg(long, short)]
        search: Option<String>,
    },
    /// Remove a task
    Remove {
        name: String,
    },
    /// Enable a task
    Enable {
        name: String,
    },
    /// Disable a task without removing it
    Disable {
        name: String,
    },
    /// Drop tasks that will not run again
    ClearCompleted,
    /// Run every task that is due now, then exit
    RunDue,
    /// Run due tasks until interrupted
    Daemon {
        /// Seconds between checks
        #[arg(long, default_value = "60")]
        interval: u64,
    },
}

/// Parse `IFACE=MAC`. The last `=` separates, so names may contain one.
pub fn parse_mapping(s: &str) -> Result<(String, MacAddress), String> {
    let (interface, mac) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected IFACE=MAC, got '{}'", s))?;
    let interface = interface.trim();
    if interface.is_empty() {
        return Err(format!("missing interface in '{}'", s));
    }
    let mac = mac.trim().parse::<MacAddress>().map_err(|e| e.to_string())?;
    Ok((interface.to_string(), mac))
}
