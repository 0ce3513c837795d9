use std::path::PathBuf;

use brokerauth::AccessLevel;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "brokerauth")]
#[command(about = "brokerauth: check broker credentials and ACLs against the configured backends")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Options file: a broker config with auth_opt_ lines, or TOML with [auth_opts]
    #[arg(short, long, global = true, env = "BROKERAUTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Honor the start-up grace window (off for one-shot checks)
    #[arg(long, global = true)]
    pub grace: bool,

    /// Log at debug level regardless of log_level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a username/password pair
    CheckUser(CheckUserArgs),
    /// Check topic access for a client
    CheckAcl(CheckAclArgs),
    /// Hash a password for the files backend
    HashPassword(HashPasswordArgs),
    /// Show the effective settings
    ShowConfig,
}

#[derive(Args)]
pub struct CheckUserArgs {
    #[arg(short, long)]
    pub username: String,

    #[arg(short, long)]
    pub password: String,
}

#[derive(Args)]
pub struct CheckAclArgs {
    #[arg(short = 'i', long)]
    pub client_id: String,

    #[arg(short, long)]
    pub username: String,

    #[arg(short, long)]
    pub topic: String,

    #[arg(short, long, default_value = "read")]
    pub access: AccessArg,
}

#[derive(Args)]
pub struct HashPasswordArgs {
    pub password: String,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AccessArg {
    Read,
    Write,
    Subscribe,
}

impl From<AccessArg> for AccessLevel {
    fn from(arg: AccessArg) -> Self {
        match arg {
            AccessArg::Read => Self::Read,
            AccessArg::Write => Self::Write,
            AccessArg::Subscribe => Self::Subscribe,
        }
    }
}
