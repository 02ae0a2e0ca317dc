//! Command-line tool for GlobalPlatform card key derivation
//!
//! Keys live in a software token named `internal`. Developer keys come from the key set
//! configuration, master keys from `--master-key` arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

mod commands;

use commands::{KeyArgs, TokenArgs};

#[derive(Parser)]
#[command(version, about = "GlobalPlatform SCP01/SCP03 key derivation tool")]
struct Cli {
    /// Configuration file in `key=value` form
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key set to use
    #[arg(short, long, default_value = "defKeySet")]
    key_set: String,

    #[command(flatten)]
    token: TokenArgs,

    /// Debug level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a session key, or the card key without challenges, and print its check value
    SessionKey {
        #[command(flatten)]
        key: KeyArgs,

        /// Key to derive (enc, mac, kek, rmac)
        #[arg(long, default_value = "enc")]
        key_type: String,

        /// Print the key wrapped under the transport key
        #[arg(long)]
        wrap: bool,
    },

    /// Compute a host or card cryptogram
    Cryptogram {
        #[command(flatten)]
        key: KeyArgs,

        /// Cryptogram to compute
        #[arg(long = "type", value_enum, default_value = "host")]
        cryptogram: Cryptogram,

        /// Card cryptogram to verify instead of printing one (hex)
        #[arg(long)]
        verify: Option<String>,
    },

    /// Build the key set blob that moves a card to a new key version
    DiversifyKey {
        /// SCP protocol version
        #[arg(short, long, default_value_t = 1)]
        protocol: u8,

        /// Card unique identifier (hex)
        #[arg(long)]
        cuid: String,

        /// Key diversification data (hex, defaults to the CUID)
        #[arg(long)]
        kdd: Option<String>,

        /// Key info of the card's current key set (hex)
        #[arg(long)]
        old_key_info: String,

        /// Key info of the new key set (hex)
        #[arg(long)]
        new_key_info: String,
    },

    /// Run the NIST SP 800-108 KDF and print the check values of the card keys
    Kdf {
        /// Master key (hex)
        #[arg(long)]
        master: String,

        /// KDF context (hex)
        #[arg(long)]
        context: String,

        /// Produce AES-128 rather than DES3 card keys
        #[arg(long)]
        aes: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Cryptogram {
    /// Host cryptogram
    Host,
    /// Card cryptogram
    Card,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let (engine, key_set) = commands::load_config(cli.config.as_deref(), &cli.key_set)?;
    let key_set = commands::apply_mappings(key_set, &cli.token)?;
    let mut token = commands::open_token(&cli.token, engine.config())?;
    info!(key_set = key_set.name(), "Using key set");

    match cli.command {
        Commands::SessionKey {
            key,
            key_type,
            wrap,
        } => commands::session_key(&engine, &mut token, &key_set, &key, &key_type, wrap),
        Commands::Cryptogram {
            key,
            cryptogram,
            verify,
        } => commands::cryptogram(
            &engine,
            &mut token,
            &key_set,
            &key,
            cryptogram == Cryptogram::Host,
            verify.as_deref(),
        ),
        Commands::DiversifyKey {
            protocol,
            cuid,
            kdd,
            old_key_info,
            new_key_info,
        } => commands::diversify_key(
            &engine,
            &mut token,
            &key_set,
            protocol,
            &cuid,
            kdd.as_deref(),
            &old_key_info,
            &new_key_info,
        ),
        Commands::Kdf {
            master,
            context,
            aes,
        } => commands::kdf(&engine, &mut token, &master, &context, aes),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();
}
