//These implementations must be defined under lib.rs as they are required for intergration tests
use std::error::Error;

pub mod cli;
pub mod config;
pub mod error;
pub mod sharechain;
pub mod stratum;
pub mod target;

/// **Length of the extranonce prefix (in bytes).**
///
/// In Stratum mining, the extranonce is split into two parts:
/// `EXTRANONCE1` (prefix) and `EXTRANONCE2` (suffix).
///
/// This constant defines the size of `EXTRANONCE1` as **4 bytes**. It is
/// assigned by the pool, randomly and unique among live connections, so no
/// two miners search the same nonce space.
pub const EXTRANONCE1_SIZE: usize = 4;

/// **Length of the extranonce suffix (in bytes).**
///
/// The part of the extranonce the miner rolls itself, announced in the
/// `mining.subscribe` reply.
pub const EXTRANONCE2_SIZE: usize = 4;

///Initializing the logger, `RUST_LOG` takes precedence over `default_filter`
pub fn setup_logging(default_filter: &str) {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, default_filter),
    );
}

pub fn setup_tracing(default_filter: &str) -> Result<(), Box<dyn Error>> {
    // Create a filter for controlling the verbosity of tracing output
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))?;

    // Build a `tracing` subscriber with the specified filter
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();

    // Set the subscriber as the global default for tracing
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
