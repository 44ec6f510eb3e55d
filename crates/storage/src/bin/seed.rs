use std::fmt;
use std::sync::Arc;

use storage::repository::{CatalogRows, RemoteStore};
use storage::{InMemoryIdentity, SqliteRemote};
use tracker_core::Clock;
use tracker_core::model::UserId;
use tracker_core::sample::sample_catalog;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    admin_id: UserId,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidAdminId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidAdminId { raw } => write!(f, "invalid --admin value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("TRACKER_DB_URL")
            .unwrap_or_else(|_| "sqlite://tracker.sqlite3?mode=rwc".into());
        let mut admin_id = std::env::var("TRACKER_ADMIN_ID")
            .ok()
            .and_then(|value| value.parse::<UserId>().ok())
            .unwrap_or_else(|| UserId::new("admin"));

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--admin" => {
                    let value = require_value(&mut args, "--admin")?;
                    admin_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidAdminId { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self { db_url, admin_id })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>   SQLite URL (default: sqlite://tracker.sqlite3?mode=rwc)");
    eprintln!("  --admin <user-id>   Admin identity that owns the catalog (default: admin)");
    eprintln!("  -h, --help          Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  TRACKER_DB_URL, TRACKER_ADMIN_ID");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let clock = Clock::default();
    let identity = Arc::new(InMemoryIdentity::signed_in(
        clock,
        args.admin_id.clone(),
        format!("{}@localhost", args.admin_id),
    ));
    let remote = SqliteRemote::connect(&args.db_url, identity, clock).await?;
    remote.grant_admin(&args.admin_id).await?;

    let catalog = sample_catalog();
    let rows = CatalogRows::from_tree(&catalog);
    remote
        .upsert_catalog(&rows.categories, &rows.problems, &args.admin_id)
        .await?;

    println!(
        "Seeded {} categories and {} problems owned by {} into {}",
        rows.categories.len(),
        rows.problems.len(),
        args.admin_id,
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
