use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use services::{AppServices, Clock, Connectivity, LoadSource, SyncConfig, shared_remote};
use storage::{IdentityProvider, InMemoryIdentity};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tracker_core::catalog::{
    ProblemDraft, add_category, add_problem, remove_problem, set_note, toggle_completed,
};
use tracker_core::model::{Category, CategoryId, Difficulty, Platform, ProblemId, UserId};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingOperand { command: &'static str, operand: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidUserId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidPlatform { raw: String },
    InvalidDifficulty { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingOperand { command, operand } => {
                write!(f, "{command} requires <{operand}>")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidPlatform { raw } => write!(f, "invalid platform: {raw}"),
            ArgsError::InvalidDifficulty { raw } => write!(f, "invalid difficulty: {raw}"),
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

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- [options] [command]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  show                                  Print the catalog (default)");
    eprintln!("  toggle <problem-id>                   Flip a problem's completed flag");
    eprintln!("  note <problem-id> <text>              Replace a problem's note");
    eprintln!("  add-category <category-id> <title>    Append a category (admin)");
    eprintln!("  add-problem <category-id> <problem-id> <title> <url> [platform] [difficulty]");
    eprintln!("                                        Append a problem (admin)");
    eprintln!("  remove-problem <problem-id>           Delete a problem (admin)");
    eprintln!("  grant-admin <user-id>                 Add a user to the admin allow-list");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>      default: sqlite://tracker.sqlite3");
    eprintln!("  --cache-dir <path>     default: .tracker-cache");
    eprintln!("  --user <user-id>       signed-in identity; omit to work signed out");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TRACKER_DB_URL, TRACKER_CACHE_DIR, TRACKER_USER_ID, RUST_LOG,");
    eprintln!("  TRACKER_MIN_SAVE_INTERVAL_MS, TRACKER_DEBOUNCE_MS, TRACKER_RETRY_BASE_MS,");
    eprintln!("  TRACKER_MAX_RETRIES, TRACKER_RETRY_WINDOW_MS, TRACKER_CACHE_KEY");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Show,
    Toggle(ProblemId),
    Note(ProblemId, String),
    AddCategory(CategoryId, String),
    AddProblem {
        category_id: CategoryId,
        problem_id: ProblemId,
        draft: ProblemDraft,
    },
    RemoveProblem(ProblemId),
    GrantAdmin(UserId),
}

impl Command {
    fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::AddCategory(..) | Command::AddProblem { .. } | Command::RemoveProblem(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    db_url: String,
    cache_dir: PathBuf,
    user_id: Option<UserId>,
    command: Command,
}

impl Args {
    fn parse(
        args: impl IntoIterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ArgsError> {
        let mut db_url = env("TRACKER_DB_URL")
            .map_or_else(|| "sqlite://tracker.sqlite3".into(), normalize_sqlite_url);
        let mut cache_dir = env("TRACKER_CACHE_DIR")
            .map_or_else(|| PathBuf::from(".tracker-cache"), PathBuf::from);
        let mut user_id = env("TRACKER_USER_ID").and_then(|value| value.parse::<UserId>().ok());

        let mut positional = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--cache-dir" => {
                    cache_dir = PathBuf::from(require_value(&mut args, "--cache-dir")?);
                }
                "--user" => {
                    let value = require_value(&mut args, "--user")?;
                    user_id = Some(
                        value
                            .parse()
                            .map_err(|_| ArgsError::InvalidUserId { raw: value.clone() })?,
                    );
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        Ok(Self {
            db_url,
            cache_dir,
            user_id,
            command: parse_command(positional)?,
        })
    }
}

fn parse_command(positional: Vec<String>) -> Result<Command, ArgsError> {
    let mut words = positional.into_iter();
    let Some(name) = words.next() else {
        return Ok(Command::Show);
    };

    let mut operand = |command: &'static str, operand: &'static str| {
        words
            .next()
            .ok_or(ArgsError::MissingOperand { command, operand })
    };

    let command = match name.as_str() {
        "show" => Command::Show,
        "toggle" => Command::Toggle(ProblemId::new(operand("toggle", "problem-id")?)),
        "note" => {
            let id = ProblemId::new(operand("note", "problem-id")?);
            Command::Note(id, operand("note", "text")?)
        }
        "add-category" => {
            let id = CategoryId::new(operand("add-category", "category-id")?);
            Command::AddCategory(id, operand("add-category", "title")?)
        }
        "add-problem" => {
            let category_id = CategoryId::new(operand("add-problem", "category-id")?);
            let problem_id = ProblemId::new(operand("add-problem", "problem-id")?);
            let title = operand("add-problem", "title")?;
            let url = operand("add-problem", "url")?;
            let platform = match words.next() {
                Some(raw) => raw
                    .parse::<Platform>()
                    .map_err(|_| ArgsError::InvalidPlatform { raw })?,
                None => Platform::LeetCode,
            };
            let difficulty = match words.next() {
                Some(raw) => raw
                    .parse::<Difficulty>()
                    .map_err(|_| ArgsError::InvalidDifficulty { raw })?,
                None => Difficulty::Medium,
            };
            Command::AddProblem {
                category_id,
                problem_id,
                draft: ProblemDraft {
                    title,
                    url,
                    platform,
                    difficulty,
                },
            }
        }
        "remove-problem" => {
            Command::RemoveProblem(ProblemId::new(operand("remove-problem", "problem-id")?))
        }
        "grant-admin" => {
            let raw = operand("grant-admin", "user-id")?;
            Command::GrantAdmin(
                raw.parse()
                    .map_err(|_| ArgsError::InvalidUserId { raw: raw.clone() })?,
            )
        }
        _ => return Err(ArgsError::UnknownCommand(name)),
    };

    if let Some(extra) = words.next() {
        return Err(ArgsError::UnknownArg(extra));
    }
    Ok(command)
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_catalog(categories: &[Category]) {
    for category in categories {
        let progress = category.progress();
        println!(
            "{} [{}] {}/{} ({}%)",
            category.title,
            category.id,
            progress.completed,
            progress.total,
            progress.percent()
        );
        for problem in &category.problems {
            let mark = if problem.completed { "x" } else { " " };
            println!(
                "  [{mark}] {} ({}, {:?}) {}",
                problem.title,
                problem.platform.as_str(),
                problem.difficulty,
                problem.id
            );
            if !problem.note.is_empty() {
                println!("        note: {}", problem.note);
            }
        }
    }
}

/// Apply an editing command to the tree. Returns `false` for read-only commands.
fn apply(command: &Command, tree: &mut Vec<Category>) -> Result<bool, Box<dyn std::error::Error>> {
    match command {
        Command::Show | Command::GrantAdmin(_) => return Ok(false),
        Command::Toggle(id) => {
            let completed = toggle_completed(tree, id)?;
            tracing::info!(problem = %id, completed, "toggled");
        }
        Command::Note(id, text) => set_note(tree, id, text.as_str())?,
        Command::AddCategory(id, title) => add_category(tree, id.clone(), title)?,
        Command::AddProblem {
            category_id,
            problem_id,
            draft,
        } => add_problem(tree, category_id, problem_id.clone(), draft.clone())?,
        Command::RemoveProblem(id) => {
            remove_problem(tree, id)?;
        }
    }
    Ok(true)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse(std::env::args().skip(1), |key| std::env::var(key).ok()).map_err(
        |e| {
            eprintln!("{e}");
            print_usage();
            e
        },
    )?;
    let config = SyncConfig::from_env()?;

    prepare_sqlite_file(&args.db_url)?;
    let clock = Clock::default();
    let identity: Arc<dyn IdentityProvider> = match &args.user_id {
        Some(user_id) => Arc::new(InMemoryIdentity::signed_in(
            clock,
            user_id.clone(),
            format!("{user_id}@localhost"),
        )),
        None => Arc::new(InMemoryIdentity::new(clock)),
    };

    if let Command::GrantAdmin(user_id) = &args.command {
        let remote = shared_remote(&args.db_url, identity, clock).await?;
        remote.grant_admin(user_id).await?;
        println!("{user_id} is now an admin");
        return Ok(());
    }

    let app = AppServices::new_sqlite(&args.db_url, &args.cache_dir, identity, clock, config)
        .await?;
    let loaded = app.load().await;
    let source = match loaded.source {
        LoadSource::Remote => "remote",
        LoadSource::Cache => "local cache",
        LoadSource::Sample => "sample catalog",
    };
    println!("signed in as {}, loaded from {source}", loaded.role.label());

    if args.command.requires_admin() && !loaded.role.is_admin() {
        return Err(format!("this command needs an admin session, not {}", loaded.role.label()).into());
    }

    let mut tree = loaded.categories;
    if apply(&args.command, &mut tree)? {
        app.scheduler().schedule_immediate(tree.clone(), &loaded.role);
    }
    print_catalog(&tree);
    app.shutdown(tree, &loaded.role).await;

    if *app.sync().connectivity().borrow() == Connectivity::Offline {
        println!("offline: changes are saved locally and will sync on the next save");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
