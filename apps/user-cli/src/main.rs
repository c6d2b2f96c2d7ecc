use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use domain::adapters::cached_repo::CachedRepository;
use domain::adapters::instrumented::InstrumentedRepository;
use domain::adapters::memory_repo::InMemoryUserRepo;
use domain::adapters::retry::{RetryPolicy, RetryingRepository};
use domain::async_service::{run_user_migration, AsyncUserService};
use domain::config::{Config, LogFormat};
use domain::service::UserService;
use domain::{Admin, CoreError, NewUser, Permission, SequentialIds, Status, SystemClock, User};

type UserRepo = RetryingRepository<
    User,
    InstrumentedRepository<User, CachedRepository<User, InMemoryUserRepo>>,
>;
type Service = UserService<UserRepo, SequentialIds, SystemClock>;

/// Demo front end for the user registry. Data lives in memory and is gone
/// when the process exits.
#[derive(Parser, Debug)]
#[command(name = "user-cli", version, about = "User registry demo")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and print it as JSON
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// List the sample users
    List {
        /// Only users with this status (e.g. active, pending)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Search the sample users by username or email
    Search { query: String },
    /// Walk through the full user lifecycle
    Demo,
}

fn init_tracing(format: LogFormat, verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout stays parseable JSON.
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

fn build_service(config: Config) -> Service {
    let cached = CachedRepository::new(InMemoryUserRepo::new(), config.cache_size);
    let repo = RetryingRepository::new(
        InstrumentedRepository::new(cached, "users"),
        RetryPolicy::default(),
    );
    UserService::new(repo, SequentialIds::default(), SystemClock, config)
}

fn admin() -> Admin {
    Admin::new(0, "admin", "admin@example.com", std::time::SystemTime::now())
        .with_permissions([Permission::Read, Permission::Delete, Permission::ManageUsers])
}

/// alice and bob are active, carol stays pending.
fn seed(svc: &Service) -> Result<(), CoreError> {
    for (name, active) in [("alice", true), ("bob", true), ("carol", false)] {
        let user = svc.create_user(name, &format!("{}@example.com", name), "Password123")?;
        if active {
            svc.activate_user(user.id)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CoreError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| CoreError::Processing(format!("failed to encode output: {}", e)))?;
    println!("{}", out);
    Ok(())
}

fn parse_status(raw: &str) -> Result<Status, CoreError> {
    Status::parse(raw).ok_or_else(|| CoreError::Validation {
        field: "status",
        errors: vec![format!("Unknown status '{}'", raw)],
    })
}

fn run_demo(svc: &Service) -> Result<(), CoreError> {
    let admin = admin();
    let user = svc.create_user("johndoe", "john@example.com", "Password123")?;
    info!(user_id = user.id, display_name = %user.display_name(), "created");

    if let Err(e) = svc.authenticate("johndoe", "Password123") {
        info!(error = %e, "login refused before activation");
    }
    svc.activate_user(user.id)?;
    let authed = svc.authenticate("johndoe", "Password123")?;
    info!(user_id = authed.id, "login accepted");

    svc.suspend_user(user.id, "demo suspension", &admin)?;
    svc.delete_user(user.id, &admin)?;
    let deleted = svc.get_user(user.id)?;
    print_json(&deleted)
}

async fn run_async_demo(config: &Config) -> Result<(), CoreError> {
    let source = AsyncUserService::new(config.clone());
    let target = AsyncUserService::new(config.clone());
    source
        .batch_create_users(vec![
            NewUser::new("dave", "dave@example.com"),
            NewUser::new("erin", "erin@example.com"),
        ])
        .await?;
    let copied = run_user_migration(&source, &target).await?;
    info!(copied, "migrated users to a second service");
    Ok(())
}

fn run_command(command: Command, config: Config) -> Result<(), CoreError> {
    let svc = build_service(config);
    match command {
        Command::Create {
            username,
            email,
            password,
        } => {
            let problems = svc.registration_problems(&username, &email, &password);
            if !problems.is_empty() {
                warn!(?problems, "registration input rejected");
            }
            let user = svc.create_user(&username, &email, &password)?;
            print_json(&user)
        }
        Command::List {
            status,
            limit,
            offset,
        } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            seed(&svc)?;
            print_json(&svc.list_users(status, limit, offset)?)
        }
        Command::Search { query } => {
            seed(&svc)?;
            print_json(&svc.search_users(&query)?)
        }
        Command::Demo => run_demo(&svc),
    }
}

/// The user service blocks (retry backoff sleeps the thread), so synchronous
/// commands run on the blocking pool.
async fn run(cli: Cli, config: Config) -> Result<(), CoreError> {
    let async_config = config.clone();
    let is_demo = matches!(cli.command, Command::Demo);
    tokio::task::spawn_blocking(move || run_command(cli.command, config))
        .await
        .map_err(|e| CoreError::Processing(format!("command task failed: {}", e)))??;
    if is_demo {
        run_async_demo(&async_config).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };
    init_tracing(config.log_format, cli.verbose);
    config.warn_if_insecure();
    info!("{}", domain::about());

    if let Err(e) = run(cli, config).await {
        error!(code = e.code(), error = %e, "command failed");
        let payload = serde_json::to_string(&e.payload()).unwrap_or_else(|_| e.to_string());
        eprintln!("{}", payload);
        process::exit(1);
    }
}
