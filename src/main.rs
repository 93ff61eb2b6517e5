use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Result, eyre};
use std::path::PathBuf;
use std::sync::Arc;
use tasksync::prefs::{FixedLocation, UsageTimer};
use tasksync::{
    ClientConfig, HttpTaskApi, Location, LoginStore, PreferencesFile, StudentRoster, Task, TaskApi, TaskSyncStore,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tasksync")]
#[command(about = "TaskSync CLI - task list client with local student roster and preferences")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the tasks API (overrides config and environment)
    #[arg(long)]
    api_url: Option<String>,

    /// Directory for the roster database and preferences
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in against the tasks API
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "TASKSYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Manage remote tasks
    #[command(subcommand)]
    Tasks(TaskCommand),

    /// Manage the local student roster
    #[command(subcommand)]
    Students(StudentCommand),

    /// Show or change user preferences
    #[command(subcommand)]
    Prefs(PrefsCommand),
}

#[derive(Subcommand)]
enum TaskCommand {
    /// List all tasks
    List,
    /// Create a task
    Add { title: String, description: String },
    /// Replace a task's title and description
    Edit { id: i64, title: String, description: String },
    /// Delete a task
    Rm { id: i64 },
}

#[derive(Subcommand)]
enum StudentCommand {
    /// List students alphabetically
    List,
    /// Add a student
    Add { name: String },
}

#[derive(Subcommand)]
enum PrefsCommand {
    /// Print all preferences
    Show,
    SetUsername { username: String },
    ToggleTheme,
    SetLanguage { language: String },
    /// Notification volume between 0.0 and 1.0
    SetVolume { volume: f32 },
    /// Record the current location
    Locate {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        locality: Option<String>,
        #[arg(long)]
        area: Option<String>,
    },
    /// Reset every preference to its default
    Clear,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn connect(config: &ClientConfig) -> Result<Arc<dyn TaskApi>> {
    Ok(Arc::new(HttpTaskApi::new(&config.api_base_url, config.timeout)?))
}

fn print_task(task: &Task) {
    println!("{:>5}  {}", task.id.to_string().cyan(), task.title.bold());
    println!("       {}", task.description.dimmed());
}

/// Fail the command with the store's error message, if any
fn check(error_message: Option<String>) -> Result<()> {
    match error_message {
        Some(msg) => Err(eyre!(msg)),
        None => Ok(()),
    }
}

async fn run_login(config: &ClientConfig, username: &str, password: &str) -> Result<()> {
    let store = LoginStore::new(connect(config)?);
    store.set_credentials(Some(username), Some(password));
    store
        .login(|resp| {
            let message = if resp.message.is_empty() { "logged in" } else { resp.message.as_str() };
            println!("{} {}", "✓".green(), message);
        })
        .await;
    check(store.snapshot().error_message)
}

async fn run_tasks(config: &ClientConfig, command: TaskCommand) -> Result<()> {
    let mut store = TaskSyncStore::new(connect(config)?);

    match command {
        TaskCommand::List => {
            store.load().await;
            let state = store.snapshot();
            check(state.error_message)?;
            if state.tasks.is_empty() {
                println!("{}", "No tasks".dimmed());
            }
            for task in &state.tasks {
                print_task(task);
            }
        }
        TaskCommand::Add { title, description } => {
            store.set_draft(Some(title.as_str()), Some(description.as_str()));
            store
                .create(|task| {
                    println!("{} Created task {}", "✓".green(), task.id);
                    print_task(task);
                })
                .await;
            check(store.snapshot().error_message)?;
        }
        TaskCommand::Edit { id, title, description } => {
            store
                .update(id, &title, &description, |task| {
                    println!("{} Updated task {}", "✓".green(), task.id);
                    print_task(task);
                })
                .await;
            check(store.snapshot().error_message)?;
        }
        TaskCommand::Rm { id } => {
            store.delete(id).await;
            check(store.snapshot().error_message)?;
            println!("{} Deleted task {}", "✓".green(), id);
        }
    }

    store.dispose();
    Ok(())
}

fn run_students(config: &ClientConfig, command: StudentCommand) -> Result<()> {
    let roster = StudentRoster::open(config.roster_path())?;

    match command {
        StudentCommand::List => {
            for student in roster.students()? {
                println!("{:>5}  {}", student.id.to_string().cyan(), student.name);
            }
        }
        StudentCommand::Add { name } => {
            let id = roster.add(&name)?;
            println!("{} Added {} (id {})", "✓".green(), name.trim().bold(), id);
        }
    }

    Ok(())
}

async fn run_prefs(prefs: &mut PreferencesFile, command: PrefsCommand) -> Result<()> {
    match command {
        PrefsCommand::Show => {
            let p = prefs.get();
            let theme = if p.dark_theme { "dark" } else { "light" };
            println!("{:<22}{}", "username".bold(), p.username);
            println!("{:<22}{}", "theme".bold(), theme);
            println!("{:<22}{}", "language".bold(), p.preferred_language);
            println!("{:<22}{:.2}", "notification volume".bold(), p.notification_volume);
            println!("{:<22}{}", "last access".bold(), p.format_last_access());
            println!("{:<22}{}", "last location".bold(), p.last_location);
            println!("{:<22}{}", "total usage".bold(), p.format_usage_time());
        }
        PrefsCommand::SetUsername { username } => prefs.set_username(&username)?,
        PrefsCommand::ToggleTheme => {
            let dark = prefs.toggle_dark_theme()?;
            println!("Theme: {}", if dark { "dark" } else { "light" });
        }
        PrefsCommand::SetLanguage { language } => prefs.set_preferred_language(&language)?,
        PrefsCommand::SetVolume { volume } => prefs.set_notification_volume(volume)?,
        PrefsCommand::Locate {
            lat,
            lon,
            locality,
            area,
        } => {
            let provider = FixedLocation(Location {
                latitude: lat,
                longitude: lon,
                locality,
                admin_area: area,
            });
            let label = prefs.refresh_location(&provider).await?;
            println!("Location: {}", label);
        }
        PrefsCommand::Clear => prefs.clear_all()?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    let timer = UsageTimer::start();
    let mut prefs = PreferencesFile::open(config.prefs_path())?;
    let record_usage = !matches!(cli.command, Commands::Prefs(PrefsCommand::Clear));

    let result = match cli.command {
        Commands::Login { username, password } => run_login(&config, &username, &password).await,
        Commands::Tasks(command) => run_tasks(&config, command).await,
        Commands::Students(command) => run_students(&config, command),
        Commands::Prefs(command) => run_prefs(&mut prefs, command).await,
    };

    if record_usage {
        if let Err(e) = prefs.touch_last_access().and_then(|_| timer.stop(&mut prefs)) {
            warn!(error = %e, "Failed to record usage");
        }
    }

    result
}
