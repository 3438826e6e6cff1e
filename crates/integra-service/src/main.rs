use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use integra_core::{
    FanoutSink, Host, MemorySink, ObjectKind, ObjectStore, PlatformHive, ReportSink, Severity,
    TracingSink,
};
use integra_service::install;
use integra_service::journal::{Journal, DEFAULT_MAX_BYTES};
use integra_service::monitor::Monitor;
use integra_service::notifier::{ChangeNotifier, NotifyWatcher, NullNotifier};
use integra_service::paths::{journal_path, settings_path};
use integra_service::settings::{ConfigProvider, Settings, DEFAULT_CHECK_INTERVAL_MS};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "integra", author, version, about = "Host integrity monitor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write default settings and register the service
    Install,
    /// Unregister the service
    Uninstall,
    /// Run the monitor until interrupted
    Run {
        /// Rely on periodic checks only
        #[arg(long)]
        no_watch: bool,
    },
    /// Verify every object once
    Verify,
    /// Print or set the check interval in milliseconds
    Interval { ms: Option<u64> },
    /// List objects, or print/set the object list path with `list path`
    List {
        #[command(subcommand)]
        what: Option<ListTarget>,
    },
    /// Snapshot a directory tree and add it to the object list
    #[command(name = "add-file", alias = "addFile")]
    AddFile { name: String, path: String },
    /// Snapshot a registry key and add it to the object list
    #[command(name = "add-reg", alias = "addReg")]
    AddReg { name: String, path: String },
    /// Re-snapshot an object
    Update { name: String },
    /// Remove an object from the object list
    Remove { name: String },
    /// Show recent journal entries
    Events {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ListTarget {
    /// Print or set the object list path
    Path { path: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Install => install_command(),
        Commands::Uninstall => {
            println!("{}", install::unregister()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { no_watch } => run_command(no_watch).await,
        Commands::Verify => verify_command(),
        Commands::Interval { ms } => interval_command(ms),
        Commands::List { what: None } => list_command(),
        Commands::List {
            what: Some(ListTarget::Path { path }),
        } => list_path_command(path),
        Commands::AddFile { name, path } => add_command(&name, ObjectKind::FileTree, &path),
        Commands::AddReg { name, path } => add_command(&name, ObjectKind::RegistryTree, &path),
        Commands::Update { name } => update_command(&name),
        Commands::Remove { name } => remove_command(&name),
        Commands::Events { limit } => events_command(limit),
    }
}

fn load_settings() -> Result<(PathBuf, Settings)> {
    let path = settings_path()?;
    let settings = Settings::load(&path)?;
    Ok((path, settings))
}

fn object_store(settings: &Settings) -> Result<ObjectStore> {
    let path = settings
        .object_list_path()
        .ok_or_else(|| anyhow!("object list path is not configured; set it with `integra list path <path>`"))?;
    Ok(ObjectStore::new(path))
}

fn host(settings: &Settings) -> Host<PlatformHive> {
    Host::new(PlatformHive::default()).with_algorithm(settings.algorithm)
}

/// Tracing plus the findings journal, when it can be opened.
fn report_sink() -> Arc<dyn ReportSink> {
    let fanout = FanoutSink::new().with(Arc::new(TracingSink));
    let journal = journal_path().and_then(|p| Journal::open(p, DEFAULT_MAX_BYTES));
    match journal {
        Ok(journal) => Arc::new(fanout.with(Arc::new(journal))),
        Err(e) => {
            warn!(error = %e, "findings journal unavailable");
            Arc::new(fanout)
        }
    }
}

fn install_command() -> Result<ExitCode> {
    let (path, mut settings) = load_settings()?;
    let cwd = std::env::current_dir()?;
    let defaults = Settings::installed(&cwd);
    settings.check_interval_ms = defaults.check_interval_ms;
    settings.object_list_path = defaults.object_list_path;
    settings.save(&path)?;
    println!("settings written to {}", path.display());

    let exe = std::env::current_exe()?;
    println!("{}", install::register(&exe)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_command(no_watch: bool) -> Result<ExitCode> {
    let (_, settings) = load_settings()?;
    let store = object_store(&settings)?;
    let list_path = store.path().to_path_buf();
    let interval = settings.check_interval().unwrap_or_else(|| {
        info!("check interval not configured; using the default");
        Duration::from_millis(DEFAULT_CHECK_INTERVAL_MS)
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let notifier: Box<dyn ChangeNotifier> = if no_watch {
        Box::new(NullNotifier)
    } else {
        Box::new(NotifyWatcher::new(tx)?)
    };

    // the list is re-read on every periodic pass; only this first read is fatal
    let mut monitor = Monitor::from_store(host(&settings), store, report_sink(), interval)
        .with_context(|| format!("cannot load object list {}", list_path.display()))?;
    monitor.start(notifier, rx)?;

    signal::ctrl_c().await?;
    info!("stop requested");
    if !monitor.shutdown(SHUTDOWN_GRACE).await {
        warn!("monitor did not stop cleanly");
    }
    Ok(ExitCode::SUCCESS)
}

fn verify_command() -> Result<ExitCode> {
    let (_, settings) = load_settings()?;
    let store = object_store(&settings)?;
    let registry = store
        .load()
        .with_context(|| format!("cannot load object list {}", store.path().display()))?;

    let summary = Arc::new(MemorySink::new());
    let sink = FanoutSink::new()
        .with(report_sink())
        .with(summary.clone());
    let monitor = Monitor::new(
        host(&settings),
        registry,
        Arc::new(sink),
        Duration::from_millis(DEFAULT_CHECK_INTERVAL_MS),
    );
    let reports = monitor.check_once();

    let findings: usize = reports.iter().map(|r| r.findings().count()).sum();
    println!(
        "{} objects verified, {} findings",
        reports.len(),
        findings
    );
    if findings > 0 || summary.count(Severity::Error) > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn interval_command(ms: Option<u64>) -> Result<ExitCode> {
    let (path, mut settings) = load_settings()?;
    match ms {
        Some(ms) => {
            settings.check_interval_ms = Some(ms);
            settings.save(&path)?;
            println!("check interval set to {ms} ms");
        }
        None => match settings.check_interval_ms {
            Some(ms) => println!("{ms}"),
            None => println!("check interval is not set"),
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn list_path_command(new_path: Option<PathBuf>) -> Result<ExitCode> {
    let (path, mut settings) = load_settings()?;
    match new_path {
        Some(list) => {
            let list = if list.is_absolute() {
                list
            } else {
                std::env::current_dir()?.join(list)
            };
            println!("object list path set to {}", list.display());
            settings.object_list_path = Some(list);
            settings.save(&path)?;
        }
        None => match settings.object_list_path() {
            Some(list) => println!("{}", list.display()),
            None => println!("object list path is not set"),
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn list_command() -> Result<ExitCode> {
    let (_, settings) = load_settings()?;
    let registry = object_store(&settings)?.load()?;
    let objects = registry.list();
    println!("Total {} objects:", objects.len());
    for object in objects {
        println!("'{}' \t{}     '{}'", object.name, object.kind, object.base_path);
    }
    Ok(ExitCode::SUCCESS)
}

fn add_command(name: &str, kind: ObjectKind, path: &str) -> Result<ExitCode> {
    let (_, settings) = load_settings()?;
    let store = object_store(&settings)?;
    let mut registry = store.load_or_default()?;
    let warnings = registry.add(&host(&settings), name, kind, path)?;
    store.save(&registry)?;
    for warning in &warnings {
        warn!("{warning}");
    }
    println!("object '{name}' added");
    Ok(ExitCode::SUCCESS)
}

fn update_command(name: &str) -> Result<ExitCode> {
    let (_, settings) = load_settings()?;
    let store = object_store(&settings)?;
    let mut registry = store.load()?;
    let warnings = registry.update(&host(&settings), name)?;
    store.save(&registry)?;
    for warning in &warnings {
        warn!("{warning}");
    }
    println!("object '{name}' updated");
    Ok(ExitCode::SUCCESS)
}

fn remove_command(name: &str) -> Result<ExitCode> {
    let (_, settings) = load_settings()?;
    let store = object_store(&settings)?;
    let mut registry = store.load()?;
    registry.remove(name)?;
    store.save(&registry)?;
    println!("object '{name}' removed");
    Ok(ExitCode::SUCCESS)
}

fn events_command(limit: usize) -> Result<ExitCode> {
    let journal = Journal::open(journal_path()?, DEFAULT_MAX_BYTES)?;
    for entry in journal.read_recent(Some(limit))? {
        println!(
            "{:>6} {} {:<7} {}",
            entry.seq,
            entry.timestamp.to_rfc3339(),
            entry.severity,
            entry.message
        );
    }
    Ok(ExitCode::SUCCESS)
}
