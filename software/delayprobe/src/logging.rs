//! Process-wide logging for probing runs.
//!
//! Terminal output is always on once any run starts. A log file under
//! `{op_dir}/logs/` can be attached later and is swapped per run; every run in
//! the process shares one subscriber.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

type FileLayer = fmt::Layer<
    Registry,
    fmt::format::DefaultFields,
    fmt::format::Format<fmt::format::Full, fmt::time::ChronoUtc>,
    NonBlocking,
>;

/// Absent until a run asks for a log file
type OptionalFileLayer = Option<FileLayer>;

static SUBSCRIBER: OnceLock<InstalledSubscriber> = OnceLock::new();

/// Serializes installation so concurrent runs do not race to set the global default
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Handles kept for the life of the process.
/// Dropping a writer guard flushes and stops its background writer.
struct InstalledSubscriber {
    _stdout: WorkerGuard,
    file: Mutex<Option<WorkerGuard>>,
    file_reload: reload::Handle<OptionalFileLayer, Registry>,
}

impl InstalledSubscriber {
    fn attach_file(&self, logfile: File) -> Result<(), String> {
        let (writer, guard) = tracing_appender::non_blocking(logfile);
        let mut current = self
            .file
            .lock()
            .map_err(|_| "Log file guard lock poisoned".to_string())?;
        self.file_reload
            .modify(|layer| *layer = Some(file_layer(writer)))
            .map_err(|e| format!("Failed to attach log file: {e}"))?;
        // Replacing the guard flushes the previous run's file
        *current = Some(guard);
        Ok(())
    }
}

fn file_layer(writer: NonBlocking) -> FileLayer {
    fmt::layer::<Registry>()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(writer)
        .with_ansi(false)
}

/// Open (or append to) `{op_dir}/logs/{op_name}.log`.
fn open_log_file(op_dir: &Path, op_name: &str) -> Result<(PathBuf, File), String> {
    let log_dir = op_dir.join("logs");
    fs::create_dir_all(&log_dir).map_err(|e| format!("Failed to create log directory: {e}"))?;
    let log_path = log_dir.join(format!("{op_name}.log"));
    let logfile = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to open log file {log_path:?}: {e}"))?;
    Ok((log_path, logfile))
}

/// Install the global subscriber if this process has not yet done so.
///
/// Verbosity follows `RUST_LOG`, defaulting to `info`.
fn installed() -> Result<&'static InstalledSubscriber, String> {
    let _lock = INSTALL_LOCK
        .lock()
        .map_err(|_| "Logging install lock poisoned".to_string())?;
    if let Some(subscriber) = SUBSCRIBER.get() {
        return Ok(subscriber);
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| format!("Failed to set up logging env filter: {e}"))?;

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(stdout_writer)
        .with_thread_names(true);

    let (file_layer, file_reload) = reload::Layer::<OptionalFileLayer, Registry>::new(None);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {e}"))?;

    Ok(SUBSCRIBER.get_or_init(|| InstalledSubscriber {
        _stdout: stdout_guard,
        file: Mutex::new(None),
        file_reload,
    }))
}

/// Log to the terminal only.
///
/// Fails if another global subscriber was installed outside this module,
/// in which case events still go to that one.
pub fn init_stdout_logging() -> Result<(), String> {
    installed().map(|_| ())
}

/// Log to the terminal and to `{op_dir}/logs/{op_name}.log`, returning the file path.
///
/// A later call moves file output to the new run's file.
pub fn init_logging(op_dir: &Path, op_name: &str) -> Result<PathBuf, String> {
    let (log_path, logfile) = open_log_file(op_dir, op_name)?;
    installed()?.attach_file(logfile)?;
    Ok(log_path)
}
