use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};

use minv::config::{load_settings, Settings};
use minv::db::Database;
use minv::tasks::{Daemon, Registry, TaskContext};

const CONFIG_ENV: &str = "MINV_CONFIG";

fn settings_path() -> Option<PathBuf> {
    env::args_os()
        .nth(1)
        .or_else(|| env::var_os(CONFIG_ENV))
        .map(PathBuf::from)
}

fn run() -> minv::Result<()> {
    let settings = match settings_path() {
        Some(path) => load_settings(&path)?,
        None => Settings::default(),
    };
    minv::init_logging(&settings.log)?;
    match &settings.source_path {
        Some(path) => info!("Loaded settings from {}", path.display()),
        None => info!("No settings file given, using defaults"),
    }

    let db = Database::open(&settings.database_path)?;
    let modules = settings.task_modules.clone();
    let ctx = TaskContext::new(db, Arc::new(settings));

    let mut registry = Registry::new(ctx);
    registry.initialize(&modules)?;

    let daemon = Daemon::new(Arc::new(registry))?;
    daemon.run()?;
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("minv-daemon: {}", e);
            ExitCode::FAILURE
        }
    }
}
