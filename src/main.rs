use clap::Parser;
use pill_sync::app::{self, Options};
use pill_sync::logging;
use pill_sync::observer::LogObserver;
use pill_sync::scanner::Scanner;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[cfg(feature = "bluer")]
fn scanner() -> Arc<dyn Scanner> {
    Arc::new(pill_sync::scanner::bluer::BluerScanner)
}

#[cfg(not(feature = "bluer"))]
fn scanner() -> Arc<dyn Scanner> {
    Arc::new(pill_sync::scanner::UnavailableScanner)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    if let Err(why) = logging::init(options.verbose, options.log_dir.clone()) {
        eprintln!("error: failed to set up logging: {why:#}");
        std::process::exit(EXIT_ERROR);
    }

    match app::run(options, scanner(), Arc::new(LogObserver), shutdown_signal()).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
