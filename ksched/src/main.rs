//! ksched — the kernel-admission scheduler daemon.
//!
//! Takes no arguments. Creates the per-user registry segment, serves every
//! worker that registers, and tears everything down on SIGINT/SIGTERM.
//! Exit code 0 on clean shutdown, 1 if the registry cannot be created.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use ksched_core::{config, AllowAll, Reactor, SessionLogger};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let logger = Arc::new(SessionLogger::new("logs"));
    let reactor = match Reactor::new(Arc::new(AllowAll), logger) {
        Ok(reactor) => reactor,
        Err(e) => {
            eprintln!("{} {e}", "Error:".red().bold());
            std::process::exit(1);
        }
    };

    let running = reactor.running_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::Release);
    }) {
        eprintln!("{} failed to install signal handler: {e}", "Error:".red().bold());
        std::process::exit(1);
    }

    if let Err(e) = reactor.start() {
        eprintln!("{} {e}", "Error:".red().bold());
        std::process::exit(1);
    }
    log::info!(
        "ksched v{} serving on registry {}",
        env!("CARGO_PKG_VERSION"),
        config::registry_name()
    );

    while reactor.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    log::info!("shutdown signal received");
    reactor.stop();
}
