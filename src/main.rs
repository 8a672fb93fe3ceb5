use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::Path;

use ftlog::info;

use kiri::config::Config;
use kiri::logger::SyncLog;
use kiri::server::{Server, WORKER_THREADS};

fn main() {
    // RFC 1123 の日時整形を UTC で行うため
    std::env::set_var("TZ", "UTC");

    let _guard = ftlog::Builder::new().try_init().unwrap();

    let config = match Config::load(Path::new("config.toml")) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config load error: {}", e);
            return;
        }
    };

    let log = match SyncLog::to_file(Path::new(&config.log.path)) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Cannot open log file {}: {}", config.log.path, e);
            return;
        }
    };

    let server = match Server::new(&config, log) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Server setup error: {}", e);
            return;
        }
    };

    // Graceful Shutdown: SIGINT / SIGTERM でフラグを立てる
    let shared = server.shared();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, initiating graceful shutdown...");
        shared.request_shutdown();
    })
    .expect("Failed to set signal handler");

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    info!("============================================");
    info!("kiri - Caching HTTP/1.x Forward Proxy");
    info!("Hostname: {}", hostname);
    info!("Listen Address: {}", config.server.listen);
    info!("Worker Threads: {}", WORKER_THREADS);
    info!("Cache Entries: {}", config.cache.entries);
    info!("Trace Log: {}", config.log.path);
    info!("============================================");

    server.run();

    info!("Server shutdown complete");
}
