// dispatcher: Fans user-submitted transcode jobs out to remote broadcaster
// endpoints, one segment at a time, and tracks per-segment progress in the
// job store.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use dispatcher::config;
use dispatcher::external::{
    CommandDownloader, CommandSegmenter, DownloadsDisabled, SourceDownloader,
};
use dispatcher::orchestrate::Orchestrator;
use dispatcher::scanner::Scanner;
use dispatcher::storage::store::Store;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "dispatcher starting"
    );

    // Load config from the path given as the first argument, or the default.
    let cfg = match std::env::args().nth(1) {
        Some(path) => config::load_config_from_path(Path::new(&path)),
        None => config::load_config(),
    };
    let cfg = match cfg {
        Ok(cfg) => {
            info!(
                data_dir = %cfg.paths.data_dir.display(),
                target_seg_dur = cfg.transcode.target_seg_dur,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&cfg.paths.work_dir) {
        eprintln!(
            "FATAL: could not create work dir '{}': {e}",
            cfg.paths.work_dir.display()
        );
        std::process::exit(1);
    }

    let store = match Store::open(&cfg.paths.sqlite_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("FATAL: failed to open job store: {e}");
            std::process::exit(1);
        }
    };

    let downloader: Arc<dyn SourceDownloader> = match &cfg.tools.downloader {
        Some(command) => Arc::new(CommandDownloader::new(command)),
        None => Arc::new(DownloadsDisabled),
    };
    let segmenter = Arc::new(CommandSegmenter::new(&cfg.tools.segmenter));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        downloader,
        segmenter,
        cfg.paths.work_dir.clone(),
        cfg.transcode.target_seg_dur,
        cfg.dispatch.clone(),
    ));
    let scanner = Scanner::new(
        store,
        orchestrator,
        cfg.paths.broadcasters_file.clone(),
        cfg.scanner.clone(),
    );

    info!(
        interval_secs = cfg.scanner.interval_secs,
        "queue scanner running"
    );
    scanner.run().await;
}
