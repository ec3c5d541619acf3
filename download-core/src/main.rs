//! dl-native: fetch one URL through the native helper process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use download_core::bridge::ProcessBridgeConnector;
use download_core::collection::DownloadCollection;
use download_core::host::UnavailableHostService;
use download_core::logging::{LOG_RETENTION_DAYS, LoggingOptions, init_logging};
use download_core::preroll::{BridgePreroller, NoPreroll, Preroller};
use download_core::{
    Download, DownloadActor, DownloadContext, DownloadRequest, DownloadSettings, DownloadState,
    ManId,
};
use process_utils::StdioCommand;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const VERBOSE_LOG_FILTER: &str = "download_core=debug,dl_native=debug,native_messaging=debug";

/// How often a running download is checked against its backend.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(author, version, about = "Download a URL through the native helper", long_about = None)]
struct Args {
    /// The URL to download
    url: String,

    /// Native helper program
    #[arg(long, env = "DL_NATIVE_HELPER")]
    helper: PathBuf,

    /// Extra argument passed to the helper (repeatable)
    #[arg(long = "helper-arg", allow_hyphen_values = true)]
    helper_args: Vec<String>,

    /// Where the finished file should go
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Page the download was started from
    #[arg(short, long)]
    referrer: Option<String>,

    /// Probe the server through the helper before downloading
    #[clap(long)]
    preroll: bool,

    /// Directory for daily log files
    #[arg(long, env = "DL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log at debug level
    #[clap(short, long)]
    verbose: bool,
}

/// Single-download collection that reports to the console.
struct ConsoleCollection {
    state: watch::Sender<DownloadState>,
}

impl DownloadCollection for ConsoleCollection {
    fn set_dirty(&self, download: &Download) {
        debug!(
            written = download.written(),
            total = ?download.total_size(),
            "Progress"
        );
    }

    fn changed_state(&self, download: &Download, old: DownloadState, new: DownloadState) {
        info!(download_id = %download.id(), from = %old, to = %new, "State changed");
        self.state.send_replace(new);
    }

    fn add_man_id(&self, id: ManId, download_id: &str) {
        debug!(man_id = id, download_id, "Host id registered");
    }

    fn remove_man_id(&self, id: ManId) {
        debug!(man_id = id, "Host id released");
    }

    fn start_download(&self, download_id: &str) {
        debug!(download_id, "Restart requested");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let (logging, _guard) = init_logging(LoggingOptions {
        filter: None,
        log_dir: args.log_dir.clone(),
        ansi: true,
    })?;
    if args.verbose {
        logging.set_filter(VERBOSE_LOG_FILTER)?;
    }
    debug!(filter = %logging.get_filter(), "Logging initialized");
    if logging.log_dir().is_some() {
        if let Err(e) = logging.cleanup_old_logs(LOG_RETENTION_DAYS).await {
            warn!(error = %e, "Failed to clean up old logs");
        }
    }

    let settings = DownloadSettings::from_env().context("Failed to load download settings")?;
    let connector = Arc::new(ProcessBridgeConnector::new(
        StdioCommand::new(&args.helper).args(&args.helper_args),
    ));
    let preroller: Arc<dyn Preroller> = if args.preroll {
        Arc::new(BridgePreroller::new(connector.clone()))
    } else {
        Arc::new(NoPreroll)
    };

    let (state_tx, mut state_rx) = watch::channel(DownloadState::Queued);
    let ctx = DownloadContext::new(
        Arc::new(UnavailableHostService),
        Arc::new(ConsoleCollection { state: state_tx }),
    )
    .with_bridge(connector)
    .with_preroller(preroller)
    .with_settings(settings);

    let mut request = DownloadRequest::new(args.url.as_str());
    if let Some(destination) = args.destination {
        request = request.destination(destination);
    }
    if let Some(referrer) = args.referrer {
        request = request.referrer(referrer);
    }

    let token = CancellationToken::new();
    let (handle, task) = DownloadActor::spawn(Download::new(request, ctx), token.clone());
    info!(url = %args.url, "Starting download");
    handle.start().await?;

    let mut reconcile = tokio::time::interval(RECONCILE_INTERVAL);
    reconcile.tick().await;

    loop {
        let state = *state_rx.borrow_and_update();
        if state.is_terminal() {
            break;
        }

        if state == DownloadState::Retrying {
            let snapshot = handle.snapshot().await?;
            let wait = snapshot
                .deadline
                .and_then(|deadline| (deadline - Utc::now()).to_std().ok())
                .unwrap_or_default();
            info!(retries = snapshot.retries, error = ?snapshot.error, "Retrying in {:?}", wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    handle.resume(false).await?;
                    handle.start().await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, canceling");
                    handle.cancel().await?;
                }
            }
            continue;
        }

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = reconcile.tick() => handle.reconcile().await?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, canceling");
                handle.cancel().await?;
            }
        }
    }

    let snapshot = handle.snapshot().await?;
    handle.stop().await?;
    task.await.context("Download actor panicked")?;

    match snapshot.state {
        DownloadState::Done => {
            if let Some(path) = &snapshot.destination {
                println!("{}", path.display());
            }
            Ok(())
        }
        state => anyhow::bail!(
            "download ended {}: {}",
            state,
            snapshot.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}
