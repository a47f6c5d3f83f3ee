use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{self, LogConfig};
use crate::data::{
    FeedService, FeedSource, MockFeedService, MockPostService, PostService, ServingFeedService,
    ServingPostService,
};
use crate::media;
use crate::serving::{self, SearchQuery};
use crate::ui;

pub const LOG_ENV: &str = "PINFEED_LOG";
/// Extra time on top of the request timeout before a fetch counts as stalled.
const STALL_GRACE_SECS: u64 = 5;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub search: Option<String>,
    /// Browse generated posts instead of talking to the serving API.
    pub offline: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    init_tracing(&cfg.log);

    let source = match opts.search.as_deref().map(SearchQuery::parse) {
        Some(query) if !query.is_empty() => FeedSource::Search(query),
        _ => FeedSource::Latest,
    };

    let feed_service: Arc<dyn FeedService + Send + Sync>;
    let post_service: Arc<dyn PostService + Send + Sync>;
    let status: String;

    if opts.offline {
        feed_service = Arc::new(MockFeedService::default());
        post_service = Arc::new(MockPostService);
        status = "Offline mode: browsing sample posts.".to_string();
    } else {
        let client = Arc::new(
            serving::Client::new(serving::ClientConfig {
                base_url: cfg.serving.base_url.clone(),
                user_agent: cfg.serving.user_agent.clone(),
                timeout: Some(cfg.serving.timeout),
                http_client: None,
            })
            .context("create serving client")?,
        );
        status = format!("Connected to {}", client.base_url());
        feed_service = Arc::new(ServingFeedService::new(client.clone()));
        post_service = Arc::new(ServingPostService::new(client));
    }

    let media_manager = match media::Manager::new(media::Config {
        workers: cfg.media.workers,
        timeout: cfg.media.timeout,
        max_image_bytes: cfg.media.max_image_bytes,
        user_agent: cfg.serving.user_agent.clone(),
        http_client: None,
    }) {
        Ok(manager) => Some(manager),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "image loading disabled");
            None
        }
    };
    let media_handle = media_manager.as_ref().map(|manager| manager.handle());

    info!(
        version = crate::VERSION,
        base_url = %cfg.serving.base_url,
        page_size = cfg.feed.page_size,
        offline = opts.offline,
        "starting pinfeed"
    );

    let options = ui::Options {
        status_message: status,
        source,
        feed_service,
        post_service: Some(post_service),
        media_handle,
        page_size: cfg.feed.page_size,
        prefetch_margin: cfg.feed.prefetch_margin,
        stall_after: cfg.serving.timeout + Duration::from_secs(STALL_GRACE_SECS),
    };

    let mut model = ui::Model::new(options);
    let result = model.run();

    drop(media_manager);
    info!("pinfeed exited");
    result
}

/// Sends logs to the configured file; the terminal belongs to the UI.
/// `PINFEED_LOG` takes precedence over the configured filter.
fn init_tracing(log: &LogConfig) {
    let Some(path) = log.file.as_ref() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("warning: cannot open log file {}: {err}", path.display());
            return;
        }
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
}
