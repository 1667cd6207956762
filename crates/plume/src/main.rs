mod archive;
mod cli;
mod render;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use archive::{ArchiveError, ArchiveSource};
use clap::Parser;
use cli::{Opts, OptsCmd, ReplayOpts};
use plume_core::Timestamp;
use plume_core::reference::{ReferenceDecodeError, find_reference_tokens};
use plume_feed::filter::is_unreadable_payload;
use plume_feed::{
    BadgeState, FeedConfig, FeedController, FeedError, FeedEvent, FeedMode, FeedTarget,
    FilterConfig, FilterSettings, StructuralVerifier,
};
use plume_util_error::WhateverResult;
use render::RenderedRecord;
use snafu::{FromString, ResultExt, Snafu, Whatever};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub const LOG_TARGET: &str = "plume::cli";

/// How often settling re-checks state that changes without an event
const SETTLE_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(display("Archive error: {source}"))]
    Archive { source: ArchiveError },
    #[snafu(display("Failed to read filter settings {}: {source}", path.display()))]
    FilterRead { path: PathBuf, source: io::Error },
    #[snafu(display("Invalid filter settings: {source}"))]
    FilterParse { source: serde_json::Error },
    #[snafu(display("Reference decoding error: {source}"))]
    Decode { source: ReferenceDecodeError },
    #[snafu(display("Feed failed to load: {message}"))]
    Load { message: String },
    #[snafu(display("Feed error: {source}"))]
    Feed { source: FeedError },
    #[snafu(display("Miscellaneous error: {source}"))]
    Whatever { source: Whatever },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    init_logging().context(WhateverSnafu)?;

    let opts = Opts::parse();
    let v = handle_cmd(opts).await?;
    println!("{}", serde_json::to_string_pretty(&v).expect("Can't fail"));
    Ok(())
}

async fn handle_cmd(opts: Opts) -> CliResult<serde_json::Value> {
    Ok(match opts.cmd {
        OptsCmd::Replay(replay_opts) => replay(replay_opts).await?,
        OptsCmd::Decode { token } => {
            let decoded = plume_core::decode_reference(&token).context(DecodeSnafu)?;

            serde_json::to_value(decoded).expect("Can't fail")
        }
        OptsCmd::Inspect { text } => {
            let references: Vec<_> = find_reference_tokens(&text)
                .into_iter()
                .map(|t| {
                    serde_json::json!({
                        "token": t.token,
                        "start": t.span.start,
                        "end": t.span.end,
                    })
                })
                .collect();

            serde_json::json!({
                "unreadable": is_unreadable_payload(&text),
                "references": references,
            })
        }
    })
}

fn read_filter(path: &Path) -> CliResult<FilterConfig> {
    let content = std::fs::read_to_string(path).context(FilterReadSnafu { path })?;
    let settings: FilterSettings = serde_json::from_str(&content).context(FilterParseSnafu)?;
    Ok(FilterConfig::from(settings))
}

async fn replay(opts: ReplayOpts) -> CliResult<serde_json::Value> {
    let filter = match &opts.filter_file {
        Some(path) => read_filter(path)?,
        None => FilterConfig::default(),
    };
    let source = ArchiveSource::load(&opts.archive)
        .context(ArchiveSnafu)?
        .streaming(!opts.batch);
    if source.is_empty() {
        warn!(target: LOG_TARGET, path = %opts.archive.display(), "Archive has no records");
    }
    info!(target: LOG_TARGET, records = source.len(), streaming = !opts.batch, "Replaying archive");

    let config = FeedConfig::builder()
        .poll_interval(Duration::from_secs(opts.poll_interval_secs.max(1)))
        .build();
    let reply_fallback = config.reply_fallback;

    let controller = FeedController::builder()
        .source(Arc::new(source))
        .verifier(Arc::new(StructuralVerifier))
        .config(config)
        .filter(filter)
        .build();
    let mut events = controller.events_subscribe();

    let mode = if let Some(author) = opts.profile {
        FeedMode::Profile(author)
    } else if !opts.follows.is_empty() {
        FeedMode::Follows(opts.follows.clone())
    } else {
        FeedMode::Global
    };
    controller
        .activate(FeedTarget {
            identity: None,
            mode,
            sources: opts.relays.clone(),
        })
        .await;

    if !controller.state().is_loaded() {
        let message = failure_message(&mut events).unwrap_or_else(|| "unknown failure".to_owned());
        return LoadSnafu { message }.fail();
    }

    settle(&controller, &mut events, Duration::from_secs(opts.settle_secs)).await;

    let now = Timestamp::now();
    let mut out = vec![];
    for record in controller.visible_records() {
        let embeds = if opts.embeds {
            Some(
                controller
                    .resolve_embeds(record.id)
                    .await
                    .context(FeedSnafu)?,
            )
        } else {
            None
        };
        let rendered = RenderedRecord {
            record: &record,
            profile: controller.profile(&record.author),
            badge: controller.badge(&record.id),
            embeds,
        };
        out.push(rendered.to_json(now, reply_fallback));
    }

    controller.deactivate();
    Ok(serde_json::Value::Array(out))
}

fn failure_message(events: &mut broadcast::Receiver<FeedEvent>) -> Option<String> {
    let mut message = None;
    while let Ok(event) = events.try_recv() {
        if let FeedEvent::Failed { message: m, .. } = event {
            message = Some(m);
        }
    }
    message
}

/// Wait until every visible record has a final badge and a profile entry, or
/// `timeout` passes
async fn settle(
    controller: &FeedController,
    events: &mut broadcast::Receiver<FeedEvent>,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;
    loop {
        let records = controller.visible_records();
        let unverified = records
            .iter()
            .filter(|r| {
                controller
                    .badge(&r.id)
                    .is_none_or(|b| b == BadgeState::Pending)
            })
            .count();
        let unprofiled = records
            .iter()
            .filter(|r| !controller.profiles().contains(&r.author))
            .count();

        if unverified == 0 && unprofiled == 0 {
            debug!(target: LOG_TARGET, count = records.len(), "Feed settled");
            return;
        }
        if deadline <= Instant::now() {
            warn!(target: LOG_TARGET, unverified, unprofiled, "Printing before the feed settled");
            return;
        }

        match tokio::time::timeout(SETTLE_TICK, events.recv()).await {
            Ok(Ok(_)) | Err(_) => {}
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                debug!(target: LOG_TARGET, skipped, "Lagging behind feed events");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                warn!(target: LOG_TARGET, "Feed events closed");
                return;
            }
        }
    }
}

pub fn init_logging() -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("Failed to initialize logging".to_string()))?;

    Ok(())
}
