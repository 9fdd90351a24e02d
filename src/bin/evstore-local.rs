//! Local event store process
//!
//! Loads the parameters for the current application mode, opens the store and
//! runs the notification pipeline until interrupted. Notifications are logged
//! as JSON by an attached subscriber. With `--demo` the process also appends
//! a tick event to a demo stream at a fixed interval.
//!
//! ```text
//! EVENT_STORE_MODE=development evstore-local --params params.toml --demo
//! ```

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use evstore::{
    AppMode, BroadcastPublisher, Database, EventStoreConfig, NewEvent, NotificationPipeline,
    PipelineConfig, StreamId, StreamType, TomlParameters, DEFAULT_CHANNEL_CAPACITY,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn build_cli() -> Command {
    Command::new("evstore-local")
        .about("Run an event store with its notification pipeline")
        .arg(
            Arg::new("params")
                .long("params")
                .short('p')
                .value_name("PATH")
                .default_value("evstore.toml")
                .help("Parameter file of \"/<mode>/event-store/NAME\" = value entries"),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_name("MODE")
                .help("Application mode (default: $EVENT_STORE_MODE)"),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .action(ArgAction::SetTrue)
                .help("Append a tick event to stream \"demo-1\" periodically"),
        )
        .arg(
            Arg::new("demo-interval-ms")
                .long("demo-interval-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64).range(1..))
                .default_value("1000")
                .help("Interval between demo appends"),
        )
}

/// Append to the demo stream on every tick, tracking the expected revision
async fn run_demo(db: Arc<Database>, every: Duration) -> anyhow::Result<()> {
    let id = StreamId::new("demo-1")?;
    let stream_type = StreamType::new("Demo")?;
    let mut expected = db.get_head(&id).map(|s| s.revision).unwrap_or(0);
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let event = NewEvent::new("Tick", format!(r#"{{"n":{}}}"#, expected + 1));
        match db.append(&id, &stream_type, expected, event) {
            Ok(stream) => {
                expected = stream.revision;
                info!(target: "evstore::local", stream_id = %id, revision = expected, "Demo append");
            }
            Err(e) if e.is_conflict() => {
                warn!(target: "evstore::local", stream_id = %id, error = %e, "Demo append lost a race");
                expected = db.get_head(&id).map(|s| s.revision).unwrap_or(expected);
            }
            Err(e) => warn!(target: "evstore::local", stream_id = %id, error = %e, "Demo append failed"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let matches = build_cli().get_matches();

    let mode = match matches.get_one::<String>("mode") {
        Some(raw) => raw.parse::<AppMode>()?,
        None => AppMode::from_env()?,
    };
    let params_path = matches
        .get_one::<String>("params")
        .map(PathBuf::from)
        .context("missing --params")?;
    let params = TomlParameters::from_file(&params_path)?;
    let config = EventStoreConfig::load(mode, &params)
        .with_context(|| format!("loading {} parameters", mode))?;

    let db = Database::from_config(&config)?;
    info!(
        target: "evstore::local",
        mode = %config.mode,
        port = config.port,
        table = %config.table_name,
        index = %config.index_name,
        durable = db.is_durable(),
        version = db.current_version(),
        "Event store ready"
    );

    let publisher = Arc::new(BroadcastPublisher::new(
        config.notification_channel.clone(),
        DEFAULT_CHANNEL_CAPACITY,
    ));
    let mut subscription = publisher.subscribe();
    let consumer = tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(Some(notification)) => match notification.to_json() {
                    Ok(json) => info!(target: "evstore::local", %json, "Commit"),
                    Err(e) => warn!(target: "evstore::local", error = %e, "Unencodable notification"),
                },
                Ok(None) => break,
                Err(e) => warn!(target: "evstore::local", error = %e, "Subscriber resync needed"),
            }
        }
    });

    let pipeline = NotificationPipeline::start(
        &db,
        publisher.clone(),
        PipelineConfig::from_config(&config),
    )?;

    let demo = if matches.get_flag("demo") {
        let every = matches
            .get_one::<u64>("demo-interval-ms")
            .copied()
            .map(Duration::from_millis)
            .context("missing --demo-interval-ms")?;
        let db = Arc::clone(&db);
        Some(tokio::spawn(async move {
            if let Err(e) = run_demo(db, every).await {
                warn!(target: "evstore::local", error = %e, "Demo stopped");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;

    if let Some(demo) = demo {
        demo.abort();
    }

    let stats = pipeline.shutdown().await?;
    drop(publisher);
    consumer.abort();
    db.flush()?;
    info!(
        target: "evstore::local",
        received = stats.received,
        published = stats.published,
        failed = stats.failed,
        "Shut down"
    );
    Ok(())
}
