//! BabySphere monitor - infant posture and nursery sensor monitor
//!
//! Runs on the nursery Raspberry Pi next to the camera node.
//!
//! Module structure:
//! - `domain/` - Core types (frames, landmarks, posture labels, sensor records)
//! - `io/` - External interfaces (camera, pose service, sensors, API, relay, sinks)
//! - `services/` - Monitoring logic (classifier, debouncer, aggregator, dispatcher)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use babysphere_monitor::infra::{Config, Metrics};
use babysphere_monitor::io::{
    build_driver, run_event_loop, serve_api, serve_relay, ApiState, CameraStream, FirebaseSink,
    HttpAlertSink, HttpPoseClient, JsonlSink, LiveView, MqttSink, OverlaySink, RelayHub,
};
use babysphere_monitor::services::{
    run_producer, PostureMonitor, PostureThresholds, SensorAggregator, SinkDispatcher,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// BabySphere monitor - posture alerts and sensor aggregation
#[derive(Parser, Debug)]
#[command(name = "babysphere-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

/// Bind a server port; failure is fatal at startup
async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {addr}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level; LOG_FORMAT=json for log shippers
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("babysphere-monitor starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        flush_interval_ms = %config.flush_interval_ms(),
        required_kinds = ?config.required_kinds(),
        sensors = %config.sensors().len(),
        camera = ?config.camera().stream_url,
        pose_service = %config.pose_service().url,
        api_port = %config.api().port,
        relay_port = %config.relay().port,
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let view = Arc::new(LiveView::new());

    // Sinks; the overlay is always on so relay viewers see the current alert
    let sinks = config.sinks();
    let mut dispatcher = SinkDispatcher::new(metrics.clone())
        .with_deliver_timeout(Duration::from_millis(sinks.deliver_timeout_ms));
    dispatcher.add_sink(Arc::new(OverlaySink::new(view.clone())));

    if sinks.file.enabled {
        dispatcher.add_sink(Arc::new(JsonlSink::new(&sinks.file.path)));
    }
    if sinks.cloud.enabled {
        let cloud = FirebaseSink::new(&sinks.cloud).context("Invalid cloud sink config")?;
        dispatcher.add_sink(Arc::new(cloud));
    }
    if sinks.http_alert.enabled {
        let webhook =
            HttpAlertSink::new(&sinks.http_alert).context("Invalid http_alert sink config")?;
        dispatcher.add_sink(Arc::new(webhook));
    }
    if sinks.mqtt.enabled {
        let (mqtt, eventloop) = MqttSink::new(&sinks.mqtt, config.site_id());
        dispatcher.add_sink(Arc::new(mqtt));
        tokio::spawn(run_event_loop(eventloop, shutdown_rx.clone()));
    }

    let relay_port = config.relay().port;
    let relay_hub = Arc::new(RelayHub::new(
        view.clone(),
        metrics.clone(),
        Duration::from_millis(config.relay().interval_ms),
        shutdown_rx.clone(),
    ));
    if relay_port > 0 && sinks.websocket.enabled {
        dispatcher.add_sink(Arc::new(relay_hub.sink()));
    }

    info!(sinks = ?dispatcher.sink_names(), "sinks_configured");
    let dispatcher = Arc::new(dispatcher);

    // Sensor side: producers feed the aggregator, the flusher drains it
    let aggregator = Arc::new(SensorAggregator::from_config(config.aggregator(), metrics.clone()));
    for sensor in config.sensors() {
        // A sensor that cannot be opened is fatal at startup
        let driver = build_driver(sensor)
            .with_context(|| format!("Failed to start sensor {}", sensor.label()))?;
        tokio::spawn(run_producer(
            driver,
            Duration::from_millis(sensor.poll_interval_ms),
            aggregator.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        ));
    }

    let flusher = tokio::spawn(aggregator.clone().run_flusher(
        Duration::from_millis(config.flush_interval_ms()),
        config.aggregator().stall_warn_ticks,
        dispatcher.clone(),
        shutdown_rx.clone(),
    ));

    // Posture side
    let pose_client =
        HttpPoseClient::new(config.pose_service()).context("Failed to build pose client")?;
    let monitor = Arc::new(PostureMonitor::new(
        Arc::new(pose_client),
        PostureThresholds::from_config(config.classifier()),
        view,
        dispatcher,
        metrics.clone(),
    ));

    if let Some(url) = &config.camera().stream_url {
        let camera = CameraStream::new(url, config.camera(), monitor.clone())
            .context("Failed to build camera client")?;
        tokio::spawn(camera.run(shutdown_rx.clone()));
    }

    let api_port = config.api().port;
    if api_port > 0 {
        let state = Arc::new(ApiState {
            monitor: monitor.clone(),
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
            max_body_bytes: config.api().max_body_bytes,
        });
        let listener = bind(api_port).await?;
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_api(listener, state, api_shutdown).await {
                error!(error = %e, "api_server_error");
            }
        });
    }

    if relay_port > 0 {
        let listener = bind(relay_port).await?;
        let mut relay_shutdown = shutdown_rx.clone();
        let stop = async move {
            while relay_shutdown.changed().await.is_ok() {
                if *relay_shutdown.borrow() {
                    break;
                }
            }
        };
        tokio::spawn(async move {
            if let Err(e) = serve_relay(listener, relay_hub, stop).await {
                error!(error = %e, "relay_server_error");
            }
        });
    }

    // Periodic metrics summary
    let metrics_reporter = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_reporter.report().log(),
                _ = reporter_shutdown.changed() => {
                    if *reporter_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    info!("monitor_running");
    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Let an in-flight flush finish
    if let Err(e) = flusher.await {
        error!(error = %e, "flusher_join_failed");
    }

    metrics.report().log();
    info!("babysphere-monitor shutdown complete");
    Ok(())
}
