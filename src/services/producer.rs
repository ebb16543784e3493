//! Sensor producer loop
//!
//! One task per configured sensor. Each poll reads the driver once and
//! records whatever it returned; a failed read is logged and counted and the
//! kind simply stays empty until the next successful poll.

use crate::domain::types::SensorReading;
use crate::infra::metrics::Metrics;
use crate::services::aggregator::SensorAggregator;
use async_trait::async_trait;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Values from one poll; drivers report one or two quantities
pub type Readings = SmallVec<[SensorReading; 2]>;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed reading: {0}")]
    Parse(String),
    #[error("no data before timeout")]
    NoData,
}

#[async_trait]
pub trait SensorDriver: Send {
    fn name(&self) -> &str;

    async fn read(&mut self) -> Result<Readings, SensorError>;
}

/// Poll `driver` every `poll_interval` until shutdown
pub async fn run_producer(
    mut driver: Box<dyn SensorDriver>,
    poll_interval: Duration,
    aggregator: Arc<SensorAggregator>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        sensor = %driver.name(),
        poll_interval_ms = %poll_interval.as_millis(),
        "sensor_producer_started"
    );

    let mut poll_timer = interval(poll_interval);
    poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(sensor = %driver.name(), "sensor_producer_shutdown");
                    return;
                }
            }
            _ = poll_timer.tick() => {}
        }

        match driver.read().await {
            Ok(readings) => {
                if consecutive_failures > 0 {
                    info!(
                        sensor = %driver.name(),
                        failures = %consecutive_failures,
                        "sensor_recovered"
                    );
                    consecutive_failures = 0;
                }
                for reading in readings {
                    debug!(
                        sensor = %driver.name(),
                        kind = %reading.kind,
                        value = %format!("{:.1}", reading.value),
                        "sensor_reading"
                    );
                    aggregator.record(reading);
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                metrics.record_producer_error();
                warn!(
                    sensor = %driver.name(),
                    error = %e,
                    failures = %consecutive_failures,
                    "sensor_read_failed"
                );
            }
        }
    }
}
