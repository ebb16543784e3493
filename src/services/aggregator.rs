//! Sensor aggregation into complete records
//!
//! Producers call `record` on their own schedule. The flusher checks on a
//! fixed interval whether every required kind has a value since the last
//! commit; if so the snapshot is taken and cleared in one critical section
//! and handed to the dispatcher outside the lock. Partial records are never
//! emitted.

use crate::domain::types::{AggregatedRecord, MonitorEvent, SensorKind, SensorReading};
use crate::infra::config::AggregatorConfig;
use crate::infra::metrics::Metrics;
use crate::services::dispatcher::SinkDispatcher;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

pub struct SensorAggregator {
    required: Vec<SensorKind>,
    /// Latest value per required kind since the last commit
    pending: Mutex<BTreeMap<SensorKind, f64>>,
    metrics: Arc<Metrics>,
}

impl SensorAggregator {
    pub fn new(required: &[SensorKind], metrics: Arc<Metrics>) -> Self {
        let mut required = required.to_vec();
        required.sort();
        required.dedup();
        Self { required, pending: Mutex::new(BTreeMap::new()), metrics }
    }

    pub fn from_config(config: &AggregatorConfig, metrics: Arc<Metrics>) -> Self {
        Self::new(&config.required_kinds, metrics)
    }

    pub fn required(&self) -> &[SensorKind] {
        &self.required
    }

    /// Store a reading, overwriting any earlier value of the same kind.
    /// Returns false when the kind is not tracked.
    pub fn record(&self, reading: SensorReading) -> bool {
        if !self.required.contains(&reading.kind) {
            debug!(kind = %reading.kind, "sensor_reading_ignored");
            return false;
        }

        self.pending.lock().insert(reading.kind, reading.value);
        self.metrics.record_reading();
        trace!(kind = %reading.kind, value = %reading.value, "sensor_reading");
        true
    }

    /// Take the record if every required kind is present, clearing all kinds.
    /// Leaves state untouched otherwise.
    pub fn take_complete(&self) -> Option<AggregatedRecord> {
        let mut pending = self.pending.lock();
        if self.required.is_empty() || self.required.iter().any(|k| !pending.contains_key(k)) {
            return None;
        }
        let values = std::mem::take(&mut *pending);
        drop(pending);

        Some(AggregatedRecord { values, timestamp: Utc::now() })
    }

    /// Required kinds with no value since the last commit
    pub fn missing_kinds(&self) -> Vec<SensorKind> {
        let pending = self.pending.lock();
        self.required.iter().filter(|k| !pending.contains_key(k)).copied().collect()
    }

    /// One flusher tick: commit and dispatch a complete record, if any
    pub async fn flush(&self, dispatcher: &SinkDispatcher) -> Option<AggregatedRecord> {
        let record = self.take_complete();
        self.metrics.record_flush(record.is_some());
        let record = record?;

        let event = MonitorEvent::Record(record.clone());
        let report = dispatcher.dispatch(&event).await;
        if report.all_failed() {
            error!(failed = %report.failed, "record_persist_failed");
        } else {
            info!(
                kinds = %record.values.len(),
                delivered = %report.delivered,
                failed = %report.failed,
                "record_flushed"
            );
        }
        Some(record)
    }

    /// Periodic flusher; runs until shutdown
    pub async fn run_flusher(
        self: Arc<Self>,
        flush_interval: Duration,
        stall_warn_ticks: u32,
        dispatcher: Arc<SinkDispatcher>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            interval_ms = %flush_interval.as_millis(),
            required = ?self.required.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "aggregator_flusher_started"
        );

        let mut ticker = interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        let mut stall = StallWatch::new(stall_warn_ticks);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("aggregator_flusher_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let flushed = self.flush(&dispatcher).await.is_some();
                    if stall.observe(flushed) {
                        let missing = self.missing_kinds();
                        warn!(
                            incomplete_ticks = %stall.consecutive(),
                            missing = ?missing.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                            "aggregator_stalled"
                        );
                    }
                }
            }
        }
    }
}

/// Counts consecutive incomplete flushes and fires every `warn_every` ticks
#[derive(Debug)]
struct StallWatch {
    warn_every: u32,
    consecutive: u32,
}

impl StallWatch {
    fn new(warn_every: u32) -> Self {
        Self { warn_every, consecutive: 0 }
    }

    /// Returns true when a stall warning is due
    fn observe(&mut self, flushed: bool) -> bool {
        if flushed {
            self.consecutive = 0;
            return false;
        }
        self.consecutive = self.consecutive.saturating_add(1);
        self.warn_every > 0 && self.consecutive % self.warn_every == 0
    }

    fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::dispatcher::test_support::{CollectingSink, FailingSink};

    fn aggregator(kinds: &[SensorKind]) -> SensorAggregator {
        SensorAggregator::new(kinds, Arc::new(Metrics::new()))
    }

    #[test]
    fn test_incomplete_record_is_not_emitted() {
        let agg = aggregator(&[SensorKind::HeartRate, SensorKind::Spo2]);

        agg.record(SensorReading::now(SensorKind::HeartRate, 80.0));
        assert!(agg.take_complete().is_none());
        // Nothing was cleared
        assert_eq!(agg.missing_kinds(), vec![SensorKind::Spo2]);

        agg.record(SensorReading::now(SensorKind::Spo2, 97.0));
        let record = agg.take_complete().unwrap();
        assert_eq!(record.get(SensorKind::HeartRate), Some(80.0));
        assert_eq!(record.get(SensorKind::Spo2), Some(97.0));

        // A lone value after a commit does not retrigger
        agg.record(SensorReading::now(SensorKind::HeartRate, 82.0));
        assert!(agg.take_complete().is_none());
        agg.record(SensorReading::now(SensorKind::HeartRate, 83.0));
        assert!(agg.take_complete().is_none());
    }

    #[test]
    fn test_latest_value_wins() {
        let agg = aggregator(&[SensorKind::Temperature]);
        agg.record(SensorReading::now(SensorKind::Temperature, 30.0));
        agg.record(SensorReading::now(SensorKind::Temperature, 31.5));
        assert_eq!(agg.take_complete().unwrap().get(SensorKind::Temperature), Some(31.5));
    }

    #[test]
    fn test_untracked_kind_is_ignored() {
        let agg = aggregator(&[SensorKind::Temperature]);
        assert!(!agg.record(SensorReading::now(SensorKind::Spo2, 98.0)));
        assert!(agg.record(SensorReading::now(SensorKind::Temperature, 30.0)));
        let record = agg.take_complete().unwrap();
        assert_eq!(record.values.len(), 1);
    }

    #[test]
    fn test_empty_required_set_never_emits() {
        let agg = aggregator(&[]);
        assert!(agg.take_complete().is_none());
    }

    #[tokio::test]
    async fn test_flush_emits_once_then_nothing() {
        let agg = aggregator(&[SensorKind::Temperature, SensorKind::Humidity]);
        let sink = Arc::new(CollectingSink::default());
        let dispatcher = SinkDispatcher::new(Arc::new(Metrics::new())).with_sink(sink.clone());

        agg.record(SensorReading::now(SensorKind::Temperature, 30.0));
        agg.record(SensorReading::now(SensorKind::Humidity, 70.0));

        let record = agg.flush(&dispatcher).await.unwrap();
        assert_eq!(record.get(SensorKind::Temperature), Some(30.0));
        assert_eq!(record.get(SensorKind::Humidity), Some(70.0));
        assert!(agg.flush(&dispatcher).await.is_none());
        assert_eq!(sink.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_record_cleared_even_when_all_sinks_fail() {
        let agg = aggregator(&[SensorKind::Temperature]);
        let dispatcher =
            SinkDispatcher::new(Arc::new(Metrics::new())).with_sink(Arc::new(FailingSink));

        agg.record(SensorReading::now(SensorKind::Temperature, 30.0));
        assert!(agg.flush(&dispatcher).await.is_some());
        assert_eq!(agg.missing_kinds(), vec![SensorKind::Temperature]);
    }

    #[test]
    fn test_concurrent_producers() {
        let agg = Arc::new(aggregator(&SensorKind::ALL));
        let handles: Vec<_> = SensorKind::ALL
            .iter()
            .map(|kind| {
                let agg = agg.clone();
                let kind = *kind;
                std::thread::spawn(move || {
                    for i in 0..100 {
                        agg.record(SensorReading::now(kind, i as f64));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let record = agg.take_complete().unwrap();
        assert_eq!(record.values.len(), 6);
        assert!(record.values.values().all(|v| *v == 99.0));
    }

    #[test]
    fn test_stall_watch() {
        let mut stall = StallWatch::new(3);
        assert!(!stall.observe(false));
        assert!(!stall.observe(false));
        assert!(stall.observe(false));
        assert!(!stall.observe(false));
        assert!(!stall.observe(true));
        assert_eq!(stall.consecutive(), 0);

        let mut disabled = StallWatch::new(0);
        assert!((0..10).all(|_| !disabled.observe(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flusher_stops_on_shutdown() {
        let agg = Arc::new(aggregator(&[SensorKind::Temperature]));
        let sink = Arc::new(CollectingSink::default());
        let dispatcher =
            Arc::new(SinkDispatcher::new(Arc::new(Metrics::new())).with_sink(sink.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(agg.clone().run_flusher(
            Duration::from_millis(100),
            0,
            dispatcher,
            rx,
        ));

        agg.record(SensorReading::now(SensorKind::Temperature, 30.0));
        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(sink.received.lock().len(), 1);
    }
}
