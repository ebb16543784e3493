//! Sensor drivers
//!
//! Simulated drivers stand in for the nursery hardware and draw values from
//! plausible ranges:
//! - DHT22: temperature 29-35 C, humidity 60-90 %
//! - MLX90614: baby (object) temperature 36.0-37.5 C, ambient 22-28 C
//! - MAX30102: heart rate 60-100 bpm, SpO2 95-99 %
//!
//! The serial bridge reads newline-delimited `kind=value` pairs from a UART,
//! e.g. `baby_temperature=36.7,ambient_temperature=24.1`, as relayed by a
//! microcontroller wired to the real sensors.

use crate::domain::types::{SensorKind, SensorReading};
use crate::infra::config::{SensorConfig, SensorDriverKind};
use crate::services::producer::{Readings, SensorDriver, SensorError};
use anyhow::Context;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::smallvec;
use std::ops::Range;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace};

/// Longest line accepted from the serial bridge
const MAX_LINE_LEN: usize = 256;

/// How long one poll waits for serial data
const SERIAL_READ_WINDOW: Duration = Duration::from_millis(500);

/// Simulated sensor reporting two quantities from fixed ranges
pub struct SimulatedSensor {
    name: &'static str,
    channels: [(SensorKind, Range<f64>); 2],
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn dht22() -> Self {
        Self::new(
            "dht22",
            [(SensorKind::Temperature, 29.0..35.0), (SensorKind::Humidity, 60.0..90.0)],
        )
    }

    pub fn mlx90614() -> Self {
        Self::new(
            "mlx90614",
            [
                (SensorKind::BabyTemperature, 36.0..37.5),
                (SensorKind::AmbientTemperature, 22.0..28.0),
            ],
        )
    }

    pub fn max30102() -> Self {
        Self::new(
            "max30102",
            [(SensorKind::HeartRate, 60.0..100.0), (SensorKind::Spo2, 95.0..99.0)],
        )
    }

    fn new(name: &'static str, channels: [(SensorKind, Range<f64>); 2]) -> Self {
        Self { name, channels, rng: StdRng::from_entropy() }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn kinds(&self) -> [SensorKind; 2] {
        [self.channels[0].0, self.channels[1].0]
    }
}

#[async_trait]
impl SensorDriver for SimulatedSensor {
    fn name(&self) -> &str {
        self.name
    }

    async fn read(&mut self) -> Result<Readings, SensorError> {
        let [(k0, r0), (k1, r1)] = &self.channels;
        let v0 = self.rng.gen_range(r0.clone());
        let v1 = self.rng.gen_range(r1.clone());
        Ok(smallvec![SensorReading::now(*k0, v0), SensorReading::now(*k1, v1)])
    }
}

/// Parse one `kind=value[,kind=value...]` line.
/// Pairs may be separated by commas, semicolons or whitespace.
pub fn parse_line(line: &str) -> Result<Readings, SensorError> {
    let mut readings = Readings::new();
    for pair in line.split(|c: char| c == ',' || c == ';' || c.is_whitespace()) {
        if pair.is_empty() {
            continue;
        }
        let (kind, value) = pair
            .split_once('=')
            .ok_or_else(|| SensorError::Parse(format!("expected kind=value, got {pair:?}")))?;
        let kind: SensorKind = kind.trim().parse().map_err(SensorError::Parse)?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| SensorError::Parse(format!("bad value for {kind}: {value:?}")))?;
        if !value.is_finite() {
            return Err(SensorError::Parse(format!("non-finite value for {kind}")));
        }
        readings.push(SensorReading::now(kind, value));
    }
    if readings.is_empty() {
        return Err(SensorError::Parse("empty line".to_string()));
    }
    Ok(readings)
}

/// Serial `kind=value` line reader
pub struct SerialSensorBridge<R> {
    name: String,
    port: R,
    /// Bytes of an incomplete line carried over between polls
    read_buffer: Vec<u8>,
    read_window: Duration,
}

impl SerialSensorBridge<tokio_serial::SerialStream> {
    /// Open the serial device; failure here is fatal at startup
    pub fn open(name: &str, device: &str, baud: u32) -> anyhow::Result<Self> {
        let port = tokio_serial::new(device, baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .with_context(|| format!("Failed to open serial device {device} at {baud} baud"))?;
        info!(sensor = %name, device = %device, baud = %baud, "serial_port_opened");
        Ok(Self::from_reader(name, port))
    }
}

impl<R: AsyncRead + Unpin + Send> SerialSensorBridge<R> {
    pub fn from_reader(name: &str, port: R) -> Self {
        Self {
            name: name.to_string(),
            port,
            read_buffer: Vec::with_capacity(MAX_LINE_LEN),
            read_window: SERIAL_READ_WINDOW,
        }
    }

    pub fn with_read_window(mut self, window: Duration) -> Self {
        self.read_window = window;
        self
    }

    /// Split complete lines off the buffer, keeping any partial tail
    fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.read_buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.read_buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        if self.read_buffer.len() > MAX_LINE_LEN {
            debug!(discarded = self.read_buffer.len(), "serial_line_too_long");
            self.read_buffer.clear();
        }
        lines
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> SensorDriver for SerialSensorBridge<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self) -> Result<Readings, SensorError> {
        let deadline = tokio::time::Instant::now() + self.read_window;
        let mut temp_buf = [0u8; 128];
        let mut lines = self.take_lines();

        while lines.is_empty() {
            match tokio::time::timeout_at(deadline, self.port.read(&mut temp_buf)).await {
                Ok(Ok(0)) => {
                    return Err(SensorError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                }
                Ok(Ok(n)) => {
                    self.read_buffer.extend_from_slice(&temp_buf[..n]);
                    lines = self.take_lines();
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Ok(Err(e)) => return Err(SensorError::Io(e)),
                Err(_) => return Err(SensorError::NoData),
            }
        }

        // Latest complete line wins; earlier ones are stale by now
        let mut last_err = None;
        for line in lines.iter().rev() {
            match parse_line(line) {
                Ok(readings) => return Ok(readings),
                Err(e) => {
                    trace!(sensor = %self.name, line = %line, "serial_line_rejected");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(SensorError::NoData))
    }
}

/// Build the driver for one `[[sensors]]` entry
pub fn build_driver(config: &SensorConfig) -> anyhow::Result<Box<dyn SensorDriver>> {
    let driver: Box<dyn SensorDriver> = match config.driver {
        SensorDriverKind::Dht22Sim => Box::new(SimulatedSensor::dht22()),
        SensorDriverKind::Mlx90614Sim => Box::new(SimulatedSensor::mlx90614()),
        SensorDriverKind::Max30102Sim => Box::new(SimulatedSensor::max30102()),
        SensorDriverKind::Serial => {
            let device = config
                .device
                .as_deref()
                .with_context(|| format!("sensor {} needs a serial device", config.label()))?;
            Box::new(SerialSensorBridge::open(&config.label(), device, config.baud)?)
        }
    };
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_simulated_ranges() {
        let mut dht = SimulatedSensor::dht22().with_seed(7);
        for _ in 0..50 {
            let readings = dht.read().await.unwrap();
            assert_eq!(readings.len(), 2);
            assert_eq!(readings[0].kind, SensorKind::Temperature);
            assert!((29.0..35.0).contains(&readings[0].value));
            assert!((60.0..90.0).contains(&readings[1].value));
        }

        let mut max = SimulatedSensor::max30102().with_seed(7);
        let readings = max.read().await.unwrap();
        assert!((95.0..99.0).contains(&readings[1].value));
    }

    #[test]
    fn test_simulators_cover_every_kind() {
        let mut kinds: Vec<SensorKind> = [
            SimulatedSensor::dht22(),
            SimulatedSensor::mlx90614(),
            SimulatedSensor::max30102(),
        ]
        .iter()
        .flat_map(|s| s.kinds())
        .collect();
        kinds.sort();
        assert_eq!(kinds, SensorKind::ALL.to_vec());
    }

    #[test]
    fn test_parse_line() {
        let readings = parse_line("baby_temperature=36.7, ambient_temperature=24.1").unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].kind, SensorKind::BabyTemperature);
        assert_eq!(readings[0].value, 36.7);
        assert_eq!(readings[1].value, 24.1);

        assert_eq!(parse_line("spo2=97").unwrap()[0].kind, SensorKind::Spo2);
    }

    #[test]
    fn test_parse_line_rejects_malformed() {
        assert!(parse_line("").is_err());
        assert!(parse_line("temperature").is_err());
        assert!(parse_line("pressure=1013").is_err());
        assert!(parse_line("humidity=wet").is_err());
        assert!(parse_line("humidity=NaN").is_err());
    }

    #[tokio::test]
    async fn test_serial_bridge_reads_split_lines() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut bridge =
            SerialSensorBridge::from_reader("uart", rx).with_read_window(Duration::from_secs(1));

        tx.write_all(b"heart_rate=8").await.unwrap();
        tx.write_all(b"1\nspo2=9").await.unwrap();

        let readings = bridge.read().await.unwrap();
        assert_eq!(readings[0].kind, SensorKind::HeartRate);
        assert_eq!(readings[0].value, 81.0);

        tx.write_all(b"8\n").await.unwrap();
        let readings = bridge.read().await.unwrap();
        assert_eq!(readings[0].kind, SensorKind::Spo2);
        assert_eq!(readings[0].value, 98.0);
    }

    #[tokio::test]
    async fn test_serial_bridge_latest_line_wins() {
        let (mut tx, rx) = tokio::io::duplex(128);
        let mut bridge = SerialSensorBridge::from_reader("uart", rx);

        tx.write_all(b"humidity=60\nhumidity=61\ngarbage\n").await.unwrap();
        let readings = bridge.read().await.unwrap();
        assert_eq!(readings[0].value, 61.0);
    }

    #[tokio::test]
    async fn test_serial_bridge_times_out_without_data() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut bridge =
            SerialSensorBridge::from_reader("uart", rx).with_read_window(Duration::from_millis(20));
        assert!(matches!(bridge.read().await, Err(SensorError::NoData)));
    }

    #[test]
    fn test_serial_driver_requires_device() {
        let config = SensorConfig::new(SensorDriverKind::Serial, 1000);
        assert!(build_driver(&config).is_err());
    }

    #[tokio::test]
    async fn test_missing_serial_device_is_error() {
        let mut config = SensorConfig::new(SensorDriverKind::Serial, 1000);
        config.device = Some("/dev/does-not-exist-babysphere".to_string());
        assert!(build_driver(&config).is_err());
    }
}
