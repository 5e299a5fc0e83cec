use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::WemPortal;
use crate::types::{EntityKind, EntityRecord, Snapshot, Value};
use crate::{Error, Result};

pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(300);
/// Consecutive failed refreshes before the engine is rebuilt.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

type EngineFactory = Box<dyn Fn(&Config) -> Result<WemPortal> + Send + Sync>;

/// Scheduled-refresh driver around one [`WemPortal`] engine.
///
/// Keeps the last good snapshot for consumers, retries transient failures
/// once, and recreates the engine after repeated failures.
pub struct Coordinator {
    config: Config,
    factory: EngineFactory,
    engine: WemPortal,
    snapshot: Snapshot,
    last_update_success: bool,
    last_updated: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    cool_down_until: Option<Instant>,
    cycle_timeout: Duration,
    cool_down: Duration,
}

impl Coordinator {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_factory(config, |c: &Config| WemPortal::from_config(c.clone()))
    }

    /// Uses `factory` to create the engine, initially and on every rebuild.
    pub fn with_factory(
        config: Config,
        factory: impl Fn(&Config) -> Result<WemPortal> + Send + Sync + 'static,
    ) -> Result<Self> {
        let factory: EngineFactory = Box::new(factory);
        let engine = factory(&config)?;
        Ok(Self {
            config,
            factory,
            engine,
            snapshot: Snapshot::new(),
            last_update_success: false,
            last_updated: None,
            consecutive_failures: 0,
            cool_down_until: None,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            cool_down: DEFAULT_COOL_DOWN,
        })
    }

    pub fn cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    pub fn cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    pub fn update_interval(&self) -> Duration {
        self.config.update_interval()
    }

    pub fn data(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn engine(&self) -> &WemPortal {
        &self.engine
    }

    /// Whether the most recent refresh succeeded.
    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cool_down_remaining(&self) -> Option<Duration> {
        self.cool_down_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    async fn cycle(&mut self) -> Result<Snapshot> {
        match tokio::time::timeout(self.cycle_timeout, self.engine.fetch_data()).await {
            Ok(Ok(snapshot)) => Ok(snapshot.clone()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::fetch(Error::Timeout)),
        }
    }

    /// Runs one scheduled refresh. On failure the previous snapshot stays
    /// available through [`Coordinator::data`].
    pub async fn refresh(&mut self) -> Result<&Snapshot> {
        if let Some(left) = self.cool_down_remaining() {
            debug!(left_secs = left.as_secs(), "refresh skipped during cool-down");
            return Err(Error::CoolingDown(left));
        }
        self.cool_down_until = None;

        let mut result = self.cycle().await;
        if let Err(e) = &result
            && e.is_transient()
        {
            info!("transient failure, retrying once: {e}");
            result = self.cycle().await;
        }

        match result {
            Ok(snapshot) => {
                self.snapshot = snapshot;
                self.last_update_success = true;
                self.last_updated = Some(Utc::now());
                self.consecutive_failures = 0;
                Ok(&self.snapshot)
            }
            Err(e) => {
                self.last_update_success = false;
                self.consecutive_failures += 1;
                warn!(failures = self.consecutive_failures, "refresh failed: {e}");
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    self.rebuild();
                }
                Err(e)
            }
        }
    }

    fn rebuild(&mut self) {
        error!(
            failures = self.consecutive_failures,
            cool_down_secs = self.cool_down.as_secs(),
            "repeated failures, recreating WEM Portal engine"
        );
        match (self.factory)(&self.config) {
            Ok(engine) => self.engine = engine,
            Err(e) => error!("could not recreate engine: {e}"),
        }
        self.consecutive_failures = 0;
        self.cool_down_until = Some(Instant::now() + self.cool_down);
    }

    fn writeable_record(&self, device_id: &str, key: &str) -> Result<&EntityRecord> {
        self.snapshot
            .get(device_id)
            .and_then(|d| d.record(key))
            .filter(|r| r.is_writeable() && r.address.is_some())
            .ok_or_else(|| Error::InvalidEntity {
                device_id: device_id.to_string(),
                key: key.to_string(),
            })
    }

    async fn write(&mut self, device_id: &str, key: &str, value: f64) -> Result<()> {
        let record = self.writeable_record(device_id, key)?;
        let parameter_id = record.parameter_id.clone();
        let Some(address) = record.address else {
            return Err(Error::InvalidEntity {
                device_id: device_id.to_string(),
                key: key.to_string(),
            });
        };

        self.engine
            .change_value(device_id, &parameter_id, address, value)
            .await?;

        if let Some(record) = self
            .snapshot
            .get_mut(device_id)
            .and_then(|d| d.records.get_mut(key))
        {
            record.value = Value::Number(value);
        }
        debug!(device = %device_id, key, value, "mirrored written value");
        Ok(())
    }

    /// Sets a number entity. The value must lie within the entity's bounds.
    pub async fn set_number(&mut self, device_id: &str, key: &str, value: f64) -> Result<()> {
        let record = self.writeable_record(device_id, key)?;
        match record.kind {
            EntityKind::Number { min, max, .. } if (min..=max).contains(&value) => {}
            EntityKind::Number { min, max, .. } => {
                return Err(Error::InvalidOption(format!(
                    "{value} outside [{min}, {max}] for {key}"
                )));
            }
            _ => {
                return Err(Error::InvalidEntity {
                    device_id: device_id.to_string(),
                    key: key.to_string(),
                });
            }
        }
        self.write(device_id, key, value).await
    }

    /// Selects an option of a select entity by its display name.
    pub async fn select_option(&mut self, device_id: &str, key: &str, option: &str) -> Result<()> {
        let record = self.writeable_record(device_id, key)?;
        let EntityKind::Select { options } = &record.kind else {
            return Err(Error::InvalidEntity {
                device_id: device_id.to_string(),
                key: key.to_string(),
            });
        };
        let value = options
            .iter()
            .find(|o| o.name == option)
            .map(|o| o.value)
            .ok_or_else(|| Error::InvalidOption(option.to_string()))?;
        self.write(device_id, key, value).await
    }

    pub async fn set_switch(&mut self, device_id: &str, key: &str, on: bool) -> Result<()> {
        let record = self.writeable_record(device_id, key)?;
        if !matches!(record.kind, EntityKind::Switch) {
            return Err(Error::InvalidEntity {
                device_id: device_id.to_string(),
                key: key.to_string(),
            });
        }
        self.write(device_id, key, if on { 1.0 } else { 0.0 }).await
    }
}
