use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::api::{ApiClient, ApiRecord, ModuleCatalog};
use crate::config::{Config, Mode};
use crate::diff::diff_devices;
use crate::fuzzy::{FuzzyMatcher, Levenshtein, Similarity};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::session::ApiSession;
use crate::types::{CONNECTED, Device, EntityKind, EntityRecord, Event, ModuleAddress, Snapshot};
use crate::web::{Outcome, Scraper};
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&Snapshot) + Send + Sync>;

/// Slack applied to the scrape cadence so a scheduler tick landing just
/// before the interval still scrapes.
const SCRAPE_GRACE: Duration = Duration::from_secs(10);

/// Device id used for scraped data before the API has named a device.
const FALLBACK_DEVICE_ID: &str = "0";

pub struct WemPortalBuilder {
    config: Config,
    similarity: Option<Box<dyn Similarity>>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl WemPortalBuilder {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::from_config(Config::new(username, password))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            similarity: None,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.config.scan_interval = interval;
        self
    }

    pub fn api_scan_interval(mut self, interval: Duration) -> Self {
        self.config.api_scan_interval = interval;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Pause inserted before every upstream request.
    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn fuzzy_threshold(mut self, threshold: u8) -> Self {
        self.config.fuzzy_threshold = threshold;
        self
    }

    /// Replaces the label similarity scorer used to match API parameters to
    /// scraped names.
    pub fn similarity(mut self, similarity: impl Similarity + 'static) -> Self {
        self.similarity = Some(Box::new(similarity));
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&Snapshot) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<WemPortal> {
        let config = self.config;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Protocol(format!("invalid base URL {}: {e}", config.base_url)))?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        let session = ApiSession::new(
            base_url.clone(),
            config.username.clone(),
            config.password.clone(),
        );
        let api = ApiClient::new(
            session,
            base_url.clone(),
            config.request_delay,
            config.language.clone(),
            logger,
        );
        let scraper = Scraper::new(
            base_url,
            config.username.clone(),
            config.password.clone(),
            config.request_delay,
        );
        let similarity = self.similarity.unwrap_or_else(|| Box::new(Levenshtein));
        let fuzzy = FuzzyMatcher::new(config.fuzzy_threshold, similarity);

        debug!(mode = config.mode.as_str(), "WEM Portal engine ready");
        Ok(WemPortal {
            config,
            api,
            scraper,
            fuzzy,
            devices: Snapshot::new(),
            scraped_names: Vec::new(),
            last_scrape: None,
            scraped_once: false,
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
        })
    }
}

/// One configured WEM Portal account: sessions, discovery catalogs, the
/// fuzzy name cache and the merged per-device records.
///
/// Every entry point takes `&mut self`, so cycles on one instance never
/// overlap.
pub struct WemPortal {
    config: Config,
    api: ApiClient,
    scraper: Scraper,
    fuzzy: FuzzyMatcher,
    devices: Snapshot,
    scraped_names: Vec<String>,
    last_scrape: Option<Instant>,
    scraped_once: bool,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl WemPortal {
    pub fn builder(username: impl Into<String>, password: impl Into<String>) -> WemPortalBuilder {
        WemPortalBuilder::new(username, password)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        WemPortalBuilder::from_config(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data(&self) -> &Snapshot {
        &self.devices
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// Module catalog discovered for a device through the API.
    pub fn modules(&self, device_id: &str) -> Option<&ModuleCatalog> {
        self.api.catalog(device_id)
    }

    /// Scraped names an API parameter has been mapped to, once resolved.
    pub fn fuzzy_matches(&self, parameter_id: &str) -> Option<&[String]> {
        self.fuzzy.get(parameter_id)
    }

    pub fn has_api_session(&self) -> bool {
        self.api.has_session()
    }

    pub fn scrape_failures(&self) -> u32 {
        self.scraper.failures()
    }

    pub fn pending_scrape_skips(&self) -> u32 {
        self.scraper.skip_cycles()
    }

    /// Saved web session cookie, reused by the next scrape.
    pub fn web_cookie(&self) -> Option<&str> {
        self.scraper.cookie()
    }

    /// Runs one poll cycle. Any failure is reported as [`Error::Fetch`].
    pub async fn fetch_data(&mut self) -> Result<&Snapshot> {
        let cycle = Uuid::new_v4().to_string();
        let previous = self.devices.clone();

        if let Err(e) = self.run_cycle(&cycle).await {
            warn!(cycle = %cycle, "fetch cycle failed: {e}");
            if let Some(logger) = self.api.logger.as_mut() {
                logger.log_failure(&cycle, &e.to_string());
            }
            return Err(Error::fetch(e));
        }

        self.publish(&cycle, &previous);
        Ok(&self.devices)
    }

    async fn run_cycle(&mut self, cycle: &str) -> Result<()> {
        let mode = self.config.mode;
        debug!(cycle, mode = mode.as_str(), "starting fetch cycle");

        if mode.uses_api() {
            self.discover().await?;
        }
        if mode.uses_web() && self.scrape_due() && !self.scraper.take_skip() {
            match self.scrape().await {
                Outcome::Success(()) => {}
                Outcome::Transient(e) if mode == Mode::Both => {
                    warn!(cycle, "web scraping failed, continuing with API data: {e}");
                }
                // Web mode has no other source to fall back on.
                Outcome::Transient(e) | Outcome::Fatal(e) => return Err(e),
            }
        }
        match mode {
            Mode::Api => self.refresh_api(false).await?,
            Mode::Both if self.scraped_once => self.refresh_api(true).await?,
            Mode::Both => debug!(cycle, "no successful scrape yet, skipping API values"),
            Mode::Web => {}
        }
        debug!(cycle, devices = self.devices.len(), "fetch cycle finished");
        Ok(())
    }

    async fn discover(&mut self) -> Result<()> {
        self.api.ensure_session().await?;
        self.api.get_devices(&mut self.devices).await?;
        self.api.get_parameters(&self.devices).await
    }

    fn scrape_due(&self) -> bool {
        self.last_scrape
            .is_none_or(|at| at.elapsed() + SCRAPE_GRACE >= self.config.scan_interval)
    }

    /// Device scraped data is attached to.
    fn primary_device_id(&self) -> String {
        self.api
            .primary_device()
            .or_else(|| self.devices.keys().next().map(String::as_str))
            .unwrap_or(FALLBACK_DEVICE_ID)
            .to_string()
    }

    async fn scrape(&mut self) -> Outcome<()> {
        let records = match self.scraper.scrape().await {
            Outcome::Success(records) => records,
            Outcome::Transient(e) => return Outcome::Transient(e),
            Outcome::Fatal(e) => return Outcome::Fatal(e),
        };

        let device_id = self.primary_device_id();
        self.scraped_names = records.keys().cloned().collect();
        self.last_scrape = Some(Instant::now());
        self.scraped_once = true;
        self.devices
            .entry(device_id.clone())
            .or_insert_with(|| Device::new(device_id, CONNECTED))
            .records = records;
        Outcome::Success(())
    }

    /// Reads API values into the snapshot. With `merge`, read-only values
    /// of the scraped device are routed to their fuzzy-matched names.
    async fn refresh_api(&mut self, merge: bool) -> Result<()> {
        let data = self.api.get_data(&self.devices).await?;
        let primary = self.primary_device_id();

        for (device_id, records) in data {
            let merge = merge && device_id == primary;
            let Some(device) = self.devices.get_mut(&device_id) else {
                continue;
            };
            for ApiRecord { key, record } in records {
                if !merge || record.is_writeable() {
                    device.records.insert(key, record);
                    continue;
                }
                let names = self.fuzzy.resolve(
                    &record.parameter_id,
                    &record.friendly_name,
                    self.scraped_names.iter().map(String::as_str),
                );
                for name in names {
                    apply_match(&mut device.records, name, &record);
                }
            }
        }
        Ok(())
    }

    fn publish(&mut self, cycle: &str, previous: &Snapshot) {
        let events = diff_devices(previous, &self.devices);
        debug!(cycle, events = events.len(), "publishing snapshot");
        for event in &events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        for cb in &self.snapshot_callbacks {
            cb(&self.devices);
        }
        if let Some(logger) = self.api.logger.as_mut() {
            match serde_json::to_value(&self.devices) {
                Ok(body) => logger.log_snapshot(cycle, &body),
                Err(e) => warn!(cycle, "could not serialise snapshot: {e}"),
            }
        }
    }

    /// Writes one parameter and mirrors the value into every record backed
    /// by it once the portal accepted the write.
    pub async fn change_value(
        &mut self,
        device_id: &str,
        parameter_id: &str,
        address: ModuleAddress,
        value: f64,
    ) -> Result<()> {
        self.api
            .change_value(device_id, parameter_id, address, value)
            .await?;
        if let Some(device) = self.devices.get_mut(device_id) {
            device
                .records
                .values_mut()
                .filter(|r| r.parameter_id == parameter_id && r.address == Some(address))
                .for_each(|r| r.value = crate::types::Value::Number(value));
        }
        Ok(())
    }
}

/// Copies an API reading onto a scraped name as a plain sensor.
fn apply_match(records: &mut BTreeMap<String, EntityRecord>, name: &str, api: &EntityRecord) {
    match records.get_mut(name) {
        Some(existing) => {
            existing.value = api.value.clone();
            existing.unit = api.unit.clone();
            existing.icon = api.icon;
            existing.kind = EntityKind::Sensor;
        }
        None => {
            records.insert(
                name.to_string(),
                EntityRecord {
                    kind: EntityKind::Sensor,
                    ..api.clone()
                },
            );
        }
    }
}
