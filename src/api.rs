use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::logger::MessageLogger;
use crate::normalize::{friendly_name, icon_for_unit, normalize_unit, section_key};
use crate::protocol::{
    self, DEVICES_PATH, ModuleReadings, PARAMETERS_PATH, ParameterDef, READ_PATH, REFRESH_PATH,
    WRITE_PATH,
};
use crate::session::{ApiSession, join};
use crate::types::{CONNECTED, Device, EntityRecord, ModuleAddress, Snapshot};
use crate::{Error, Result};

/// A device module and its lazily fetched parameter catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub parameters: Option<BTreeMap<String, ParameterDef>>,
}

impl Module {
    fn needs_parameters(&self) -> bool {
        self.parameters.as_ref().is_none_or(BTreeMap::is_empty)
    }
}

pub type ModuleCatalog = BTreeMap<ModuleAddress, Module>;

/// A classified API reading, keyed by module and friendly name.
#[derive(Debug, Clone)]
pub(crate) struct ApiRecord {
    pub key: String,
    pub record: EntityRecord,
}

fn status_error(status: StatusCode, details: String) -> Error {
    let message = if details.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        details
    };
    match status.as_u16() {
        403 => Error::Forbidden(message),
        500..=599 => Error::Server(message),
        s => Error::Api { status: s, message },
    }
}

pub(crate) struct ApiClient {
    session: ApiSession,
    base_url: Url,
    delay: Duration,
    language: String,
    pub(crate) logger: Option<MessageLogger>,
    catalogs: BTreeMap<String, ModuleCatalog>,
    primary: Option<String>,
    discovered: bool,
}

impl ApiClient {
    pub fn new(
        session: ApiSession,
        base_url: Url,
        delay: Duration,
        language: String,
        logger: Option<MessageLogger>,
    ) -> Self {
        Self {
            session,
            base_url,
            delay,
            language,
            logger,
            catalogs: BTreeMap::new(),
            primary: None,
            discovered: false,
        }
    }

    pub async fn ensure_session(&mut self) -> Result<()> {
        self.session.ensure().await.map(|_| ())
    }

    pub fn has_session(&self) -> bool {
        self.session.is_valid()
    }

    pub fn catalog(&self, device_id: &str) -> Option<&ModuleCatalog> {
        self.catalogs.get(device_id)
    }

    /// First connected device in the order the portal listed them.
    pub fn primary_device(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    /// Issues one API request. A 401/403 answer triggers exactly one
    /// re-login and retry; the second answer is final.
    async fn call(&mut self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = join(&self.base_url, path)?;
        let mut relogged = false;
        loop {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(ref mut logger) = self.logger {
                logger.log_request(method.as_str(), path, body);
            }

            let http = self.session.ensure().await?;
            let mut req = http.request(method.clone(), url.clone());
            if let Some(body) = body {
                req = req.json(body);
            }
            let resp = req.send().await?;
            let status = resp.status();

            if status.is_success() {
                let text = resp.text().await?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text)
                    .map_err(|e| Error::Protocol(format!("invalid JSON from {path}: {e}")));
            }

            let text = resp.text().await.unwrap_or_default();
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) && !relogged {
                debug!(status = status.as_u16(), path, "session rejected, logging in again");
                relogged = true;
                self.session.login().await?;
                continue;
            }
            return Err(status_error(status, protocol::response_details(&text)));
        }
    }

    /// Lists devices and their modules. Only the first successful call does
    /// any work; later calls keep the cached catalog.
    pub async fn get_devices(&mut self, devices: &mut Snapshot) -> Result<()> {
        if self.discovered {
            return Ok(());
        }
        debug!("fetching API device data");
        let body = self.call(Method::GET, DEVICES_PATH, None).await?;
        let infos = protocol::parse_devices(&body);
        if infos.is_empty() {
            return Err(Error::Protocol("device list is empty".into()));
        }

        self.catalogs.clear();
        self.primary = infos
            .iter()
            .find(|info| info.connection_status == CONNECTED)
            .map(|info| info.id.clone());
        for info in infos {
            let device = devices
                .entry(info.id.clone())
                .or_insert_with(|| Device::new(info.id.clone(), info.connection_status));
            device.connection_status = info.connection_status;

            let catalog: ModuleCatalog = info
                .modules
                .into_iter()
                .map(|m| {
                    let address = ModuleAddress {
                        index: m.index,
                        module_type: m.module_type,
                    };
                    (address, Module { name: m.name, parameters: None })
                })
                .collect();
            debug!(device = %info.id, modules = catalog.len(), "discovered device");
            self.catalogs.insert(info.id, catalog);
        }
        self.discovered = true;
        Ok(())
    }

    fn polled_devices(&self, devices: &Snapshot) -> Vec<String> {
        self.catalogs
            .keys()
            .filter(|id| devices.get(*id).is_some_and(Device::is_connected))
            .cloned()
            .collect()
    }

    /// Fetches parameter catalogs for modules that do not have one yet.
    pub async fn get_parameters(&mut self, devices: &Snapshot) -> Result<()> {
        for device_id in self.polled_devices(devices) {
            let pending: Vec<ModuleAddress> = self
                .catalogs
                .get(&device_id)
                .map(|c| {
                    c.iter()
                        .filter(|(_, m)| m.needs_parameters())
                        .map(|(a, _)| *a)
                        .collect()
                })
                .unwrap_or_default();
            if pending.is_empty() {
                continue;
            }
            debug!(device = %device_id, modules = pending.len(), "fetching API parameters");

            for address in pending {
                let request = protocol::parameters_request(&device_id, address);
                let parameters = match self.call(Method::POST, PARAMETERS_PATH, Some(&request)).await
                {
                    Ok(body) => protocol::parse_parameters(&body),
                    Err(Error::Forbidden(message) | Error::Api { status: 400, message }) => {
                        warn!(device = %device_id, ?address, "dropping module, parameters refused: {message}");
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                };

                let Some(catalog) = self.catalogs.get_mut(&device_id) else {
                    continue;
                };
                if parameters.is_empty() {
                    debug!(device = %device_id, ?address, "module has no parameters");
                    catalog.remove(&address);
                } else if let Some(module) = catalog.get_mut(&address) {
                    module.parameters = Some(
                        parameters
                            .into_iter()
                            .map(|p| (p.parameter_id.clone(), p))
                            .collect(),
                    );
                }
            }

            if self.catalogs.get(&device_id).is_some_and(BTreeMap::is_empty) {
                warn!(device = %device_id, "device exposes no parameters, it will not be polled");
                self.catalogs.remove(&device_id);
            }
        }
        Ok(())
    }

    /// Asks the portal to refresh every catalogued parameter, then reads
    /// and classifies the values.
    pub async fn get_data(&mut self, devices: &Snapshot) -> Result<BTreeMap<String, Vec<ApiRecord>>> {
        let mut out = BTreeMap::new();
        for device_id in self.polled_devices(devices) {
            let Some(catalog) = self.catalogs.get(&device_id) else {
                continue;
            };
            let modules: Vec<(ModuleAddress, Vec<&str>)> = catalog
                .iter()
                .filter_map(|(address, module)| {
                    let parameters = module.parameters.as_ref()?;
                    Some((*address, parameters.keys().map(String::as_str).collect()))
                })
                .collect();
            if modules.is_empty() {
                continue;
            }
            let request = protocol::data_request(&device_id, modules);

            debug!(device = %device_id, "refreshing API data");
            self.call(Method::POST, REFRESH_PATH, Some(&request)).await?;
            let body = self.call(Method::POST, READ_PATH, Some(&request)).await?;
            let records = self.classify(&device_id, protocol::parse_readings(&body));
            debug!(device = %device_id, records = records.len(), "read API values");
            out.insert(device_id, records);
        }
        Ok(out)
    }

    fn classify(&self, device_id: &str, readings: Vec<ModuleReadings>) -> Vec<ApiRecord> {
        let Some(catalog) = self.catalogs.get(device_id) else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for module in readings {
            let Some((info, parameters)) = catalog
                .get(&module.address)
                .and_then(|m| m.parameters.as_ref().map(|p| (m, p)))
            else {
                debug!(address = ?module.address, "reading for unknown module");
                continue;
            };

            for reading in module.values {
                let Some(def) = parameters.get(&reading.parameter_id) else {
                    debug!(parameter = %reading.parameter_id, "reading for unknown parameter");
                    continue;
                };
                let Some(kind) = def.kind() else {
                    continue;
                };
                let Some(value) = reading.value() else {
                    debug!(parameter = %reading.parameter_id, "reading without value");
                    continue;
                };

                let unit = normalize_unit(reading.unit.as_deref().unwrap_or_default());
                let friendly = friendly_name(&reading.parameter_id, &self.language);
                let key = if info.name.is_empty() {
                    friendly.clone()
                } else {
                    format!("{}-{}", section_key(&info.name), friendly)
                };
                records.push(ApiRecord {
                    key,
                    record: EntityRecord {
                        parameter_id: reading.parameter_id,
                        friendly_name: friendly,
                        value,
                        icon: icon_for_unit(&unit),
                        unit,
                        data_type: Some(def.data_type()),
                        address: Some(module.address),
                        kind,
                    },
                });
            }
        }
        records
    }

    /// Writes one parameter. Any failure left after the single re-login
    /// retry is reported as a parameter change error.
    pub async fn change_value(
        &mut self,
        device_id: &str,
        parameter_id: &str,
        address: ModuleAddress,
        value: f64,
    ) -> Result<()> {
        let request = protocol::write_request(device_id, parameter_id, address, value);
        if let Some(ref mut logger) = self.logger {
            logger.log_write(device_id, parameter_id, &request);
        }
        match self.call(Method::POST, WRITE_PATH, Some(&request)).await {
            Ok(_) => {
                debug!(device = %device_id, parameter = %parameter_id, value, "parameter changed");
                Ok(())
            }
            Err(e) => Err(Error::ParameterChange {
                parameter_id: parameter_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
