use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::normalize::parse_api_string;
use crate::types::{DataType, EntityKind, ModuleAddress, SelectOption};

pub const API_VERSION: &str = "2.0.0.0";
pub const APP_ID: &str = "com.weishaupt.wemapp";
pub const APP_VERSION: &str = "2.0.2";
pub const CLIENT_OS: &str = "Android";
pub const API_USER_AGENT: &str = "WeishauptWEMApp";
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

pub const LOGIN_PATH: &str = "/app/Account/Login";
pub const DEVICES_PATH: &str = "/app/device/Read";
pub const PARAMETERS_PATH: &str = "/app/EventType/Read";
pub const REFRESH_PATH: &str = "/app/DataAccess/Refresh";
pub const READ_PATH: &str = "/app/DataAccess/Read";
pub const WRITE_PATH: &str = "/app/DataAccess/Write";

pub const WEB_LOGIN_PATH: &str = "/Web/Login.aspx";
pub const WEB_DEFAULT_PATH: &str = "/Web/Default.aspx";
pub const AUTH_COOKIE: &str = ".ASPXAUTH";
pub const COOKIE_SUPPORT_MARKER: &str = "aspxautodetectcookiesupport";

pub const WEB_USERNAME_FIELD: &str = "ctl00$content$tbxUserName";
pub const WEB_PASSWORD_FIELD: &str = "ctl00$content$tbxPassword";

const EXPERT_EVENT_TARGET: &str = "ctl00$SubMenuControl1$subMenu";
const EXPERT_EVENT_ARGUMENT: &str = "3";
const MAIN_CLIENT_STATE: &str = r#"{"Top":0,"Left":0,"DockZoneID":"ctl00_RDZParent","Collapsed":false,"Pinned":false,"Resizable":false,"Closed":false,"Width":"99%","Height":null,"ExpandedHeight":0,"Index":0,"IsDragged":false}"#;
const SUBMENU_CLIENT_STATE: &str = r#"{"logEntries":[{"Type":3},{"Type":1,"Index":"0","Data":{"text":"Overview","value":"110"}},{"Type":1,"Index":"1","Data":{"text":"System:+dom","value":""}},{"Type":1,"Index":"2","Data":{"text":"User","value":"222"}},{"Type":1,"Index":"3","Data":{"text":"Expert","value":"223","selected":true}},{"Type":1,"Index":"4","Data":{"text":"Statistics","value":"225"}},{"Type":1,"Index":"5","Data":{"text":"Data+Loggers","value":"224"}}],"selectedItemIndex":"3"}"#;

/// Form body for the mobile API login.
pub fn login_form<'a>(username: &'a str, password: &'a str) -> [(&'static str, &'a str); 5] {
    [
        ("Name", username),
        ("PasswordUTF8", password),
        ("AppID", APP_ID),
        ("AppVersion", APP_VERSION),
        ("ClientOS", CLIENT_OS),
    ]
}

pub fn parameters_request(device_id: &str, address: ModuleAddress) -> Value {
    json!({
        "DeviceID": device_id,
        "ModuleIndex": address.index,
        "ModuleType": address.module_type,
    })
}

/// Body shared by the refresh and read calls.
pub fn data_request<'a, I, P>(device_id: &str, modules: I) -> Value
where
    I: IntoIterator<Item = (ModuleAddress, P)>,
    P: IntoIterator<Item = &'a str>,
{
    let modules: Vec<Value> = modules
        .into_iter()
        .map(|(address, parameters)| {
            let parameters: Vec<Value> = parameters
                .into_iter()
                .map(|id| json!({ "ParameterID": id }))
                .collect();
            json!({
                "ModuleIndex": address.index,
                "ModuleType": address.module_type,
                "Parameters": parameters,
            })
        })
        .collect();
    json!({ "DeviceID": device_id, "Modules": modules })
}

pub fn write_request(
    device_id: &str,
    parameter_id: &str,
    address: ModuleAddress,
    value: f64,
) -> Value {
    json!({
        "DeviceID": device_id,
        "Modules": [{
            "ModuleIndex": address.index,
            "ModuleType": address.module_type,
            "Parameters": [{
                "ParameterID": parameter_id,
                "NumericValue": value,
                "StringValue": value.to_string(),
            }]
        }]
    })
}

/// Hidden fields that simulate a click on the "Expert" sub menu entry.
pub fn expert_form(
    event_validation: String,
    view_state: String,
    page_view_state: String,
) -> Vec<(String, String)> {
    vec![
        ("__EVENTVALIDATION".into(), event_validation),
        ("__VIEWSTATE".into(), view_state),
        ("__ECNPAGEVIEWSTATE".into(), page_view_state),
        ("__EVENTTARGET".into(), EXPERT_EVENT_TARGET.into()),
        ("__EVENTARGUMENT".into(), EXPERT_EVENT_ARGUMENT.into()),
        ("ctl00_rdMain_ClientState".into(), MAIN_CLIENT_STATE.into()),
        (
            "ctl00_SubMenuControl1_subMenu_ClientState".into(),
            SUBMENU_CLIENT_STATE.into(),
        ),
    ]
}

/// `Status`/`Message` pair the portal puts in error bodies.
pub fn response_details(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return String::new();
    };
    let status = parsed.get("Status").map(|v| v.to_string()).unwrap_or_default();
    let message = parsed
        .get("Message")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    match (status.is_empty(), message.is_empty()) {
        (true, true) => String::new(),
        (false, true) => format!("status {status}"),
        (true, false) => message.to_string(),
        (false, false) => format!("status {status}: {message}"),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleInfo {
    pub index: i64,
    #[serde(rename = "Type")]
    pub module_type: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    #[serde(rename = "ID", deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub connection_status: i64,
    #[serde(default)]
    pub modules: Vec<ModuleInfo>,
}

fn id_string<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected device id: {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumValue {
    pub name: String,
    pub value: f64,
}

/// One entry of a module's parameter catalog.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterDef {
    #[serde(rename = "ParameterID")]
    pub parameter_id: String,
    #[serde(default)]
    pub is_writeable: bool,
    #[serde(default)]
    pub data_type: i64,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub enum_values: Vec<EnumValue>,
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

impl ParameterDef {
    pub fn data_type(&self) -> DataType {
        DataType::from_vendor(self.data_type)
    }

    /// Platform classification. `None` means the parameter is never exposed.
    pub fn kind(&self) -> Option<EntityKind> {
        let data_type = self.data_type();
        if data_type == DataType::Schedule {
            return None;
        }
        if !self.is_writeable {
            return Some(EntityKind::Sensor);
        }
        if self.min_value == Some(0.0) && self.max_value == Some(1.0) {
            return Some(EntityKind::Switch);
        }
        if !self.enum_values.is_empty() {
            let mut options: Vec<SelectOption> = Vec::with_capacity(self.enum_values.len());
            for entry in &self.enum_values {
                if options.iter().any(|o| o.value == entry.value || o.name == entry.name) {
                    continue;
                }
                options.push(SelectOption {
                    value: entry.value,
                    name: entry.name.clone(),
                });
            }
            return Some(EntityKind::Select { options });
        }
        if self.min_value.is_none() || self.max_value.is_none() {
            debug!(parameter = %self.parameter_id, "writeable parameter with open bounds");
        }
        Some(EntityKind::Number {
            min: self.min_value.unwrap_or(f64::MIN),
            max: self.max_value.unwrap_or(f64::MAX),
            step: data_type.step(),
        })
    }
}

/// One value of a `DataAccess/Read` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reading {
    #[serde(rename = "ParameterID")]
    pub parameter_id: String,
    #[serde(default)]
    pub numeric_value: Option<f64>,
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl Reading {
    /// A zero/absent numeric value defers to the string value.
    pub fn value(&self) -> Option<crate::types::Value> {
        use crate::types::Value as V;
        match (self.numeric_value, self.string_value.as_deref()) {
            (Some(n), _) if n != 0.0 => Some(V::Number(n)),
            (_, Some(s)) if !s.trim().is_empty() => Some(parse_api_string(s)),
            (Some(n), _) => Some(V::Number(n)),
            (None, _) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleReadings {
    pub address: ModuleAddress,
    pub values: Vec<Reading>,
}

/// Deserializes each array entry on its own so one malformed item is skipped
/// instead of failing the whole payload.
fn lenient_list<T: for<'de> Deserialize<'de>>(items: Option<&Value>, what: &str) -> Vec<T> {
    let Some(Value::Array(items)) = items else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(error = %e, "skipping malformed {what}");
                None
            }
        })
        .collect()
}

pub fn parse_devices(body: &Value) -> Vec<DeviceInfo> {
    lenient_list(body.get("Devices"), "device")
}

pub fn parse_parameters(body: &Value) -> Vec<ParameterDef> {
    lenient_list(body.get("Parameters"), "parameter")
}

pub fn parse_readings(body: &Value) -> Vec<ModuleReadings> {
    let Some(Value::Array(modules)) = body.get("Modules") else {
        return Vec::new();
    };
    modules
        .iter()
        .filter_map(|module| {
            let index = module.get("ModuleIndex")?.as_i64()?;
            let module_type = module.get("ModuleType")?.as_i64()?;
            Some(ModuleReadings {
                address: ModuleAddress { index, module_type },
                values: lenient_list(module.get("Values"), "value"),
            })
        })
        .collect()
}
