#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use wemportal::{Config, Mode, WemPortal, WemPortalBuilder};
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const USER: &str = "user@example.com";
pub const PASSWORD: &str = "hunter2";

pub fn builder(server: &MockServer, mode: Mode) -> WemPortalBuilder {
    WemPortal::builder(USER, PASSWORD)
        .base_url(server.uri())
        .mode(mode)
        .request_delay(Duration::ZERO)
}

pub fn config(server: &MockServer, mode: Mode) -> Config {
    let mut config = Config::new(USER, PASSWORD);
    config.base_url = server.uri();
    config.mode = mode;
    config.request_delay = Duration::ZERO;
    config
}

pub fn api_login(status: u16) -> Mock {
    Mock::given(method("POST"))
        .and(path("/app/Account/Login"))
        .and(body_string_contains("AppID=com.weishaupt.wemapp"))
        .respond_with(ResponseTemplate::new(status).set_body_string("{}"))
}

pub fn devices(modules: Value) -> Mock {
    Mock::given(method("GET"))
        .and(path("/app/device/Read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Devices": [{ "ID": "42", "ConnectionStatus": 0, "Modules": modules }]
        })))
}

pub fn parameters(index: i64, parameters: Value) -> Mock {
    Mock::given(method("POST"))
        .and(path("/app/EventType/Read"))
        .and(body_partial_json(json!({ "DeviceID": "42", "ModuleIndex": index })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Parameters": parameters })))
}

pub fn refresh() -> Mock {
    Mock::given(method("POST"))
        .and(path("/app/DataAccess/Refresh"))
        .respond_with(ResponseTemplate::new(200))
}

pub fn read(modules: Value) -> Mock {
    Mock::given(method("POST"))
        .and(path("/app/DataAccess/Read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Modules": modules })))
}

/// One heating module with a writeable flow setpoint and a power sensor.
pub async fn mount_heating_api(server: &MockServer) {
    api_login(200).mount(server).await;
    devices(json!([{ "Index": 0, "Type": 1, "Name": "Heating" }]))
        .mount(server)
        .await;
    parameters(
        0,
        json!([
            { "ParameterID": "Vorlauf", "IsWriteable": true, "DataType": -1,
              "MinValue": 10, "MaxValue": 30, "EnumValues": null },
            { "ParameterID": "Leistung", "IsWriteable": false, "DataType": 0,
              "MinValue": 0, "MaxValue": 100 },
            { "ParameterID": "Zeitprogramm", "IsWriteable": true, "DataType": 2 }
        ]),
    )
    .mount(server)
    .await;
    refresh().mount(server).await;
    read(json!([{
        "ModuleIndex": 0, "ModuleType": 1,
        "Values": [
            { "ParameterID": "Vorlauf", "NumericValue": 21.5, "StringValue": "21,5", "Unit": "°C" },
            { "ParameterID": "Leistung", "NumericValue": 3.0, "StringValue": "3", "Unit": "kW (W)" },
            { "ParameterID": "Zeitprogramm", "NumericValue": 0.0, "StringValue": "06:00", "Unit": "" }
        ]
    }]))
    .mount(server)
    .await;
}

pub const LOGIN_PAGE: &str = r#"<html><body>
<form method="post" action="./Login.aspx" id="aspnetForm">
  <input type="hidden" name="__VIEWSTATE" value="vs-login" />
  <input type="text" name="ctl00$content$tbxUserName" value="" />
  <input type="password" name="ctl00$content$tbxPassword" value="" />
  <input type="submit" name="ctl00$content$btnLogin" value="Login" />
</form></body></html>"#;

pub const DASHBOARD_PAGE: &str = r#"<html><body><form>
<input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="ev-token" />
<input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="vs-token" />
<input type="hidden" name="__ECNPAGEVIEWSTATE" id="__ECNPAGEVIEWSTATE" value="pvs-token" />
</form></body></html>"#;

pub const EXPERT_PAGE: &str = r#"<html><body>
<div class="RadPanelBar RadPanelBar_Default rpbSimpleData">
  <span id="ctl00_rdMain_C_rpbGroupData_i0_HeaderTemplate_lblHeaderText">Heat pump</span>
  <table class="simpleDataTable">
    <tr><td><span class="simpleDataName">Outside OAT</span></td><td><span class="simpleDataValue">4,9 °C</span></td></tr>
    <tr><td><span class="simpleDataName">Power demand</span></td><td><span class="simpleDataValue">45 W</span></td></tr>
    <tr><td><span class="simpleDataName">Operating mode</span></td><td><span class="simpleDataValue">Heizbetrieb</span></td></tr>
  </table>
</div>
</body></html>"#;

pub fn login_page() -> Mock {
    Mock::given(method("GET"))
        .and(path("/Web/Login.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
}

/// Accepted web login: redirect to the dashboard with the auth cookie.
pub fn web_login_ok() -> Mock {
    Mock::given(method("POST"))
        .and(path("/Web/Login.aspx"))
        .and(body_string_contains("tbxUserName=user%40example.com"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/Web/Default.aspx")
                .insert_header("Set-Cookie", ".ASPXAUTH=abc123; path=/"),
        )
}

pub fn dashboard() -> Mock {
    Mock::given(method("GET"))
        .and(path("/Web/Default.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DASHBOARD_PAGE))
}

pub fn expert_view() -> Mock {
    Mock::given(method("POST"))
        .and(path("/Web/Default.aspx"))
        .and(body_string_contains("__EVENTARGUMENT=3"))
        .and(body_string_contains("__VIEWSTATE=vs-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EXPERT_PAGE))
}
