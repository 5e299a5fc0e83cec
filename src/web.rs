use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::normalize::{icon_for_unit, parse_scraped_value, row_key, scraped_unit, section_key};
use crate::protocol::{
    self, COOKIE_SUPPORT_MARKER, WEB_DEFAULT_PATH, WEB_LOGIN_PATH, WEB_PASSWORD_FIELD,
    WEB_USERNAME_FIELD,
};
use crate::session::{WebSession, has_auth_cookie, join};
use crate::types::{EntityKind, EntityRecord};
use crate::{Error, Result};

/// Consecutive failures before the saved cookie is dropped and cycles are skipped.
pub const FAILURE_THRESHOLD: u32 = 3;
const MAX_SKIP_CYCLES: u32 = 12;

/// Result of one scraping attempt.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// Try again on a later cycle.
    Transient(Error),
    /// Retrying will not help (bad credentials, unknown login failure).
    Fatal(Error),
}

pub(crate) struct ScrapeResult {
    pub records: BTreeMap<String, EntityRecord>,
    pub cookie: Option<String>,
}

struct Page {
    url: Url,
    status: StatusCode,
    body: String,
}

impl Page {
    async fn read(resp: reqwest::Response) -> Result<Self> {
        let url = resp.url().clone();
        let status = resp.status();
        let body = resp.text().await?;
        Ok(Self { url, status, body })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Protocol(format!("bad selector {css}: {e}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Form action and pre-filled fields of the login page.
fn parse_login_form(body: &str, page_url: &Url) -> Result<(Url, Vec<(String, String)>)> {
    let doc = Html::parse_document(body);
    let form = doc
        .select(&selector("form")?)
        .next()
        .ok_or_else(|| Error::Protocol("login form not found".into()))?;
    let action = form.value().attr("action").unwrap_or_default();
    let action = page_url
        .join(action)
        .map_err(|e| Error::Protocol(format!("invalid form action {action}: {e}")))?;

    let mut fields = Vec::new();
    let mut submit_seen = false;
    for input in form.select(&selector("input[name]")?) {
        let attrs = input.value();
        let Some(name) = attrs.attr("name") else {
            continue;
        };
        match attrs.attr("type").unwrap_or("text").to_ascii_lowercase().as_str() {
            "submit" if !submit_seen => submit_seen = true,
            "submit" | "button" | "image" | "reset" => continue,
            "checkbox" | "radio" if attrs.attr("checked").is_none() => continue,
            _ => {}
        }
        fields.push((name.to_string(), attrs.attr("value").unwrap_or_default().to_string()));
    }
    Ok((action, fields))
}

fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(n, _)| n == name) {
        Some(field) => field.1 = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}

/// View-state tokens needed to navigate to the "Expert" view.
fn parse_view_state(body: &str) -> Result<(String, String, String)> {
    let doc = Html::parse_document(body);
    let value = |id: &str| -> Result<String> {
        doc.select(&selector(&format!("#{id}"))?)
            .next()
            .and_then(|el| el.value().attr("value"))
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol(format!("{id} missing from dashboard")))
    };
    Ok((
        value("__EVENTVALIDATION")?,
        value("__VIEWSTATE")?,
        value("__ECNPAGEVIEWSTATE")?,
    ))
}

/// Flattens the data panels of the expert view into `section-label` records.
pub(crate) fn parse_expert_page(body: &str) -> Result<BTreeMap<String, EntityRecord>> {
    let doc = Html::parse_document(body);
    let panels = selector("div.RadPanelBar.rpbSimpleData")?;
    let header = selector("span[id$='_HeaderTemplate_lblHeaderText']")?;
    let rows = selector("table.simpleDataTable tr")?;
    let name_cell = selector("span.simpleDataName")?;
    let value_cell = selector("span.simpleDataValue")?;

    let mut out = BTreeMap::new();
    for panel in doc.select(&panels) {
        let Some(section) = panel.select(&header).next().map(text_of) else {
            debug!("skipping data panel without header");
            continue;
        };
        let section = section_key(&section);
        for row in panel.select(&rows) {
            let (Some(name), Some(raw)) = (
                row.select(&name_cell).next().map(text_of),
                row.select(&value_cell).next().map(text_of),
            ) else {
                continue;
            };
            let key = format!("{section}-{}", row_key(&name));
            let (value, unit) = parse_scraped_value(&raw);
            let unit = scraped_unit(&key, unit);
            out.insert(
                key.clone(),
                EntityRecord {
                    parameter_id: key.clone(),
                    friendly_name: key,
                    value,
                    icon: icon_for_unit(&unit),
                    unit,
                    data_type: None,
                    address: None,
                    kind: EntityKind::Sensor,
                },
            );
        }
    }
    Ok(out)
}

/// Drives the web dashboard and keeps the session cookie between polls.
pub(crate) struct Scraper {
    base_url: Url,
    username: String,
    password: String,
    delay: Duration,
    cookie: Option<String>,
    retrying: bool,
    failures: u32,
    skip_cycles: u32,
}

impl Scraper {
    pub fn new(base_url: Url, username: String, password: String, delay: Duration) -> Self {
        Self {
            base_url,
            username,
            password,
            delay,
            cookie: None,
            retrying: false,
            failures: 0,
            skip_cycles: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn skip_cycles(&self) -> u32 {
        self.skip_cycles
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Consumes one pending backoff cycle. Returns `true` if this cycle is skipped.
    pub fn take_skip(&mut self) -> bool {
        if self.skip_cycles > 0 {
            self.skip_cycles -= 1;
            debug!(remaining = self.skip_cycles, "skipping web scraping cycle");
            true
        } else {
            false
        }
    }

    pub async fn scrape(&mut self) -> Outcome<BTreeMap<String, EntityRecord>> {
        match self.run().await {
            Ok(result) => {
                self.failures = 0;
                self.skip_cycles = 0;
                self.retrying = false;
                self.cookie = result.cookie;
                debug!(records = result.records.len(), "web scraping finished");
                Outcome::Success(result.records)
            }
            Err(Error::ExpiredSession) => {
                warn!("web session expired, logging in again next cycle");
                self.cookie = None;
                self.retrying = true;
                Outcome::Transient(Error::ExpiredSession)
            }
            Err(e @ (Error::Auth(_) | Error::UnknownAuth(_))) => {
                self.cookie = None;
                self.retrying = false;
                self.record_failure();
                warn!(failures = self.failures, "web login failed: {e}");
                Outcome::Fatal(e)
            }
            Err(e) => {
                self.record_failure();
                warn!(failures = self.failures, "web scraping failed: {e}");
                Outcome::Transient(e)
            }
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures >= FAILURE_THRESHOLD {
            self.cookie = None;
            self.skip_cycles = self.failures.min(MAX_SKIP_CYCLES);
            warn!(
                failures = self.failures,
                skip = self.skip_cycles,
                "repeated web scraping failures, backing off"
            );
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn run(&self) -> Result<ScrapeResult> {
        let saved = self.cookie.as_deref().filter(|c| has_auth_cookie(c));
        let session = WebSession::new(self.base_url.clone(), saved)?;
        let dashboard = join(&self.base_url, WEB_DEFAULT_PATH)?;

        let page = if saved.is_some() {
            debug!("reusing saved web session");
            Page::read(session.http.get(dashboard.clone()).send().await?).await?
        } else {
            self.login(&session).await?
        };
        self.check_login(&page)?;

        let (validation, view_state, page_view_state) = parse_view_state(&page.body)?;
        self.pause().await;
        let resp = session
            .http
            .post(dashboard)
            .form(&protocol::expert_form(validation, view_state, page_view_state))
            .send()
            .await?;
        let page = Page::read(resp).await?;
        self.check_login(&page)?;

        let records = parse_expert_page(&page.body)?;
        if records.is_empty() {
            return Err(Error::Protocol("expert page contained no data".into()));
        }
        Ok(ScrapeResult {
            records,
            cookie: session.cookie_header(),
        })
    }

    async fn login(&self, session: &WebSession) -> Result<Page> {
        let login_url = join(&self.base_url, WEB_LOGIN_PATH)?;
        debug!(url = %login_url, "logging in to WEM Portal web");
        let resp = session.http.get(login_url).send().await?.error_for_status()?;
        let page = Page::read(resp).await?;

        let (action, mut fields) = parse_login_form(&page.body, &page.url)?;
        set_field(&mut fields, WEB_USERNAME_FIELD, &self.username);
        set_field(&mut fields, WEB_PASSWORD_FIELD, &self.password);

        self.pause().await;
        let resp = session.http.post(action).form(&fields).send().await?;
        Page::read(resp).await
    }

    /// Distinguishes a stale session from a real authentication failure.
    fn check_login(&self, page: &Page) -> Result<()> {
        let on_login_page = page.url.path().eq_ignore_ascii_case(WEB_LOGIN_PATH);
        let cookie_marker = page
            .url
            .query()
            .is_some_and(|q| q.to_ascii_lowercase().contains(COOKIE_SUPPORT_MARKER));

        if on_login_page && cookie_marker {
            return Err(Error::Auth("portal rejected the web login".into()));
        }
        if on_login_page && !self.retrying {
            return Err(Error::ExpiredSession);
        }
        if on_login_page {
            return Err(Error::Auth("still on the login page after a fresh login".into()));
        }
        if page.status != StatusCode::OK {
            return Err(Error::UnknownAuth(format!(
                "web portal returned HTTP {}",
                page.status.as_u16()
            )));
        }
        Ok(())
    }
}
