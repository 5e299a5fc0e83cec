use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::protocol::{
    self, API_USER_AGENT, API_VERSION, AUTH_COOKIE, BROWSER_USER_AGENT, LOGIN_PATH,
};
use crate::{Error, Result};

pub(crate) fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| Error::Protocol(format!("invalid URL {base}{path}: {e}")))
}

fn api_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(API_USER_AGENT));
    headers.insert("x-api-version", HeaderValue::from_static(API_VERSION));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(protocol::ACCEPT_LANGUAGE));
    headers
}

/// Login failure classification by HTTP status.
pub(crate) fn classify_login_failure(status: StatusCode, details: String) -> Error {
    let message = if details.is_empty() {
        format!("login returned HTTP {}", status.as_u16())
    } else {
        details
    };
    match status.as_u16() {
        400 => Error::Auth(message),
        403 => Error::Forbidden(message),
        500..=599 => Error::Server(message),
        _ => Error::UnknownAuth(message),
    }
}

/// Cookie session for the mobile JSON API.
pub(crate) struct ApiSession {
    base_url: Url,
    username: String,
    password: String,
    http: Option<Client>,
}

impl ApiSession {
    pub fn new(base_url: Url, username: String, password: String) -> Self {
        Self {
            base_url,
            username,
            password,
            http: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.http.is_some()
    }

    /// Logs in with a fresh cookie jar. The previous session is dropped first,
    /// so a failed login leaves the session invalid.
    pub async fn login(&mut self) -> Result<&Client> {
        self.http = None;
        let http = Client::builder()
            .cookie_store(true)
            .default_headers(api_headers())
            .build()?;

        let url = join(&self.base_url, LOGIN_PATH)?;
        debug!(url = %url, "logging in to WEM Portal API");
        let resp = http
            .post(url)
            .form(&protocol::login_form(&self.username, &self.password))
            .send()
            .await
            .map_err(|e| Error::UnknownAuth(format!("no response from login: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = classify_login_failure(status, protocol::response_details(&body));
            warn!(status = status.as_u16(), "API login failed: {err}");
            return Err(err);
        }

        debug!("API login successful");
        Ok(self.http.insert(http))
    }

    pub async fn ensure(&mut self) -> Result<&Client> {
        if self.http.is_none() {
            self.login().await?;
        }
        match self.http.as_ref() {
            Some(http) => Ok(http),
            None => Err(Error::UnknownAuth("session unavailable after login".into())),
        }
    }
}

/// Browser-like session for the web dashboard, with its own cookie jar.
pub(crate) struct WebSession {
    pub http: Client,
    jar: Arc<Jar>,
    base_url: Url,
}

impl WebSession {
    /// Starts a session, seeding the jar with a previously saved cookie header.
    pub fn new(base_url: Url, saved_cookie: Option<&str>) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        if let Some(cookie) = saved_cookie {
            for pair in cookie.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                jar.add_cookie_str(pair, &base_url);
            }
        }
        let http = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .default_headers(browser_headers())
            .build()?;
        Ok(Self { http, jar, base_url })
    }

    /// Current cookie header for the portal, for persisting across polls.
    pub fn cookie_header(&self) -> Option<String> {
        self.jar
            .cookies(&self.base_url)
            .and_then(|v| v.to_str().ok().map(str::to_string))
    }
}

pub(crate) fn has_auth_cookie(cookie: &str) -> bool {
    cookie
        .split(';')
        .any(|pair| pair.trim().split('=').next() == Some(AUTH_COOKIE))
}
