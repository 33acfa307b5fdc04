// src/portal/http.rs

//! `reqwest`-backed portal transport with a shared cookie jar.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::config::PortalSection;
use crate::errors::{PunchclockError, Result};
use crate::portal::cookies::Cookie;
use crate::portal::transport::{PortalResponse, PortalTransport};
use crate::types::BoxFuture;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Production transport. Every request shares one cookie jar; `reset`
/// swaps in a fresh jar and client.
pub struct HttpPortal {
    client: Client,
    jar: Arc<Jar>,
    /// Endpoint URLs, used to enumerate and seed cookies per host.
    origins: Vec<Url>,
    user_agent: String,
    timeout: std::time::Duration,
    accept_invalid_certs: bool,
}

impl std::fmt::Debug for HttpPortal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPortal")
            .field("origins", &self.origins)
            .finish_non_exhaustive()
    }
}

impl HttpPortal {
    /// Build a transport for the endpoints in `[portal]`.
    pub fn from_settings(portal: &PortalSection) -> Result<Self> {
        let origins = [
            &portal.login_url,
            &portal.home_url,
            &portal.check_in_url,
            &portal.check_out_url,
        ]
        .into_iter()
        .filter(|u| !u.trim().is_empty())
        .filter_map(|u| Url::parse(u.trim()).ok())
        .collect();

        let user_agent = portal
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let jar = Arc::new(Jar::default());
        let client = build_client(
            jar.clone(),
            &user_agent,
            portal.request_timeout(),
            portal.accept_invalid_certs,
        )?;

        Ok(Self {
            client,
            jar,
            origins,
            user_agent,
            timeout: portal.request_timeout(),
            accept_invalid_certs: portal.accept_invalid_certs,
        })
    }

    fn origin_for(&self, domain: &str) -> Option<&Url> {
        let domain = domain.trim_start_matches('.');
        self.origins
            .iter()
            .find(|u| u.host_str() == Some(domain))
            .or_else(|| self.origins.first())
    }
}

fn build_client(
    jar: Arc<Jar>,
    user_agent: &str,
    timeout: std::time::Duration,
    accept_invalid_certs: bool,
) -> Result<Client> {
    Client::builder()
        .cookie_provider(jar)
        .timeout(timeout)
        .user_agent(user_agent)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(PunchclockError::from)
}

async fn into_response(resp: reqwest::Response) -> Result<PortalResponse> {
    let status = resp.status().as_u16();
    let body = resp.text().await?;
    Ok(PortalResponse { status, body })
}

impl PortalTransport for HttpPortal {
    fn submit_login<'a>(
        &'a mut self,
        url: &'a str,
        form: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<PortalResponse>> {
        let request = self
            .client
            .post(url)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .form(form);

        Box::pin(async move {
            debug!(%url, "submitting login form");
            into_response(request.send().await?).await
        })
    }

    fn fetch_page<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, Result<PortalResponse>> {
        let request = self.client.get(url);
        Box::pin(async move { into_response(request.send().await?).await })
    }

    fn post_action<'a>(
        &'a mut self,
        url: &'a str,
        body: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<PortalResponse>> {
        let request = self
            .client
            .post(url)
            .header(ACCEPT, "application/json, text/plain, */*")
            .header("X-Requested-With", "XMLHttpRequest")
            .json(body);

        Box::pin(async move { into_response(request.send().await?).await })
    }

    fn cookies(&self) -> Vec<Cookie> {
        let mut by_name: BTreeMap<String, Cookie> = BTreeMap::new();
        for origin in &self.origins {
            let Some(header) = self.jar.cookies(origin) else {
                continue;
            };
            let Ok(header) = header.to_str() else {
                continue;
            };
            let domain = origin.host_str().unwrap_or_default();
            for cookie in Cookie::parse_header(header, domain) {
                by_name.entry(cookie.name.clone()).or_insert(cookie);
            }
        }
        by_name.into_values().collect()
    }

    fn set_cookies(&mut self, cookies: &[Cookie]) {
        for cookie in cookies {
            let Some(origin) = self.origin_for(&cookie.domain).cloned() else {
                warn!(cookie = %cookie.name, "no portal URL configured; cannot seed cookie");
                continue;
            };
            let raw = format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path);
            self.jar.add_cookie_str(&raw, &origin);
        }
    }

    fn reset(&mut self) -> Result<()> {
        let jar = Arc::new(Jar::default());
        self.client = build_client(
            jar.clone(),
            &self.user_agent,
            self.timeout,
            self.accept_invalid_certs,
        )?;
        self.jar = jar;
        Ok(())
    }
}
