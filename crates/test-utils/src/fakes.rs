#![allow(dead_code)]

//! In-memory stand-ins for the portal, the host network and the route
//! trace. Every fake is a cheap clone around shared state, so a test keeps
//! one handle while the code under test owns another.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use punchclock::engine::{EventSink, StatusEvent};
use punchclock::errors::{PunchclockError, Result};
use punchclock::network::{NetworkEnvironment, RouteProber};
use punchclock::portal::{Cookie, PortalResponse, PortalTransport};
use punchclock::types::BoxFuture;

pub const WELCOME_PAGE: &str = r#"<html><body><span class="status">王小明 您好</span> <a href="logout.php">登出</a></body></html>"#;
pub const BAD_CREDENTIALS_PAGE: &str =
    "<html><meta http-equiv='refresh' content='0; url=error.php?error=2'></html>";
pub const SERVER_ERROR_PAGE: &str =
    "<html><meta http-equiv='refresh' content='0; url=error.php?error=9'></html>";
pub const LOGIN_FORM_PAGE: &str = r#"<html><form name="dyulogin" method="post"><input name="login_id"><input name="login_pwd" type="password"></form></html>"#;

/// JSON body of an action response.
pub fn action_json(result: i64, msg: &str) -> String {
    serde_json::json!({ "result": result, "msg": msg }).to_string()
}

#[derive(Debug, Clone)]
pub enum Reply {
    Respond(PortalResponse),
    /// Transport-level failure (connect error, timeout).
    Fail(String),
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Reply::Respond(PortalResponse::ok(body))
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Reply::Respond(PortalResponse::new(status, body))
    }

    fn resolve(self) -> Result<PortalResponse> {
        match self {
            Reply::Respond(resp) => Ok(resp),
            Reply::Fail(msg) => Err(PunchclockError::Other(anyhow::anyhow!(msg))),
        }
    }
}

#[derive(Debug)]
struct PortalState {
    login_replies: VecDeque<Reply>,
    default_login: Reply,
    page_replies: VecDeque<Reply>,
    default_page: Reply,
    action_replies: VecDeque<Reply>,
    default_action: Reply,
    jar: Vec<Cookie>,
    session_cookies: Vec<Cookie>,
    login_calls: usize,
    page_calls: usize,
    action_calls: usize,
    resets: usize,
    action_bodies: Vec<serde_json::Value>,
    login_forms: Vec<Vec<(String, String)>>,
}

/// Scripted portal.
///
/// Queued replies are used first, then the default. A login reply that is
/// a 200 containing the welcome fragment issues the session cookies, like
/// the real portal does.
#[derive(Debug, Clone)]
pub struct FakePortal {
    state: Arc<Mutex<PortalState>>,
}

impl Default for FakePortal {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePortal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PortalState {
                login_replies: VecDeque::new(),
                default_login: Reply::ok(WELCOME_PAGE),
                page_replies: VecDeque::new(),
                default_page: Reply::ok(WELCOME_PAGE),
                action_replies: VecDeque::new(),
                default_action: Reply::ok(action_json(1, "簽到成功")),
                jar: Vec::new(),
                session_cookies: vec![Cookie::new("PHPSESSID", "abc123", "portal.test")],
                login_calls: 0,
                page_calls: 0,
                action_calls: 0,
                resets: 0,
                action_bodies: Vec::new(),
                login_forms: Vec::new(),
            })),
        }
    }

    pub fn push_login(&self, reply: Reply) -> &Self {
        self.state.lock().unwrap().login_replies.push_back(reply);
        self
    }

    pub fn push_page(&self, reply: Reply) -> &Self {
        self.state.lock().unwrap().page_replies.push_back(reply);
        self
    }

    pub fn push_action(&self, reply: Reply) -> &Self {
        self.state.lock().unwrap().action_replies.push_back(reply);
        self
    }

    pub fn set_default_login(&self, reply: Reply) {
        self.state.lock().unwrap().default_login = reply;
    }

    pub fn set_default_page(&self, reply: Reply) {
        self.state.lock().unwrap().default_page = reply;
    }

    pub fn set_default_action(&self, reply: Reply) {
        self.state.lock().unwrap().default_action = reply;
    }

    /// Drop cookies from the jar, as if the portal expired them.
    pub fn clear_jar(&self) {
        self.state.lock().unwrap().jar.clear();
    }

    pub fn login_calls(&self) -> usize {
        self.state.lock().unwrap().login_calls
    }

    pub fn page_calls(&self) -> usize {
        self.state.lock().unwrap().page_calls
    }

    pub fn action_calls(&self) -> usize {
        self.state.lock().unwrap().action_calls
    }

    /// Every request of any kind.
    pub fn total_calls(&self) -> usize {
        let s = self.state.lock().unwrap();
        s.login_calls + s.page_calls + s.action_calls
    }

    pub fn action_bodies(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().action_bodies.clone()
    }

    pub fn login_forms(&self) -> Vec<Vec<(String, String)>> {
        self.state.lock().unwrap().login_forms.clone()
    }

    pub fn jar(&self) -> Vec<Cookie> {
        self.state.lock().unwrap().jar.clone()
    }
}

impl PortalTransport for FakePortal {
    fn submit_login<'a>(
        &'a mut self,
        _url: &'a str,
        form: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<PortalResponse>> {
        let reply = {
            let mut s = self.state.lock().unwrap();
            s.login_calls += 1;
            s.login_forms.push(form.to_vec());
            let reply = s.login_replies.pop_front().unwrap_or_else(|| s.default_login.clone());
            if let Reply::Respond(resp) = &reply {
                if resp.is_success() && resp.body.contains("您好") {
                    s.jar = s.session_cookies.clone();
                }
            }
            reply
        };
        Box::pin(async move { reply.resolve() })
    }

    fn fetch_page<'a>(&'a mut self, _url: &'a str) -> BoxFuture<'a, Result<PortalResponse>> {
        let reply = {
            let mut s = self.state.lock().unwrap();
            s.page_calls += 1;
            s.page_replies.pop_front().unwrap_or_else(|| s.default_page.clone())
        };
        Box::pin(async move { reply.resolve() })
    }

    fn post_action<'a>(
        &'a mut self,
        _url: &'a str,
        body: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<PortalResponse>> {
        let reply = {
            let mut s = self.state.lock().unwrap();
            s.action_calls += 1;
            s.action_bodies.push(body.clone());
            s.action_replies.pop_front().unwrap_or_else(|| s.default_action.clone())
        };
        Box::pin(async move { reply.resolve() })
    }

    fn cookies(&self) -> Vec<Cookie> {
        self.state.lock().unwrap().jar.clone()
    }

    fn set_cookies(&mut self, cookies: &[Cookie]) {
        let mut s = self.state.lock().unwrap();
        for cookie in cookies {
            s.jar.retain(|c| c.name != cookie.name);
            s.jar.push(cookie.clone());
        }
    }

    fn reset(&mut self) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.jar.clear();
        s.resets += 1;
        Ok(())
    }
}

/// Host network facts under test control.
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    local: Arc<Mutex<Option<Ipv4Addr>>>,
    gateway: Arc<Mutex<Option<Ipv4Addr>>>,
    local_lookups: Arc<AtomicUsize>,
    gateway_lookups: Arc<AtomicUsize>,
}

impl FakeNetwork {
    pub fn new(local: Option<Ipv4Addr>, gateway: Option<Ipv4Addr>) -> Self {
        let net = Self::default();
        net.set_local(local);
        net.set_gateway(gateway);
        net
    }

    pub fn set_local(&self, addr: Option<Ipv4Addr>) {
        *self.local.lock().unwrap() = addr;
    }

    pub fn set_gateway(&self, addr: Option<Ipv4Addr>) {
        *self.gateway.lock().unwrap() = addr;
    }

    pub fn local_lookups(&self) -> usize {
        self.local_lookups.load(Ordering::SeqCst)
    }

    pub fn gateway_lookups(&self) -> usize {
        self.gateway_lookups.load(Ordering::SeqCst)
    }
}

impl NetworkEnvironment for FakeNetwork {
    fn local_address(&self) -> BoxFuture<'_, Option<Ipv4Addr>> {
        self.local_lookups.fetch_add(1, Ordering::SeqCst);
        let addr = *self.local.lock().unwrap();
        Box::pin(async move { addr })
    }

    fn default_gateway(&self) -> BoxFuture<'_, Option<Ipv4Addr>> {
        self.gateway_lookups.fetch_add(1, Ordering::SeqCst);
        let addr = *self.gateway.lock().unwrap();
        Box::pin(async move { addr })
    }
}

/// Route trace with a configurable answer and delay.
#[derive(Debug, Clone, Default)]
pub struct FakeProber {
    hop: Arc<Mutex<Option<Ipv4Addr>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    fail: Arc<Mutex<bool>>,
    calls: Arc<AtomicUsize>,
}

impl FakeProber {
    pub fn new(hop: Option<Ipv4Addr>) -> Self {
        let prober = Self::default();
        prober.set_hop(hop);
        prober
    }

    pub fn set_hop(&self, hop: Option<Ipv4Addr>) {
        *self.hop.lock().unwrap() = hop;
    }

    /// Every probe sleeps this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RouteProber for FakeProber {
    fn second_hop<'a>(
        &'a self,
        _anchor: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<Ipv4Addr>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hop = *self.hop.lock().unwrap();
        let delay = *self.delay.lock().unwrap();
        let fail = *self.fail.lock().unwrap();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(PunchclockError::ProbeError("traceroute not found".into()));
            }
            Ok(hop)
        })
    }
}

/// Sink that keeps every event.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&StatusEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
    }
}
