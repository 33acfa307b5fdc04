// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level settings as read from a TOML file.
///
/// ```toml
/// [portal]
/// login_url = "https://portal.example.edu/entrance/save_id.php"
/// home_url = "https://portal.example.edu/entrance/index.php"
/// check_in_url = "https://portal.example.edu/card/edit.php"
/// check_out_url = "https://portal.example.edu/card/edit.php"
/// username = "s1234"
/// password = "secret"
///
/// [network]
/// privileged_ranges = ["163.23.0.0/16"]
/// secondary_probe = true
/// ```
///
/// All sections are optional and have defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSettings {
    #[serde(default)]
    pub portal: PortalSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub repair: RepairSection,
}

/// Validated settings. Build one through `Settings::try_from(raw)`.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub portal: PortalSection,
    pub schedule: ScheduleSection,
    pub session: SessionSection,
    pub executor: ExecutorSection,
    pub network: NetworkSection,
    pub repair: RepairSection,
}

impl Settings {
    pub(crate) fn new_unchecked(raw: RawSettings) -> Self {
        Self {
            portal: raw.portal,
            schedule: raw.schedule,
            session: raw.session,
            executor: raw.executor,
            network: raw.network,
            repair: raw.repair,
        }
    }

    /// Back to the editable form, e.g. to change a value and re-validate.
    pub fn to_raw(&self) -> RawSettings {
        RawSettings {
            portal: self.portal.clone(),
            schedule: self.schedule.clone(),
            session: self.session.clone(),
            executor: self.executor.clone(),
            network: self.network.clone(),
            repair: self.repair.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new_unchecked(RawSettings::default())
    }
}

/// `[portal]` section: endpoints, credentials and the service-specific
/// markers used to read its responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSection {
    #[serde(default)]
    pub login_url: String,

    /// Authenticated landing page, used for keep-alive and verification.
    #[serde(default)]
    pub home_url: String,

    #[serde(default)]
    pub check_in_url: String,

    #[serde(default)]
    pub check_out_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Expected display name of the logged-in user. A mismatch only warns.
    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub login_form: LoginForm,

    #[serde(default)]
    pub markers: LoginMarkers,

    #[serde(default)]
    pub responses: ResponseMarkers,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for PortalSection {
    fn default() -> Self {
        Self {
            login_url: String::new(),
            home_url: String::new(),
            check_in_url: String::new(),
            check_out_url: String::new(),
            username: String::new(),
            password: String::new(),
            display_name: String::new(),
            user_agent: None,
            request_timeout_secs: default_request_timeout_secs(),
            accept_invalid_certs: false,
            login_form: LoginForm::default(),
            markers: LoginMarkers::default(),
            responses: ResponseMarkers::default(),
        }
    }
}

impl PortalSection {
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `[portal.login_form]`: the form-encoded login body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginForm {
    #[serde(default = "default_username_field")]
    pub username_field: String,

    #[serde(default = "default_password_field")]
    pub password_field: String,

    /// Static fields submitted with every login.
    #[serde(default = "default_extra_fields")]
    pub extra: BTreeMap<String, String>,
}

fn default_username_field() -> String {
    "login_id".to_string()
}

fn default_password_field() -> String {
    "login_pwd".to_string()
}

fn default_extra_fields() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("login_agent".to_string(), "0".to_string()),
        ("login_ent".to_string(), "15".to_string()),
        ("login_page".to_string(), String::new()),
    ])
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            username_field: default_username_field(),
            password_field: default_password_field(),
            extra: default_extra_fields(),
        }
    }
}

/// `[portal.markers]`: how to read the HTML the portal returns for login
/// and for authenticated pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginMarkers {
    /// Regex matching the welcome fragment; capture group 1 is the user name.
    #[serde(default = "default_welcome_pattern")]
    pub welcome_pattern: String,

    /// Container that holds the welcome fragment when logged in.
    #[serde(default = "default_status_marker")]
    pub status_marker: String,

    /// Present when the portal redirects to its error page.
    #[serde(default = "default_error_redirect")]
    pub error_redirect: String,

    /// Error-page codes meaning wrong account or password.
    #[serde(default = "default_bad_credential_codes")]
    pub bad_credential_codes: Vec<String>,

    /// Fragments of the login form; seeing one means "not logged in".
    #[serde(default = "default_login_form_markers")]
    pub login_form: Vec<String>,

    /// Fragments only present on authenticated pages.
    #[serde(default = "default_logged_in_markers")]
    pub logged_in: Vec<String>,

    /// Fragments only present on anonymous pages.
    #[serde(default = "default_logged_out_markers")]
    pub logged_out: Vec<String>,
}

fn default_welcome_pattern() -> String {
    r"([^\s<>]+)\s*您好".to_string()
}

fn default_status_marker() -> String {
    r#"<span class="status">"#.to_string()
}

fn default_error_redirect() -> String {
    "url=error.php?error=".to_string()
}

fn default_bad_credential_codes() -> Vec<String> {
    vec!["error=2".to_string(), "error=3".to_string()]
}

fn default_login_form_markers() -> Vec<String> {
    vec![r#"<form name="dyulogin""#.to_string(), "login_pwd".to_string()]
}

fn default_logged_in_markers() -> Vec<String> {
    vec!["登出</a>".to_string(), r#"ispass = "t""#.to_string()]
}

fn default_logged_out_markers() -> Vec<String> {
    vec![
        r#"ispass = """#.to_string(),
        "密碼不得為空".to_string(),
        "帳號不得為空".to_string(),
    ]
}

impl Default for LoginMarkers {
    fn default() -> Self {
        Self {
            welcome_pattern: default_welcome_pattern(),
            status_marker: default_status_marker(),
            error_redirect: default_error_redirect(),
            bad_credential_codes: default_bad_credential_codes(),
            login_form: default_login_form_markers(),
            logged_in: default_logged_in_markers(),
            logged_out: default_logged_out_markers(),
        }
    }
}

/// `[portal.responses]`: the JSON contract of the check-in/out endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMarkers {
    #[serde(default = "default_action_field")]
    pub action_field: String,

    #[serde(default = "default_result_field")]
    pub result_field: String,

    #[serde(default = "default_message_field")]
    pub message_field: String,

    #[serde(default = "default_success_code")]
    pub success_code: i64,

    #[serde(default = "default_denied_code")]
    pub denied_code: i64,

    /// Message fragments that confirm a location/permission denial.
    #[serde(default = "default_denied_markers")]
    pub denied_markers: Vec<String>,

    #[serde(default = "default_check_in_already")]
    pub check_in_already_done: Vec<String>,

    #[serde(default = "default_check_out_already")]
    pub check_out_already_done: Vec<String>,

    #[serde(default)]
    pub check_in_out_of_order: Vec<String>,

    #[serde(default = "default_check_out_out_of_order")]
    pub check_out_out_of_order: Vec<String>,
}

fn default_action_field() -> String {
    "type".to_string()
}

fn default_result_field() -> String {
    "result".to_string()
}

fn default_message_field() -> String {
    "msg".to_string()
}

fn default_success_code() -> i64 {
    1
}

fn default_denied_code() -> i64 {
    -1
}

fn default_denied_markers() -> Vec<String> {
    vec!["無使用權限".to_string(), "-101".to_string()]
}

fn default_check_in_already() -> Vec<String> {
    vec!["已簽到".to_string(), "請先簽退".to_string()]
}

fn default_check_out_already() -> Vec<String> {
    vec!["已簽退".to_string()]
}

fn default_check_out_out_of_order() -> Vec<String> {
    vec!["請先簽到".to_string(), "尚未簽到".to_string()]
}

impl Default for ResponseMarkers {
    fn default() -> Self {
        Self {
            action_field: default_action_field(),
            result_field: default_result_field(),
            message_field: default_message_field(),
            success_code: default_success_code(),
            denied_code: default_denied_code(),
            denied_markers: default_denied_markers(),
            check_in_already_done: default_check_in_already(),
            check_out_already_done: default_check_out_already(),
            check_in_out_of_order: Vec::new(),
            check_out_out_of_order: default_check_out_out_of_order(),
        }
    }
}

/// `[schedule]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSection {
    /// Poll interval while a task is due or close to due.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Poll interval when nothing is due soon.
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,

    /// How close a due time must be before the short interval applies.
    #[serde(default = "default_near_window_secs")]
    pub near_window_secs: u64,

    #[serde(default = "default_cooldown_base_mins")]
    pub cooldown_base_mins: i64,

    #[serde(default = "default_cooldown_max_mins")]
    pub cooldown_max_mins: i64,

    /// Worked time below this after a check-out raises a warning.
    #[serde(default = "default_short_shift_mins")]
    pub short_shift_mins: i64,
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_idle_interval_secs() -> u64 {
    300
}

fn default_near_window_secs() -> u64 {
    600
}

fn default_cooldown_base_mins() -> i64 {
    30
}

fn default_cooldown_max_mins() -> i64 {
    240
}

fn default_short_shift_mins() -> i64 {
    30
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            idle_interval_secs: default_idle_interval_secs(),
            near_window_secs: default_near_window_secs(),
            cooldown_base_mins: default_cooldown_base_mins(),
            cooldown_max_mins: default_cooldown_max_mins(),
            short_shift_mins: default_short_shift_mins(),
        }
    }
}

impl ScheduleSection {
    pub fn cooldown_base(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_base_mins)
    }

    pub fn cooldown_max(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_max_mins)
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Age after which keep-alive refreshes the session.
    #[serde(default = "default_refresh_after_secs")]
    pub refresh_after_secs: i64,

    /// Age after which the session is treated as expired.
    #[serde(default = "default_valid_for_secs")]
    pub valid_for_secs: i64,

    /// Consecutive bad-credential failures before login locks.
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,

    #[serde(default = "default_lockout_base_secs")]
    pub lockout_base_secs: i64,

    #[serde(default = "default_lockout_max_secs")]
    pub lockout_max_secs: i64,
}

fn default_refresh_after_secs() -> i64 {
    240
}

fn default_valid_for_secs() -> i64 {
    270
}

fn default_lockout_threshold() -> u32 {
    3
}

fn default_lockout_base_secs() -> i64 {
    60
}

fn default_lockout_max_secs() -> i64 {
    1800
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            refresh_after_secs: default_refresh_after_secs(),
            valid_for_secs: default_valid_for_secs(),
            lockout_threshold: default_lockout_threshold(),
            lockout_base_secs: default_lockout_base_secs(),
            lockout_max_secs: default_lockout_max_secs(),
        }
    }
}

impl SessionSection {
    pub fn refresh_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_after_secs)
    }

    pub fn valid_for(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.valid_for_secs)
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Minimum gap between consecutive outbound action requests.
    #[serde(default = "default_request_spacing_ms")]
    pub request_spacing_ms: u64,

    /// Upper bound of the random delay added to spacing and backoff.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Consecutive task failures before the task is marked abnormal.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_spacing_ms() -> u64 {
    2000
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    15_000
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            request_spacing_ms: default_request_spacing_ms(),
            jitter_ms: default_jitter_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// `[network]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    /// When false, actions are attempted regardless of network location.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// CIDR blocks the portal accepts actions from.
    #[serde(default = "default_privileged_ranges")]
    pub privileged_ranges: Vec<String>,

    /// Fall back to gateway and second-hop checks when the local address
    /// is outside the privileged ranges.
    #[serde(default)]
    pub secondary_probe: bool,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: i64,

    /// External host the route trace aims at.
    #[serde(default = "default_anchor_host")]
    pub anchor_host: String,
}

fn default_true() -> bool {
    true
}

fn default_privileged_ranges() -> Vec<String> {
    vec!["163.23.0.0/16".to_string()]
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_cache_ttl_secs() -> i64 {
    60
}

fn default_anchor_host() -> String {
    "8.8.8.8".to_string()
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            enabled: true,
            privileged_ranges: default_privileged_ranges(),
            secondary_probe: false,
            probe_timeout_secs: default_probe_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            anchor_host: default_anchor_host(),
        }
    }
}

impl NetworkSection {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs)
    }
}

/// `[repair]` section: thresholds for sequence/anomaly repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSection {
    /// Grace after a missed check-out before it counts as blocking.
    #[serde(default = "default_grace_mins")]
    pub grace_mins: i64,

    /// Blocking tasks older than this are force-checked-out.
    #[serde(default = "default_force_checkout_after_mins")]
    pub force_checkout_after_mins: i64,

    /// A never-started task this far past its check-in is missed.
    #[serde(default = "default_missed_after_mins")]
    pub missed_after_mins: i64,
}

fn default_grace_mins() -> i64 {
    5
}

fn default_force_checkout_after_mins() -> i64 {
    30
}

fn default_missed_after_mins() -> i64 {
    240
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            grace_mins: default_grace_mins(),
            force_checkout_after_mins: default_force_checkout_after_mins(),
            missed_after_mins: default_missed_after_mins(),
        }
    }
}
