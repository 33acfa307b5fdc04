// src/exec/classify.rs

//! Reading action responses.
//!
//! The portal answers with `{result: code, msg: text}` and distinguishes
//! several outcomes only by wording. All of that knowledge sits behind
//! [`ResponseClassifier`] so a wording change is a configuration or
//! one-file edit.

use serde_json::Value;

use crate::config::{LoginMarkers, ResponseMarkers};
use crate::portal::PortalResponse;
use crate::types::Action;

/// Classified action response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResponse {
    Success { message: String },
    AlreadyDone { message: String },
    OutOfOrder { message: String },
    /// Refused because of network location or missing permission.
    Denied { message: String },
    /// A login page came back: the session silently expired.
    LoginPage,
    /// Any other code, a non-2xx status or an unparsable body.
    Unexpected { detail: String },
}

pub trait ResponseClassifier: Send + Sync {
    fn classify(&self, action: Action, resp: &PortalResponse) -> ActionResponse;
}

/// Classifier driven by `[portal.responses]` and the login-form markers.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    responses: ResponseMarkers,
    login_markers: Vec<String>,
}

impl MarkerClassifier {
    pub fn new(responses: &ResponseMarkers, login: &LoginMarkers) -> Self {
        let mut login_markers = login.login_form.clone();
        login_markers.extend(login.logged_out.iter().cloned());
        Self {
            responses: responses.clone(),
            login_markers,
        }
    }

    fn looks_like_login(&self, body: &str) -> bool {
        contains_any(body, &self.login_markers)
    }
}

fn contains_any(text: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| !m.is_empty() && text.contains(m.as_str()))
}

/// `1` and `"1"` both count.
fn as_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl ResponseClassifier for MarkerClassifier {
    fn classify(&self, action: Action, resp: &PortalResponse) -> ActionResponse {
        if resp.status == 401 || resp.status == 403 {
            return ActionResponse::LoginPage;
        }
        if !resp.is_success() {
            return ActionResponse::Unexpected {
                detail: format!("HTTP {}", resp.status),
            };
        }

        let json: Value = match serde_json::from_str(resp.body.trim()) {
            Ok(v) => v,
            Err(_) if self.looks_like_login(&resp.body) => return ActionResponse::LoginPage,
            Err(err) => {
                return ActionResponse::Unexpected {
                    detail: format!("unparsable response: {err}: {}", resp.excerpt()),
                };
            }
        };

        let r = &self.responses;
        let code = json.get(&r.result_field).and_then(as_code);
        let message = json
            .get(&r.message_field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(code) = code else {
            return ActionResponse::Unexpected {
                detail: format!("missing '{}' field: {}", r.result_field, resp.excerpt()),
            };
        };

        if code == r.success_code {
            return ActionResponse::Success { message };
        }

        let (already, out_of_order) = match action {
            Action::CheckIn => (&r.check_in_already_done, &r.check_in_out_of_order),
            Action::CheckOut => (&r.check_out_already_done, &r.check_out_out_of_order),
        };
        if contains_any(&message, already) {
            return ActionResponse::AlreadyDone { message };
        }
        if contains_any(&message, out_of_order) {
            return ActionResponse::OutOfOrder { message };
        }
        if code == r.denied_code
            && (r.denied_markers.is_empty() || contains_any(&message, &r.denied_markers))
        {
            return ActionResponse::Denied { message };
        }

        ActionResponse::Unexpected {
            detail: format!("result {code}: {message}"),
        }
    }
}
