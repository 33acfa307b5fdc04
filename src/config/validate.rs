// src/config/validate.rs

use regex::Regex;

use crate::config::model::{RawSettings, Settings};
use crate::errors::{PunchclockError, Result};
use crate::network::PrivilegedRange;

impl TryFrom<RawSettings> for Settings {
    type Error = crate::errors::PunchclockError;

    fn try_from(raw: RawSettings) -> std::result::Result<Self, Self::Error> {
        validate_raw_settings(&raw)?;
        Ok(Settings::new_unchecked(raw))
    }
}

fn validate_raw_settings(raw: &RawSettings) -> Result<()> {
    validate_portal(raw)?;
    validate_session(raw)?;
    validate_executor(raw)?;
    validate_schedule(raw)?;
    validate_network(raw)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> PunchclockError {
    PunchclockError::ConfigError(msg.into())
}

fn validate_portal(raw: &RawSettings) -> Result<()> {
    let portal = &raw.portal;

    // Empty URLs are allowed so a fresh install can start without a portal;
    // whatever is set must parse.
    for (key, url) in [
        ("login_url", &portal.login_url),
        ("home_url", &portal.home_url),
        ("check_in_url", &portal.check_in_url),
        ("check_out_url", &portal.check_out_url),
    ] {
        if !url.trim().is_empty() {
            reqwest::Url::parse(url.trim()).map_err(|e| {
                config_error(format!("[portal].{key} is not a valid URL ({url}): {e}"))
            })?;
        }
    }

    Regex::new(&portal.markers.welcome_pattern).map_err(|e| {
        config_error(format!(
            "[portal.markers].welcome_pattern is not a valid regex: {e}"
        ))
    })?;

    let markers = &portal.markers;
    for (key, value) in [
        ("welcome_pattern", &markers.welcome_pattern),
        ("status_marker", &markers.status_marker),
        ("error_redirect", &markers.error_redirect),
    ] {
        if value.trim().is_empty() {
            return Err(config_error(format!("[portal.markers].{key} must not be empty")));
        }
    }
    for (key, list) in [
        ("bad_credential_codes", &markers.bad_credential_codes),
        ("login_form", &markers.login_form),
        ("logged_in", &markers.logged_in),
        ("logged_out", &markers.logged_out),
    ] {
        reject_blank_entries("portal.markers", key, list)?;
    }

    let responses = &portal.responses;
    for (key, value) in [
        ("action_field", &responses.action_field),
        ("result_field", &responses.result_field),
        ("message_field", &responses.message_field),
    ] {
        if value.trim().is_empty() {
            return Err(config_error(format!("[portal.responses].{key} must not be empty")));
        }
    }
    for (key, list) in [
        ("denied_markers", &responses.denied_markers),
        ("check_in_already_done", &responses.check_in_already_done),
        ("check_out_already_done", &responses.check_out_already_done),
        ("check_in_out_of_order", &responses.check_in_out_of_order),
        ("check_out_out_of_order", &responses.check_out_out_of_order),
    ] {
        reject_blank_entries("portal.responses", key, list)?;
    }

    if portal.request_timeout_secs == 0 {
        return Err(config_error("[portal].request_timeout_secs must be >= 1"));
    }

    Ok(())
}

/// A blank marker matches every page.
fn reject_blank_entries(section: &str, key: &str, list: &[String]) -> Result<()> {
    if list.iter().any(|m| m.trim().is_empty()) {
        return Err(config_error(format!(
            "[{section}].{key} must not contain empty entries"
        )));
    }
    Ok(())
}

fn validate_session(raw: &RawSettings) -> Result<()> {
    let s = &raw.session;
    if s.refresh_after_secs <= 0 || s.valid_for_secs <= 0 {
        return Err(config_error(
            "[session] refresh_after_secs and valid_for_secs must be positive",
        ));
    }
    if s.refresh_after_secs >= s.valid_for_secs {
        return Err(config_error(format!(
            "[session].refresh_after_secs ({}) must be below valid_for_secs ({})",
            s.refresh_after_secs, s.valid_for_secs
        )));
    }
    if s.lockout_threshold == 0 {
        return Err(config_error("[session].lockout_threshold must be >= 1 (got 0)"));
    }
    if s.lockout_base_secs <= 0 || s.lockout_max_secs < s.lockout_base_secs {
        return Err(config_error(
            "[session] lockout_base_secs must be positive and <= lockout_max_secs",
        ));
    }
    Ok(())
}

fn validate_executor(raw: &RawSettings) -> Result<()> {
    let e = &raw.executor;
    if e.max_attempts == 0 {
        return Err(config_error("[executor].max_attempts must be >= 1 (got 0)"));
    }
    if e.failure_threshold == 0 {
        return Err(config_error("[executor].failure_threshold must be >= 1 (got 0)"));
    }
    if e.backoff_max_ms < e.backoff_base_ms {
        return Err(config_error(
            "[executor].backoff_max_ms must be >= backoff_base_ms",
        ));
    }
    Ok(())
}

fn validate_schedule(raw: &RawSettings) -> Result<()> {
    let s = &raw.schedule;
    if s.check_interval_secs == 0 || s.idle_interval_secs == 0 {
        return Err(config_error(
            "[schedule] check_interval_secs and idle_interval_secs must be >= 1",
        ));
    }
    if s.cooldown_base_mins <= 0 || s.cooldown_max_mins < s.cooldown_base_mins {
        return Err(config_error(
            "[schedule] cooldown_base_mins must be positive and <= cooldown_max_mins",
        ));
    }
    let r = &raw.repair;
    if r.grace_mins < 0 || r.force_checkout_after_mins < r.grace_mins {
        return Err(config_error(
            "[repair] force_checkout_after_mins must be >= grace_mins >= 0",
        ));
    }
    if r.missed_after_mins <= 0 {
        return Err(config_error("[repair].missed_after_mins must be positive"));
    }
    Ok(())
}

fn validate_network(raw: &RawSettings) -> Result<()> {
    let n = &raw.network;
    PrivilegedRange::parse_all(&n.privileged_ranges)?;

    if n.enabled && n.privileged_ranges.is_empty() {
        return Err(config_error(
            "[network].privileged_ranges must not be empty while the gate is enabled",
        ));
    }
    if !(1..=10).contains(&n.probe_timeout_secs) {
        return Err(config_error(format!(
            "[network].probe_timeout_secs must be between 1 and 10 (got {})",
            n.probe_timeout_secs
        )));
    }
    if n.cache_ttl_secs < 0 {
        return Err(config_error("[network].cache_ttl_secs must not be negative"));
    }
    if n.anchor_host.trim().is_empty() {
        return Err(config_error("[network].anchor_host must not be empty"));
    }
    Ok(())
}
