// tests/classifier.rs

mod common;
use crate::common::fakes::{LOGIN_FORM_PAGE, action_json};

use std::time::Duration;

use punchclock::config::{LoginMarkers, ResponseMarkers};
use punchclock::exec::throttle::backoff_delay;
use punchclock::exec::{ActionResponse, MarkerClassifier, ResponseClassifier};
use punchclock::portal::PortalResponse;
use punchclock::types::Action;

fn classifier() -> MarkerClassifier {
    MarkerClassifier::new(&ResponseMarkers::default(), &LoginMarkers::default())
}

fn classify(action: Action, body: &str) -> ActionResponse {
    classifier().classify(action, &PortalResponse::ok(body))
}

#[test]
fn test_success_code_numeric_or_string() {
    assert_eq!(
        classify(Action::CheckIn, &action_json(1, "簽到成功")),
        ActionResponse::Success { message: "簽到成功".into() }
    );
    assert!(matches!(
        classify(Action::CheckOut, r#"{"result":"1","msg":"簽退成功"}"#),
        ActionResponse::Success { .. }
    ));
}

#[test]
fn test_already_done_wording_per_action() {
    assert!(matches!(
        classify(Action::CheckIn, &action_json(0, "今日已簽到")),
        ActionResponse::AlreadyDone { .. }
    ));
    // "Check out first" on a check-in means the check-in already happened.
    assert!(matches!(
        classify(Action::CheckIn, &action_json(0, "請先簽退")),
        ActionResponse::AlreadyDone { .. }
    ));
    assert!(matches!(
        classify(Action::CheckOut, &action_json(0, "已簽退")),
        ActionResponse::AlreadyDone { .. }
    ));
    // Check-out wording does not count for a check-in.
    assert!(matches!(
        classify(Action::CheckIn, &action_json(0, "已簽退")),
        ActionResponse::Unexpected { .. }
    ));
}

#[test]
fn test_out_of_order_check_out() {
    assert_eq!(
        classify(Action::CheckOut, &action_json(0, "請先簽到")),
        ActionResponse::OutOfOrder { message: "請先簽到".into() }
    );
}

#[test]
fn test_denied_needs_code_and_marker() {
    assert!(matches!(
        classify(Action::CheckIn, &action_json(-1, "無使用權限")),
        ActionResponse::Denied { .. }
    ));
    assert!(matches!(
        classify(Action::CheckIn, &action_json(-1, "錯誤代碼 -101")),
        ActionResponse::Denied { .. }
    ));
    assert!(matches!(
        classify(Action::CheckIn, &action_json(-1, "系統忙碌")),
        ActionResponse::Unexpected { .. }
    ));
}

#[test]
fn test_login_page_detection() {
    assert_eq!(classify(Action::CheckIn, LOGIN_FORM_PAGE), ActionResponse::LoginPage);

    let c = classifier();
    assert_eq!(
        c.classify(Action::CheckIn, &PortalResponse::new(401, "")),
        ActionResponse::LoginPage
    );
    assert_eq!(
        c.classify(Action::CheckIn, &PortalResponse::new(403, "forbidden")),
        ActionResponse::LoginPage
    );
}

#[test]
fn test_unexpected_shapes() {
    let c = classifier();
    assert!(matches!(
        c.classify(Action::CheckIn, &PortalResponse::new(500, action_json(1, "ok"))),
        ActionResponse::Unexpected { detail } if detail.contains("500")
    ));
    assert!(matches!(
        classify(Action::CheckIn, "<html>maintenance</html>"),
        ActionResponse::Unexpected { .. }
    ));
    assert!(matches!(
        classify(Action::CheckIn, r#"{"msg":"no code"}"#),
        ActionResponse::Unexpected { detail } if detail.contains("result")
    ));
}

#[test]
fn test_custom_markers() {
    let mut responses = ResponseMarkers::default();
    responses.result_field = "code".into();
    responses.message_field = "message".into();
    responses.success_code = 0;
    let c = MarkerClassifier::new(&responses, &LoginMarkers::default());

    assert!(matches!(
        c.classify(Action::CheckIn, &PortalResponse::ok(r#"{"code":0,"message":"done"}"#)),
        ActionResponse::Success { .. }
    ));
}

#[test]
fn test_backoff_doubles_and_caps() {
    let base = Duration::from_millis(100);
    let max = Duration::from_millis(1000);
    assert_eq!(backoff_delay(0, base, max), Duration::ZERO);
    assert_eq!(backoff_delay(1, base, max), Duration::from_millis(100));
    assert_eq!(backoff_delay(2, base, max), Duration::from_millis(200));
    assert_eq!(backoff_delay(4, base, max), Duration::from_millis(800));
    assert_eq!(backoff_delay(5, base, max), max);
    assert_eq!(backoff_delay(60, base, max), max);
}

#[test]
fn test_blank_login_marker_does_not_turn_every_page_into_a_login_page() {
    let mut login = LoginMarkers::default();
    login.login_form.push(String::new());
    login.logged_out = vec![String::new()];
    let c = MarkerClassifier::new(&ResponseMarkers::default(), &login);

    assert!(matches!(
        c.classify(Action::CheckIn, &PortalResponse::ok("<html>maintenance</html>")),
        ActionResponse::Unexpected { .. }
    ));
}
