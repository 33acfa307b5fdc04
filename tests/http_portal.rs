// tests/http_portal.rs

mod common;
use crate::common::builders::{SettingsBuilder, TaskBuilder};
use crate::common::fakes::{WELCOME_PAGE, action_json};
use crate::common::harness::Fakes;
use crate::common::{at, init_tracing};

use punchclock::auth::AuthSession;
use punchclock::exec::ActionOutcome;
use punchclock::portal::{Cookie, HttpPortal, PortalTransport};
use punchclock::types::Action;
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn portal_for(server: &MockServer) -> HttpPortal {
    let settings = SettingsBuilder::new().base_url(&server.uri()).build();
    HttpPortal::from_settings(&settings.portal).unwrap()
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/entrance/save_id.php"))
        .and(body_string_contains("login_id=s1234"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "PHPSESSID=abc123; Path=/")
                .set_body_string(WELCOME_PAGE),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_form_is_posted_and_cookies_captured() {
    init_tracing();
    let server = MockServer::start().await;
    mount_login(&server).await;
    let mut portal = portal_for(&server);

    let form = vec![
        ("login_id".to_string(), "s1234".to_string()),
        ("login_pwd".to_string(), "secret".to_string()),
    ];
    let url = format!("{}/entrance/save_id.php", server.uri());
    let resp = portal.submit_login(&url, &form).await.unwrap();

    assert_eq!(resp.status, 200);
    assert!(resp.body.contains("您好"));
    let cookies = portal.cookies();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].name, "PHPSESSID");
    assert_eq!(cookies[0].value, "abc123");
}

#[tokio::test]
async fn test_action_post_carries_json_and_session_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/card/edit.php"))
        .and(header("x-requested-with", "XMLHttpRequest"))
        .and(header("cookie", "PHPSESSID=seeded"))
        .and(body_json(json!({ "type": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_string(action_json(1, "簽退成功")))
        .expect(1)
        .mount(&server)
        .await;
    let mut portal = portal_for(&server);

    portal.set_cookies(&[Cookie::new("PHPSESSID", "seeded", "127.0.0.1")]);
    let url = format!("{}/card/edit.php", server.uri());
    let resp = portal.post_action(&url, &json!({ "type": 2 })).await.unwrap();

    assert!(resp.is_success());
    assert!(resp.body.contains("簽退成功"));
}

#[tokio::test]
async fn test_reset_empties_the_jar() {
    let server = MockServer::start().await;
    let mut portal = portal_for(&server);

    portal.set_cookies(&[Cookie::new("PHPSESSID", "seeded", "127.0.0.1")]);
    assert_eq!(portal.cookies().len(), 1);

    portal.reset().unwrap();
    assert!(portal.cookies().is_empty());
}

#[tokio::test]
async fn test_http_errors_are_responses_not_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entrance/index.php"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    let mut portal = portal_for(&server);

    let url = format!("{}/entrance/index.php", server.uri());
    let resp = portal.fetch_page(&url).await.unwrap();
    assert_eq!(resp.status, 503);
    assert!(!resp.is_success());
}

#[tokio::test]
async fn test_unreachable_portal_is_a_transport_error() {
    let server = MockServer::start().await;
    let mut portal = portal_for(&server);
    let url = format!("{}/entrance/index.php", server.uri());
    drop(server);

    assert!(portal.fetch_page(&url).await.is_err());
}

#[tokio::test]
async fn test_login_then_check_in_over_http() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/card/edit.php"))
        .and(header("cookie", "PHPSESSID=abc123"))
        .and(body_json(json!({ "type": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_string(action_json(1, "簽到成功")))
        .expect(1)
        .mount(&server)
        .await;

    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().base_url(&server.uri()).build();
    let mut session = AuthSession::new(
        HttpPortal::from_settings(&settings.portal).unwrap(),
        settings.portal.clone(),
        settings.session.clone(),
        fakes.shared_clock(),
        fakes.shared_sink(),
    )
    .unwrap();
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();

    let outcome = executor.execute(&mut session, &mut task, Action::CheckIn).await;

    assert_eq!(outcome, ActionOutcome::Completed { already_done: false });
    assert_eq!(session.user(), Some("王小明"));
    assert!(task.check_in_done());
}
