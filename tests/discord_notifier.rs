//! Discord notifier contract tests against a mock REST API.

use override_watch::WatchError;
use override_watch::config::DiscordConfig;
use override_watch::notify::{DiscordNotifier, Notifier};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn notifier_for(server: &MockServer) -> DiscordNotifier {
    DiscordNotifier::new(&DiscordConfig {
        bot_token: "bot-token".to_owned(),
        channel_id: "987654321".to_owned(),
        api_base: server.uri(),
        ..DiscordConfig::default()
    })
}

#[tokio::test]
async fn send_posts_content_with_bot_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/987654321/messages"))
        .and(header("Authorization", "Bot bot-token"))
        .and(body_partial_json(json!({"content": "Nothing changed."})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = notifier_for(&server);
    assert_eq!(notifier.id(), "discord");
    notifier.send("Nothing changed.").await.unwrap();
}

#[tokio::test]
async fn rejected_send_is_a_notifier_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/987654321/messages"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "Missing Permissions", "code": 50013
        })))
        .mount(&server)
        .await;

    let err = notifier_for(&server).send("hello").await.unwrap_err();
    assert!(matches!(err, WatchError::Notifier(_)));
    assert!(err.to_string().contains("403"));
}

#[tokio::test]
async fn health_check_reports_token_validity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert!(!notifier_for(&server).health_check().await.unwrap());
}

#[tokio::test]
async fn health_check_accepts_valid_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .and(header("Authorization", "Bot bot-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1", "bot": true})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(notifier_for(&server).health_check().await.unwrap());
}
