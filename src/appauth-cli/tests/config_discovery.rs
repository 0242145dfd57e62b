//! Config resolution against a mock provider.

use appauth_cli::config::AppConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_issuer_config_discovers_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/token", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = AppConfig::from_toml(&format!(
        r#"
        client_id = "native-app"
        redirect_uri = "http://127.0.0.1:8400/callback"
        scopes = ["openid"]
        issuer = "{}"
        credentials_store = "memory"
        "#,
        server.uri()
    ))
    .unwrap();

    let client = config.client_config(&reqwest::Client::new()).await.unwrap();
    assert_eq!(client.client_id, "native-app");
    assert_eq!(client.scopes, vec!["openid".to_string()]);
    assert_eq!(client.service.token_endpoint().path(), "/token");
    assert!(client.service.revocation_endpoint().is_none());
}

#[tokio::test]
async fn test_discovery_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = AppConfig::from_toml(&format!(
        r#"
        client_id = "native-app"
        redirect_uri = "http://127.0.0.1:8400/callback"
        issuer = "{}"
        "#,
        server.uri()
    ))
    .unwrap();

    let err = config
        .client_config(&reqwest::Client::new())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Discovery failed"));
}
