mod helpers;

use custodian::settings::Settings;
use custodian::web::{self, AppState};
use helpers::{TestApp, UserBuilder};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

/// Router bound to an ephemeral port for the duration of a test
struct TestServer {
    app: TestApp,
    base_url: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(Settings::default()).await
    }

    async fn start_with(settings: Settings) -> Self {
        let app = TestApp::with_settings(settings.clone()).await;
        let state = AppState {
            settings: Arc::new(settings),
            service: app.service.clone(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("No local addr");
        let router = web::router(state);
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Test server failed");
        });

        Self {
            app,
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn register(&self, name: &str, email: &str) -> (String, String) {
        let resp = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "name": name,
                "email": email,
                "password": "password123",
                "personalInfo": {"firstName": name, "lastName": "Tester", "phoneNumber": "555-0100"},
            }))
            .send()
            .await
            .expect("Register request failed");
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = self.client.request(method, self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.expect("Request failed");
        let status = resp.status();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }
}

#[tokio::test]
async fn test_healthz() {
    let server = TestServer::start().await;
    let (status, body) = server
        .send(reqwest::Method::GET, "/healthz", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_full_consent_flow_over_http() {
    use reqwest::Method;

    let server = TestServer::start().await;
    let (granter_token, granter_id) = server.register("Grace", "grace@example.com").await;
    let (requester_token, _) = server.register("Rita", "rita@example.com").await;

    let (status, consent) = server
        .send(
            Method::POST,
            "/api/consents/request",
            Some(&requester_token),
            Some(json!({
                "granterEmail": "grace@example.com",
                "dataTypes": ["personal-info", "browser-data"],
                "purpose": "loan application",
                "duration": "6-months",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(consent["status"], "pending");
    assert_eq!(consent["dataTypes"], json!(["personal-info", "browser-data"]));
    let consent_id = consent["id"].as_str().unwrap().to_string();

    let (status, inbox) = server
        .send(
            Method::GET,
            "/api/consents/pending-requests",
            Some(&granter_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox.as_array().unwrap().len(), 1);
    assert_eq!(inbox[0]["counterparty"]["email"], "rita@example.com");

    let (status, accepted) = server
        .send(
            Method::PUT,
            &format!("/api/consents/accept/{}", consent_id),
            Some(&granter_token),
            Some(json!({
                "browserData": {"userAgent": "Firefox", "cookiesEnabled": true},
                "visitedPages": ["/home", "/settings"],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["consent"]["status"], "active");

    let (status, release) = server
        .send(
            Method::POST,
            "/api/consents/request-data",
            Some(&requester_token),
            Some(json!({"granterId": granter_id, "dataType": "personal-info"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(release["consentId"], consent_id.as_str());
    assert_eq!(release["data"]["firstName"], "Grace");
    assert_eq!(release["data"]["phoneNumber"], "555-0100");
    assert_eq!(release["data"]["address"], Value::Null);

    let (status, release) = server
        .send(
            Method::POST,
            "/api/consents/request-data",
            Some(&requester_token),
            Some(json!({"granterId": granter_id, "dataType": "browser-data"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(release["data"]["userAgent"], "Firefox");
    assert_eq!(release["data"]["recentWebsites"], json!(["/home", "/settings"]));

    let (status, denied) = server
        .send(
            Method::POST,
            "/api/consents/request-data",
            Some(&requester_token),
            Some(json!({"granterId": granter_id, "dataType": "location-data"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(denied["error"], "forbidden");

    let (status, _) = server
        .send(
            Method::PUT,
            &format!("/api/consents/revoke/{}", consent_id),
            Some(&granter_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, single) = server
        .send(
            Method::GET,
            &format!("/api/consents/{}", consent_id),
            Some(&requester_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["status"], "revoked");

    let (status, logs) = server
        .send(Method::GET, "/api/audit/my-logs", Some(&granter_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<_> = logs["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["action"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        actions,
        vec!["REVOKED", "ACCESSED", "ACCESSED", "GRANTED", "REQUESTED", "REGISTERED"]
    );
    assert_eq!(logs["consentStats"]["revokedConsentsAsGranter"], 1);
}

#[tokio::test]
async fn test_error_mapping() {
    use reqwest::Method;

    let server = TestServer::start().await;
    let (granter_token, _) = server.register("Gus", "gus@example.com").await;
    let (requester_token, _) = server.register("Ron", "ron@example.com").await;

    // 401 without a token
    let (status, body) = server
        .send(Method::GET, "/api/consents/my-consents", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = server
        .send(
            Method::GET,
            "/api/consents/my-consents",
            Some("not-a-token"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 404 for unknown consent
    let (status, body) = server
        .send(
            Method::PUT,
            "/api/consents/decline/missing",
            Some(&granter_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    // 400 for invalid input
    let (status, body) = server
        .send(
            Method::POST,
            "/api/consents/request",
            Some(&requester_token),
            Some(json!({
                "granterEmail": "gus@example.com",
                "dataTypes": ["dna"],
                "purpose": "science",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    // legacy field name for the granter is still understood
    let (status, consent) = server
        .send(
            Method::POST,
            "/api/consents/request",
            Some(&requester_token),
            Some(json!({
                "requesterEmail": "gus@example.com",
                "dataTypes": ["personal-info"],
                "purpose": "science",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let consent_id = consent["id"].as_str().unwrap().to_string();

    // 400 for conflicts
    let (status, body) = server
        .send(
            Method::POST,
            "/api/consents/request",
            Some(&requester_token),
            Some(json!({
                "granterEmail": "gus@example.com",
                "dataTypes": ["personal-info"],
                "purpose": "again",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "conflict");

    // 403 when the requester tries to accept
    let (status, body) = server
        .send(
            Method::PUT,
            &format!("/api/consents/accept/{}", consent_id),
            Some(&requester_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    // 403 for non-admin audit listing
    let (status, _) = server
        .send(Method::GET, "/api/audit/all-logs", Some(&requester_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 401 for bad credentials
    let (status, _) = server
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "gus@example.com", "password": "nope"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_and_profile() {
    use reqwest::Method;

    let server = TestServer::start().await;
    server.register("Lena", "lena@example.com").await;

    let (status, session) = server
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "LENA@example.com", "password": "password123"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = session["token"].as_str().unwrap().to_string();

    let (status, profile) = server
        .send(Method::GET, "/api/auth/profile", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["email"], "lena@example.com");
    assert_eq!(profile["personalInfo"]["firstName"], "Lena");
    assert!(profile.get("passwordHash").is_none());
}

#[tokio::test]
async fn test_registration_can_be_disabled() {
    let mut settings = Settings::default();
    settings.auth.allow_public_registration = false;
    let server = TestServer::start_with(settings).await;

    let resp = server
        .client
        .post(server.url("/api/auth/register"))
        .json(&json!({
            "name": "Nope",
            "email": "nope@example.com",
            "password": "password123",
            "personalInfo": {"firstName": "N", "lastName": "O"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_job_endpoints() {
    use reqwest::Method;

    let server = TestServer::start().await;
    UserBuilder::new("root@example.com")
        .admin()
        .create(server.app.connection())
        .await;
    let (user_token, _) = server.register("Uma", "uma@example.com").await;

    let (status, session) = server
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "root@example.com", "password": "password123"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["user"]["isAdmin"], true);
    let admin_token = session["token"].as_str().unwrap().to_string();

    let (status, _) = server
        .send(
            Method::POST,
            "/api/admin/jobs/sweep_expired_consents",
            Some(&user_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, execution) = server
        .send(
            Method::POST,
            "/api/admin/jobs/sweep_expired_consents",
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(execution["status"], "succeeded");

    let (status, _) = server
        .send(
            Method::POST,
            "/api/admin/jobs/defragment",
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, listing) = server
        .send(Method::GET, "/api/admin/jobs", Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["executions"].as_array().unwrap().len(), 1);
    assert!(listing["jobs"]
        .as_array()
        .unwrap()
        .contains(&json!("cleanup_expired_access_tokens")));

    let (status, all) = server
        .send(Method::GET, "/api/audit/all-logs", Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1, "Uma's REGISTERED record");
}
