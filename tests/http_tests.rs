//! End-to-end HTTP tests: the real router served on a loopback port, backed by the
//! in-process store and a verifier loaded with the fixture signing key.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

use chanchito::identity::{AccessGate, CognitoSettings, CognitoVerifier, Jwks};
use chanchito::models;
use chanchito::resource::ResourceAdapter;
use chanchito::server::{self, AppState};
use chanchito::storage::{ExecutionMode, MemoryStore, Orm, SharedStore};

const PRIVATE_PEM: &str = include_str!("fixtures/idp_rsa.pem");
const JWKS: &str = include_str!("fixtures/idp_jwks.json");
const KID: &str = "test-key-1";

fn settings() -> CognitoSettings {
    CognitoSettings { region: "us-east-1".into(), user_pool_id: "us-east-1_TEST".into(), client_id: "client-1".into() }
}

struct Harness {
    base: String,
    mem: Arc<MemoryStore>,
    http: reqwest::Client,
}

impl Harness {
    async fn start(protect_resources: bool) -> Result<Self> {
        let mem = Arc::new(MemoryStore::new());
        let orm = Orm::new(SharedStore::from(mem.clone()), ExecutionMode::Transactional);
        let schemas = models::all()?;
        server::ensure_schema(&orm, &schemas).await?;

        let jwks: Jwks = serde_json::from_str(JWKS)?;
        let verifier = CognitoVerifier::with_jwks(settings(), jwks, Duration::from_secs(1))?
            .with_jwks_url("http://127.0.0.1:9/jwks.json");
        let state = AppState { gate: AccessGate::new(Arc::new(verifier)), oauth: None, protect_resources };
        let adapters = schemas.into_iter().map(|s| ResourceAdapter::new(s, orm.clone())).collect();
        let app = server::build_router(state, adapters);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { base: format!("http://{addr}"), mem, http: reqwest::Client::new() })
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base, path) }
}

fn sign(claims: Value) -> String {
    let header = Header { kid: Some(KID.to_string()), ..Header::new(Algorithm::RS256) };
    let key = EncodingKey::from_rsa_pem(PRIVATE_PEM.as_bytes()).expect("fixture key");
    encode(&header, &claims, &key).expect("sign")
}

fn access_token(exp_offset: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    sign(json!({
        "sub": "abc-123", "token_use": "access", "client_id": "client-1", "username": "papo",
        "iss": settings().issuer(), "iat": now, "exp": now + exp_offset,
    }))
}

fn id_token() -> String {
    let now = chrono::Utc::now().timestamp();
    sign(json!({
        "sub": "abc-123", "token_use": "id", "aud": "client-1", "cognito:username": "papo",
        "email": "papo@chanchitofeliz.com", "iss": settings().issuer(), "iat": now, "exp": now + 600,
    }))
}

fn user_body(uid: &str, email: &str) -> Value {
    json!({
        "uid": uid, "displayName": "Papo", "email": email, "providerId": "google.com", "hosts": ["chanchito.net"],
    })
}

#[tokio::test]
async fn liveness() -> Result<()> {
    let h = Harness::start(true).await?;
    let resp = h.http.get(h.url("/")).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await?, "chanchito ok");
    Ok(())
}

#[tokio::test]
async fn login_requires_a_valid_bearer_token() -> Result<()> {
    let h = Harness::start(true).await?;

    let resp = h.http.get(h.url("/login")).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers()["www-authenticate"], "Bearer");
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "unauthorized");

    let resp = h.http.get(h.url("/login")).bearer_auth(access_token(-60)).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let mut forged = access_token(600);
    forged.truncate(forged.len() - 4);
    forged.push_str("AAAA");
    let resp = h.http.get(h.url("/login")).bearer_auth(forged).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = h.http.get(h.url("/login")).bearer_auth(access_token(600)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<String>().await?, "Hello");
    Ok(())
}

#[tokio::test]
async fn access_and_user_greetings() -> Result<()> {
    let h = Harness::start(true).await?;

    let resp = h.http.get(h.url("/access/")).bearer_auth(access_token(600)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await?, json!({ "message": "Hello", "sub": "abc-123" }));
    let resp = h.http.get(h.url("/access/")).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = h.http.get(h.url("/user/")).bearer_auth(id_token()).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<String>().await?, "Hello, papo");
    let resp = h.http.get(h.url("/user/")).bearer_auth(access_token(600)).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn token_exchange_without_configuration() -> Result<()> {
    let h = Harness::start(true).await?;
    let resp = h.http.get(h.url("/login/token")).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = h.http.get(h.url("/login/token?code=abc")).send().await?;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.json::<Value>().await?["code"], "not_configured");
    Ok(())
}

#[tokio::test]
async fn protected_resources_reject_anonymous_callers() -> Result<()> {
    let h = Harness::start(true).await?;
    let before = h.mem.calls();
    let resp = h.http.post(h.url("/prototypes")).json(&json!({ "name": "p", "description": "d" })).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.mem.calls(), before);

    let resp = h
        .http
        .post(h.url("/prototypes"))
        .bearer_auth(access_token(600))
        .json(&json!({ "name": "p", "description": "d" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    Ok(())
}

#[tokio::test]
async fn crud_round_trip() -> Result<()> {
    let h = Harness::start(false).await?;

    let resp = h
        .http
        .post(h.url("/prototypes"))
        .json(&json!({ "name": "piggy", "description": "bank", "color": "pink", "ts": 1 }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = resp.json().await?;
    assert_eq!(created["data"], json!({ "name": "piggy", "description": "bank" }));
    let id = created["ref"]["id"].as_str().unwrap_or_default().to_string();
    assert_ne!(created["ts"], json!(1));

    let fetched: Value = h.http.get(h.url(&format!("/prototypes/{id}"))).send().await?.json().await?;
    assert_eq!(fetched["data"], created["data"]);
    assert!(fetched["ts"].as_i64() >= created["ts"].as_i64());

    let resp = h.http.put(h.url(&format!("/prototypes/{id}"))).json(&json!({ "url": "https://chanchito.net" })).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await?;
    assert_eq!(updated["data"]["url"], "https://chanchito.net");
    assert_eq!(updated["data"]["name"], "piggy");

    let resp = h.http.delete(h.url(&format!("/prototypes/{id}"))).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await?, json!({}));

    let resp = h.http.get(h.url(&format!("/prototypes/{id}"))).send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn request_shape_errors() -> Result<()> {
    let h = Harness::start(false).await?;
    let before = h.mem.calls();

    let resp = h.http.get(h.url("/prototypes?colour=pink")).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = h.http.get(h.url("/prototypes/1?colour=pink")).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = h.http.post(h.url("/prototypes")).body("[]").send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = h.http.post(h.url("/prototypes/batch")).json(&json!({ "name": "x" })).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = h.http.post(h.url("/prototypes")).body("{\"name\":").send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.mem.calls(), before);

    let resp = h.http.post(h.url("/users")).json(&user_body("u1", "not-an-email")).send().await?;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = resp.json().await?;
    assert_eq!(body["errors"][0]["path"], "email");
    assert_eq!(h.mem.calls(), before);
    Ok(())
}

#[tokio::test]
async fn index_listing_and_count_routes() -> Result<()> {
    let h = Harness::start(false).await?;
    for (uid, email) in [("u1", "a@chanchito.net"), ("u2", "b@chanchito.net"), ("u3", "a@chanchito.net")] {
        let resp = h.http.post(h.url("/users")).json(&user_body(uid, email)).send().await?;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let all: Value = h.http.get(h.url("/users")).send().await?.json().await?;
    assert_eq!(all.as_array().map(Vec::len), Some(3));

    let hits: Value = h.http.get(h.url("/users?email=a%40chanchito.net")).send().await?.json().await?;
    let uids: Vec<&str> = hits.as_array().into_iter().flatten().filter_map(|r| r["data"]["uid"].as_str()).collect();
    assert_eq!(uids, ["u1", "u3"]);

    let count: Value = h.http.get(h.url("/users/count?uid=u2")).send().await?.json().await?;
    assert_eq!(count, json!({ "count": 1 }));
    let count: Value = h.http.get(h.url("/users/count")).send().await?.json().await?;
    assert_eq!(count, json!({ "count": 3 }));

    let resp = h.http.get(h.url("/users?displayName=Papo")).send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn batch_routes_preserve_order() -> Result<()> {
    let h = Harness::start(false).await?;
    let resp = h
        .http
        .post(h.url("/prototypes/batch"))
        .json(&json!([
            { "name": "a", "description": "1" },
            { "name": "b", "description": "2" },
            { "name": "c", "description": "3" },
        ]))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = resp.json().await?;
    let ids: Vec<String> = created
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|r| r["ref"]["id"].as_str().map(str::to_string))
        .collect();
    assert_eq!(ids.len(), 3);

    let wanted = json!([ids[2], ids[0]]);
    let fetched: Value = h.http.post(h.url("/prototypes/fetch")).json(&wanted).send().await?.json().await?;
    assert_eq!(fetched[0]["data"]["name"], "c");
    assert_eq!(fetched[1]["data"]["name"], "a");

    let resp = h
        .http
        .put(h.url("/prototypes/batch"))
        .json(&json!([{ "ref": ids[0], "description": "one" }, { "ref": ids[1], "description": "two" }]))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await?;
    assert_eq!(updated[1]["data"], json!({ "name": "b", "description": "two" }));

    let resp = h.http.post(h.url("/prototypes/fetch")).json(&json!([ids[0], "999999"])).send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = h.http.delete(h.url("/prototypes/batch")).json(&json!([ids[0], ids[1]])).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.mem.len("prototypes"), 1);
    Ok(())
}

#[tokio::test]
async fn request_id_is_echoed() -> Result<()> {
    let h = Harness::start(false).await?;
    let resp = h.http.get(h.url("/")).send().await?;
    let minted = resp.headers().get("x-request-id").and_then(|v| v.to_str().ok()).unwrap_or_default();
    assert!(uuid::Uuid::parse_str(minted).is_ok());

    let resp = h.http.get(h.url("/")).header("x-request-id", "trace-me-42").send().await?;
    assert_eq!(resp.headers()["x-request-id"], "trace-me-42");
    Ok(())
}
