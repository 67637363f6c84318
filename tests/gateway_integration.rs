//! Integration tests for the session stage of the gateway
//!
//! Tests the full flow: cookies -> session resolution -> identity refresh ->
//! redirect or application handler.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use sessiongate::config::{Config, IdentityConfig};
use sessiongate::gateway::Gateway;
use sessiongate::session::{Circle, CircleId, SessionContext};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use url::form_urlencoded;

fn jwt(user: &str, exp: i64) -> String {
    encode(
        &Header::default(),
        &json!({"id": user, "exp": exp}),
        &EncodingKey::from_secret(b"identity-secret"),
    )
    .unwrap()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Identity service that rotates refresh tokens and rejects reuse
#[derive(Clone, Default)]
struct Identity {
    calls: Arc<AtomicUsize>,
    used: Arc<Mutex<HashSet<String>>>,
}

async fn refresh(State(identity): State<Identity>, Json(body): Json<Value>) -> Response {
    let token = body["refresh_token"].as_str().unwrap_or_default().to_string();
    let n = identity.calls.fetch_add(1, Ordering::SeqCst);

    if token == "revoked" || !identity.used.lock().unwrap().insert(token) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"errors": [{"message": "invalid"}]}))).into_response();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    Json(json!({
        "data": {
            "access_token": jwt("user-7", now() + 900),
            "refresh_token": format!("rotated-{}", n),
            "expires": 900_000,
        }
    }))
    .into_response()
}

async fn start_identity() -> (String, Identity) {
    let identity = Identity::default();
    let app = Router::new()
        .route("/auth/refresh", post(refresh))
        .with_state(identity.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), identity)
}

/// Application behind the gateway: reports the session it was handed
fn app() -> Router {
    Router::new().fallback(
        |Extension(session): Extension<SessionContext>, headers: HeaderMap| async move {
            let cookie = headers
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(json!({
                "authenticated": session.is_authenticated(),
                "user_id": session.user_id,
                "cookie": cookie,
            }))
        },
    )
}

async fn gateway() -> (Router, Identity) {
    let (base_url, identity) = start_identity().await;
    let config = Config {
        identity: IdentityConfig {
            base_url,
            ..IdentityConfig::default()
        },
        ..Config::default()
    };
    let gateway = Gateway::new(config).unwrap();
    (gateway.wrap(app()), identity)
}

fn get_with_cookie(uri: &str, cookie: Option<&str>) -> Request {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn circles_cookie(ids: &[i64]) -> String {
    let circles: Vec<Circle> = ids
        .iter()
        .map(|id| Circle {
            name: format!("circle-{}", id),
            id: CircleId::Number(*id),
        })
        .collect();
    serde_json::to_string(&circles).unwrap()
}

#[tokio::test]
async fn test_public_paths_never_redirect() {
    let (gateway, _) = gateway().await;

    for path in ["/", "/auth/sign-in", "/auth/sign-up", "/auth/password/reset", "/imprint/termsofuse"] {
        let response = gateway.clone().oneshot(get_with_cookie(path, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", path);
    }
}

#[tokio::test]
async fn test_protected_path_redirects_with_return_target() {
    let (gateway, _) = gateway().await;

    let response = gateway.oneshot(get_with_cookie("/app/feed", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = location(&response);
    let (path, query) = location.split_once('?').unwrap();
    assert_eq!(path, "/auth/sign-in");
    let params: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes()).into_owned().collect();
    assert_eq!(params, vec![("redirectedFrom".to_string(), "/app/feed".to_string())]);
}

#[tokio::test]
async fn test_share_link_opens_without_session() {
    let (gateway, _) = gateway().await;

    let response = gateway
        .oneshot(get_with_cookie("/app/42?share_key=abc", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["authenticated"], false);
}

#[tokio::test]
async fn test_valid_session_reaches_application() {
    let (gateway, identity) = gateway().await;
    let cookie = format!("access_token={}; refresh_token=r", jwt("user-1", now() + 600));

    let response = gateway
        .oneshot(get_with_cookie("/app/feed", Some(&cookie)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(identity.calls.load(Ordering::SeqCst), 0);

    let body = json_body(response).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user_id"], "user-1");
}

#[tokio::test]
async fn test_expired_session_is_refreshed() {
    let (gateway, identity) = gateway().await;
    let cookie = format!("access_token={}; refresh_token=r0", jwt("user-1", now() - 10));

    let response = gateway
        .oneshot(get_with_cookie("/app/feed", Some(&cookie)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(identity.calls.load(Ordering::SeqCst), 1);

    let cookies = set_cookies(&response);
    let access = cookies.iter().find(|c| c.starts_with("access_token=")).unwrap();
    assert!(access.contains("Max-Age=900"));
    assert!(access.contains("HttpOnly"));
    let refresh = cookies.iter().find(|c| c.starts_with("refresh_token=")).unwrap();
    assert!(refresh.starts_with("refresh_token=rotated-0"));
    assert!(refresh.contains("Max-Age=2592000"));

    let body = json_body(response).await;
    assert_eq!(body["user_id"], "user-7");
    assert!(body["cookie"].as_str().unwrap().contains("refresh_token=rotated-0"));
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() {
    let (gateway, _) = gateway().await;
    let cookie = format!(
        "access_token={}; refresh_token=revoked; circles={}",
        jwt("user-1", now() - 10),
        circles_cookie(&[1])
    );

    let response = gateway
        .oneshot(get_with_cookie("/app/feed", Some(&cookie)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/auth/sign-in");

    let cookies = set_cookies(&response);
    for name in ["access_token=", "refresh_token="] {
        let cookie = cookies.iter().find(|c| c.starts_with(name)).unwrap();
        assert!(cookie.contains("Max-Age=0"), "{} not cleared", name);
    }
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_exchange() {
    let (gateway, identity) = gateway().await;
    let cookie = format!("access_token={}; refresh_token=shared", jwt("user-1", now() - 10));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let gateway = gateway.clone();
        let cookie = cookie.clone();
        handles.push(tokio::spawn(async move {
            gateway
                .oneshot(get_with_cookie("/app/feed", Some(&cookie)))
                .await
                .unwrap()
        }));
    }

    let mut rotated = HashSet::new();
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        for cookie in set_cookies(&response) {
            if let Some(rest) = cookie.strip_prefix("refresh_token=") {
                rotated.insert(rest.split(';').next().unwrap().to_string());
            }
        }
    }

    assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
    assert_eq!(rotated.len(), 1);

    // the rotated token keeps working for the next request
    let next = format!(
        "access_token={}; refresh_token={}",
        jwt("user-1", now() - 10),
        rotated.iter().next().unwrap()
    );
    let response = gateway
        .oneshot(get_with_cookie("/app/feed", Some(&next)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unauthorized_circles_are_dropped() {
    let (gateway, _) = gateway().await;
    let cookie = format!(
        "access_token={}; circles={}",
        jwt("user-1", now() + 600),
        circles_cookie(&[1, 2])
    );

    let response = gateway
        .clone()
        .oneshot(get_with_cookie("/app/feed?circles=%5B1%2C2%2C3%5D&page=2", Some(&cookie)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = location(&response);
    let (path, query) = location.split_once('?').unwrap();
    assert_eq!(path, "/app/feed");
    let params: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes()).into_owned().collect();
    assert_eq!(
        params,
        vec![
            ("circles".to_string(), "[1,2]".to_string()),
            ("page".to_string(), "2".to_string()),
        ]
    );

    // following the redirect lands on the application
    let response = gateway
        .oneshot(get_with_cookie(&location, Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
