use super::*;

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use mockall::predicate::eq;
use switchyard_common::{Policy, Route};

use crate::directory::{Account, MockAccountDirectory, MockRoleService};
use crate::identity::{decode_for_test, AccountCache, IdentityResolver, TokenMinter};
use crate::policy::StaticPolicy;
use crate::routing::DirectorTable;

const SECRET: &str = "s3cr3t";

fn claims() -> Claims {
    Claims {
        email: "a@x.com".into(),
        preferred_username: "alice".into(),
        display_name: "Alice A".into(),
    }
}

fn routing(routes: Vec<Route>) -> RoutingEngine {
    let table = DirectorTable::build(&[Policy {
        name: "default".into(),
        routes,
    }])
    .unwrap();
    RoutingEngine::new(table, Arc::new(StaticPolicy::new("default")))
}

fn identity(directory: MockAccountDirectory, roles: MockRoleService) -> IdentityMiddleware {
    let resolver = IdentityResolver::new(
        Arc::new(directory),
        AccountCache::new(16, Duration::from_secs(60)),
    );
    IdentityMiddleware::new(
        Arc::new(resolver),
        Arc::new(roles),
        TokenMinter::new(SECRET).unwrap(),
    )
}

/// Upstream that answers 200 and echoes what it received in headers
fn echo_upstream(times: usize) -> MockUpstream {
    let mut upstream = MockUpstream::new();
    upstream.expect_forward().times(times).returning(|req| {
        let mut response = Response::new(Body::empty());
        let echoed = response.headers_mut();
        echoed.insert(
            "x-seen-uri",
            HeaderValue::from_str(&req.uri().to_string()).unwrap(),
        );
        if let Some(token) = req.headers().get(ACCESS_TOKEN_HEADER) {
            echoed.insert("x-seen-token", token.clone());
        }
        if let Some(host) = req.headers().get(header::HOST) {
            echoed.insert("x-seen-host", host.clone());
        }
        Ok(response)
    });
    upstream
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "gateway.example.com")
        .body(Body::empty())
        .unwrap()
}

// ========================================================================
// Identity + routing through the engine
// ========================================================================

#[tokio::test]
async fn test_first_login_provisions_and_forwards_with_token() {
    let mut directory = MockAccountDirectory::new();
    // Once on the cache miss, once more under the provisioning lock
    directory
        .expect_list_accounts()
        .times(2)
        .returning(|_, _| Ok(vec![]));
    directory
        .expect_create_account()
        .times(1)
        .returning(|a| {
            Ok(Account {
                id: "new-1".into(),
                ..a
            })
        });
    let mut roles = MockRoleService::new();
    roles
        .expect_list_role_assignments()
        .with(eq("new-1"))
        .returning(|_| Ok(vec![]));

    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/service1/", "http://backend:1111")]),
        Some(identity(directory, roles)),
        Arc::new(echo_upstream(1)),
    );

    let response = engine
        .handle(Some(&claims()), get("/service1/foo/bar"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["x-seen-uri"],
        "http://backend:1111/service1/foo/bar"
    );
    let token = response.headers()["x-seen-token"].to_str().unwrap();
    assert_eq!(decode_for_test(token, SECRET).sub, "new-1");
    assert!(decode_for_test(token, SECRET).roles.is_empty());

    let cached = engine
        .identity()
        .unwrap()
        .resolver()
        .cache()
        .get("a@x.com")
        .unwrap();
    assert_eq!(cached.id, "new-1");
}

#[tokio::test]
async fn test_disabled_account_is_unauthorized() {
    let mut directory = MockAccountDirectory::new();
    directory.expect_list_accounts().returning(|_, _| {
        Ok(vec![Account {
            id: "1".into(),
            account_enabled: false,
            ..Default::default()
        }])
    });
    let mut roles = MockRoleService::new();
    roles.expect_list_role_assignments().returning(|_| Ok(vec![]));

    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/", "http://backend:1")]),
        Some(identity(directory, roles)),
        Arc::new(echo_upstream(0)),
    );

    let err = engine
        .handle(Some(&claims()), get("/files"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_claims_without_email_are_unauthorized() {
    let mut directory = MockAccountDirectory::new();
    directory.expect_list_accounts().times(0);
    directory.expect_create_account().times(0);
    let mut roles = MockRoleService::new();
    roles.expect_list_role_assignments().times(0);

    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/", "http://backend:1")]),
        Some(identity(directory, roles)),
        Arc::new(echo_upstream(0)),
    );

    for user in ["alice", "bob"] {
        let claims = Claims {
            email: String::new(),
            preferred_username: user.into(),
            display_name: user.into(),
        };
        let err = engine
            .handle(Some(&claims), get("/files"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_ambiguous_account_is_forbidden() {
    let mut directory = MockAccountDirectory::new();
    directory.expect_list_accounts().returning(|_, _| {
        Ok(vec![
            Account {
                id: "1".into(),
                account_enabled: true,
                ..Default::default()
            },
            Account {
                id: "2".into(),
                account_enabled: true,
                ..Default::default()
            },
        ])
    });
    directory.expect_create_account().times(0);
    let mut roles = MockRoleService::new();
    roles.expect_list_role_assignments().times(0);

    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/", "http://backend:1")]),
        Some(identity(directory, roles)),
        Arc::new(echo_upstream(0)),
    );

    let err = engine
        .handle(Some(&claims()), get("/files"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_no_route_is_bad_gateway() {
    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/only/", "http://backend:1")]),
        None,
        Arc::new(echo_upstream(0)),
    );

    let err = engine.handle(None, get("/elsewhere")).await.unwrap_err();
    assert!(matches!(err, Error::NoRoute(_)));
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_client_supplied_token_is_stripped() {
    let mut directory = MockAccountDirectory::new();
    directory.expect_list_accounts().times(0);
    let mut roles = MockRoleService::new();
    roles.expect_list_role_assignments().times(0);

    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/", "http://backend:1")]),
        Some(identity(directory, roles)),
        Arc::new(echo_upstream(1)),
    );

    let mut request = get("/files");
    request
        .headers_mut()
        .insert(ACCESS_TOKEN_HEADER, HeaderValue::from_static("forged"));

    let response = engine.handle(None, request).await.unwrap();
    assert!(response.headers().get("x-seen-token").is_none());
}

#[tokio::test]
async fn test_identity_disabled_forwards_without_token() {
    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/", "http://backend:1")]),
        None,
        Arc::new(echo_upstream(1)),
    );

    let response = engine.handle(Some(&claims()), get("/files")).await.unwrap();
    assert!(response.headers().get("x-seen-token").is_none());
    assert_eq!(response.headers()["x-seen-uri"], "http://backend:1/files");
}

#[tokio::test]
async fn test_vhost_route_overwrites_host() {
    let engine = ProxyEngine::new(
        routing(vec![
            Route::prefix("/", "http://backend:1"),
            Route {
                apache_vhost: true,
                ..Route::prefix("/remote.php/", "http://oc10:8080")
            },
        ]),
        None,
        Arc::new(echo_upstream(2)),
    );

    let response = engine.handle(None, get("/remote.php/dav")).await.unwrap();
    assert_eq!(response.headers()["x-seen-host"], "oc10:8080");

    let response = engine.handle(None, get("/index.php")).await.unwrap();
    assert_eq!(response.headers()["x-seen-host"], "gateway.example.com");
}

#[tokio::test]
async fn test_upstream_error_is_bad_gateway() {
    let mut upstream = MockUpstream::new();
    upstream
        .expect_forward()
        .returning(|_| Err(Error::Upstream("connection refused".into())));

    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/", "http://backend:1")]),
        None,
        Arc::new(upstream),
    );

    let err = engine.handle(None, get("/")).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
}

// ========================================================================
// Header hygiene
// ========================================================================

#[test]
fn test_strip_hop_by_hop_headers() {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-trace"));
    headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    headers.insert(header::PROXY_AUTHORIZATION, HeaderValue::from_static("Basic x"));
    headers.insert("x-trace", HeaderValue::from_static("1"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

    strip_hop_by_hop_headers(&mut headers);

    assert_eq!(headers.len(), 1);
    assert!(headers.contains_key(header::CONTENT_TYPE));
}

// ========================================================================
// Real forwarding over the network
// ========================================================================

async fn spawn_backend() -> String {
    use axum::routing::{get as get_route, post};
    use axum::Router;

    let router = Router::new()
        .route(
            "/echo",
            post(|headers: HeaderMap, body: String| async move {
                let ua = headers
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("<absent>")
                    .to_string();
                let proxy_auth = headers.contains_key(header::PROXY_AUTHORIZATION);
                (
                    [("x-user-agent", ua), ("x-proxy-auth", proxy_auth.to_string())],
                    body,
                )
            }),
        )
        .route(
            "/moved",
            get_route(|| async {
                (
                    StatusCode::FOUND,
                    [(header::LOCATION, "/elsewhere")],
                    "",
                )
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_reqwest_upstream_streams_and_strips() {
    let backend = spawn_backend().await;
    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/", backend.clone())]),
        None,
        Arc::new(ReqwestUpstream::new().unwrap()),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .header(header::PROXY_AUTHORIZATION, "Basic c2VjcmV0")
        .body(Body::from("hello backend"))
        .unwrap();

    let response = engine.handle(None, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-user-agent"], "");
    assert_eq!(response.headers()["x-proxy-auth"], "false");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"hello backend");
}

#[tokio::test]
async fn test_reqwest_upstream_relays_redirects() {
    let backend = spawn_backend().await;
    let engine = ProxyEngine::new(
        routing(vec![Route::prefix("/", backend)]),
        None,
        Arc::new(ReqwestUpstream::new().unwrap()),
    );

    let response = engine.handle(None, get("/moved")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/elsewhere");
}
