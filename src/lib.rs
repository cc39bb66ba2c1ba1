use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod clerk_client;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod session;

use auth::{TokenVerifier, RESOURCE_METADATA_PATH};
use http::{MESSAGES_PATH, SSE_PATH};
use session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub authorization_server: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        verifier: Arc<dyn TokenVerifier>,
        authorization_server: Option<String>,
    ) -> Self {
        Self {
            sessions,
            verifier,
            authorization_server: authorization_server.map(Arc::from),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(SSE_PATH, get(http::handlers::sse_endpoint))
        .route(MESSAGES_PATH, post(http::handlers::messages_endpoint))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route(
            RESOURCE_METADATA_PATH,
            get(http::handlers::protected_resource_metadata),
        )
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        auth::{Identity, SharedTokenVerifier},
        clerk_client::{StaticUserDirectory, UserDirectory},
        domain::tools::build_tool_registry,
        errors::AppError,
        mcp::server::McpServer,
    };

    use super::*;

    const TOKEN: &str = "token-1234567890ab";
    const HOST: &str = "shop.example.com";

    struct UnavailableDirectory;

    #[async_trait::async_trait]
    impl UserDirectory for UnavailableDirectory {
        async fn get_user(&self, _user_id: &str) -> Result<Value, AppError> {
            Err(AppError::internal("user directory unavailable"))
        }
    }

    fn state_with(directory: Arc<dyn UserDirectory>) -> AppState {
        let server = Arc::new(McpServer::new(build_tool_registry(directory)));
        AppState::new(
            Arc::new(SessionRegistry::new(server, 8)),
            Arc::new(SharedTokenVerifier::new(TOKEN, Identity::new("user_1"))),
            Some("https://clerk.example.com".to_string()),
        )
    }

    fn app() -> Router {
        build_app(state_with(Arc::new(StaticUserDirectory)))
    }

    fn get_request(uri: &str, authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri(uri)
            .method("GET")
            .header(header::HOST, HOST);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).expect("request build")
    }

    fn post_message(session_id: &str, authorization: &str, body: String) -> Request<Body> {
        Request::builder()
            .uri(format!("/api/messages?sessionId={session_id}"))
            .method("POST")
            .header(header::HOST, HOST)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, authorization)
            .body(Body::from(body))
            .expect("request build")
    }

    async fn body_string(response: Response) -> String {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8(body.to_vec()).expect("utf8 body")
    }

    /// Reads the next SSE event and returns its `(event, data)` fields.
    async fn next_event(body: &mut Body) -> (String, String) {
        let mut raw = String::new();
        while !raw.contains("\n\n") {
            let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
                .await
                .expect("event within timeout")
                .expect("stream still open")
                .expect("frame");
            if let Ok(data) = frame.into_data() {
                raw.push_str(std::str::from_utf8(&data).expect("utf8 frame"));
            }
        }

        let mut event = String::new();
        let mut data = String::new();
        for line in raw.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                event = value.trim_start().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                data.push_str(value.trim_start());
            }
        }
        (event, data)
    }

    async fn open_stream(app: &Router) -> (Body, String) {
        let response = app
            .clone()
            .oneshot(get_request("/api/sse", Some(&format!("Bearer {TOKEN}"))))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let mut body = response.into_body();
        let (event, data) = next_event(&mut body).await;
        assert_eq!(event, "endpoint");
        let session_id = data
            .strip_prefix("/api/messages?sessionId=")
            .expect("endpoint carries session id")
            .to_string();
        (body, session_id)
    }

    async fn call(app: &Router, body: &mut Body, session_id: &str, message: Value) -> Value {
        let response = app
            .clone()
            .oneshot(post_message(
                session_id,
                &format!("Bearer {TOKEN}"),
                message.to_string(),
            ))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Accepted");

        let (event, data) = next_event(body).await;
        assert_eq!(event, "message");
        serde_json::from_str(&data).expect("json message")
    }

    fn expected_challenge() -> String {
        format!("Bearer resource_metadata=http://{HOST}/.well-known/oauth-protected-resource")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(get_request("/health", None))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn discovery_is_public() {
        let response = app()
            .oneshot(get_request("/.well-known/mcp", None))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json: Value =
            serde_json::from_str(&body_string(response).await).expect("valid json response");
        assert_eq!(body_json["sse_endpoint"], "/api/sse");
        assert_eq!(body_json["messages_endpoint"], "/api/messages");
    }

    #[tokio::test]
    async fn resource_metadata_is_public() {
        let response = app()
            .oneshot(get_request("/.well-known/oauth-protected-resource", None))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json: Value =
            serde_json::from_str(&body_string(response).await).expect("valid json response");
        assert_eq!(body_json["resource"], format!("http://{HOST}/api/sse"));
        assert_eq!(
            body_json["authorization_servers"],
            json!(["https://clerk.example.com"])
        );
    }

    #[tokio::test]
    async fn missing_authorization_returns_challenge() {
        for request in [
            get_request("/api/sse", None),
            Request::builder()
                .uri("/api/messages?sessionId=abc")
                .method("POST")
                .header(header::HOST, HOST)
                .body(Body::from("{}"))
                .expect("request build"),
        ] {
            let response = app().oneshot(request).await.expect("request execution");

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers()[header::WWW_AUTHENTICATE],
                expected_challenge().as_str()
            );
        }
    }

    #[tokio::test]
    async fn non_bearer_schemes_are_rejected() {
        for authorization in [
            "Basic dXNlcjpwYXNz".to_string(),
            format!("Token {TOKEN}"),
            TOKEN.to_string(),
        ] {
            let response = app()
                .oneshot(get_request("/api/sse", Some(&authorization)))
                .await
                .expect("request execution");

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers()[header::WWW_AUTHENTICATE],
                expected_challenge().as_str()
            );
            let body_json: Value =
                serde_json::from_str(&body_string(response).await).expect("json body");
            assert_eq!(body_json["code"], "invalid_scheme");
        }
    }

    #[tokio::test]
    async fn empty_bearer_token_is_rejected() {
        for authorization in ["Bearer", "Bearer    "] {
            let response = app()
                .oneshot(get_request("/api/sse", Some(authorization)))
                .await
                .expect("request execution");

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body_json: Value =
                serde_json::from_str(&body_string(response).await).expect("json body");
            assert_eq!(body_json["code"], "empty_token");
        }
    }

    #[tokio::test]
    async fn token_with_extra_whitespace_is_rejected() {
        for authorization in [format!("Bearer  {TOKEN}"), format!("Bearer {TOKEN} extra")] {
            let response = app()
                .oneshot(get_request("/api/sse", Some(&authorization)))
                .await
                .expect("request execution");

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers()[header::WWW_AUTHENTICATE],
                expected_challenge().as_str()
            );
            let body_json: Value =
                serde_json::from_str(&body_string(response).await).expect("json body");
            assert_eq!(body_json["code"], "malformed_token");
        }
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let response = app()
            .oneshot(get_request("/api/sse", Some("Bearer not-the-token")))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            expected_challenge().as_str()
        );
    }

    #[tokio::test]
    async fn bearer_scheme_is_case_insensitive() {
        for scheme in ["bearer", "BEARER", "BeArEr"] {
            let response = app()
                .oneshot(post_message(
                    "no-such-session",
                    &format!("{scheme} {TOKEN}"),
                    "{}".to_string(),
                ))
                .await
                .expect("request execution");

            // Past the gate: the request reaches routing and fails there instead.
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn unknown_session_returns_descriptive_body() {
        let response = app()
            .oneshot(post_message(
                "no-such-session",
                &format!("Bearer {TOKEN}"),
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"roll_dice","arguments":{"sides":6}}}"#.to_string(),
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "No transport found for sessionId");
    }

    #[tokio::test]
    async fn missing_session_id_is_treated_as_unknown() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/messages")
                    .method("POST")
                    .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                    .body(Body::from("{}"))
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "No transport found for sessionId");
    }

    #[tokio::test]
    async fn invalid_json_body_is_bad_request() {
        let response = app()
            .oneshot(post_message(
                "whatever",
                &format!("Bearer {TOKEN}"),
                "not json".to_string(),
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_round_trip_over_sse() {
        let app = app();
        let (mut body, session_id) = open_stream(&app).await;

        let initialize = call(
            &app,
            &mut body,
            &session_id,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "clientInfo": {"name": "test-client", "version": "1.0.0"},
                    "capabilities": {}
                }
            }),
        )
        .await;
        assert_eq!(initialize["id"], 1);
        assert_eq!(initialize["result"]["protocolVersion"], "2024-11-05");

        let tools = call(
            &app,
            &mut body,
            &session_id,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {}}),
        )
        .await;
        assert_eq!(tools["result"]["tools"][0]["name"], "get_clerk_user_info");
        assert_eq!(tools["result"]["tools"][1]["name"], "roll_dice");
        assert_eq!(tools["result"]["tools"][2]["name"], "get_guitar_list");
        assert_eq!(
            tools["result"]["tools"][1]["inputSchema"]["properties"]["sides"]["minimum"],
            2
        );

        let roll = call(
            &app,
            &mut body,
            &session_id,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {"name": "roll_dice", "arguments": {"sides": 6}}
            }),
        )
        .await;
        let value = roll["result"]["structuredContent"]["value"]
            .as_u64()
            .expect("rolled value");
        assert!((1..=6).contains(&value));

        let user = call(
            &app,
            &mut body,
            &session_id,
            json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {"name": "get_clerk_user_info", "arguments": {}}
            }),
        )
        .await;
        assert_eq!(user["result"]["structuredContent"]["id"], "user_1");
    }

    #[tokio::test]
    async fn rejected_parameters_keep_session_open() {
        let app = app();
        let (mut body, session_id) = open_stream(&app).await;

        let rejected = call(
            &app,
            &mut body,
            &session_id,
            json!({
                "jsonrpc": "2.0",
                "id": 10,
                "method": "tools/call",
                "params": {"name": "roll_dice", "arguments": {"sides": 1}}
            }),
        )
        .await;
        assert_eq!(rejected["error"]["code"], -32602);

        let pong = call(
            &app,
            &mut body,
            &session_id,
            json!({"jsonrpc": "2.0", "id": 11, "method": "ping", "params": {}}),
        )
        .await;
        assert_eq!(pong["id"], 11);
        assert!(pong.get("error").is_none());
    }

    #[tokio::test]
    async fn failing_tool_reports_error_part_and_stream_stays_open() {
        let app = build_app(state_with(Arc::new(UnavailableDirectory)));
        let (mut body, session_id) = open_stream(&app).await;

        let failed = call(
            &app,
            &mut body,
            &session_id,
            json!({
                "jsonrpc": "2.0",
                "id": 20,
                "method": "tools/call",
                "params": {"name": "get_clerk_user_info", "arguments": {}}
            }),
        )
        .await;
        assert_eq!(failed["result"]["isError"], true);
        let content = failed["result"]["content"]
            .as_array()
            .expect("content parts");
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "Error: user directory unavailable");

        let roll = call(
            &app,
            &mut body,
            &session_id,
            json!({
                "jsonrpc": "2.0",
                "id": 21,
                "method": "tools/call",
                "params": {"name": "roll_dice", "arguments": {"sides": 20}}
            }),
        )
        .await;
        assert!(roll["result"]["structuredContent"]["value"].is_u64());
    }

    #[tokio::test]
    async fn disconnect_removes_session() {
        let state = state_with(Arc::new(StaticUserDirectory));
        let sessions = state.sessions.clone();
        let app = build_app(state);

        let (body, session_id) = open_stream(&app).await;
        assert!(sessions.contains(&session_id));

        drop(body);
        assert!(sessions.is_empty());

        let response = app
            .oneshot(post_message(
                &session_id,
                &format!("Bearer {TOKEN}"),
                r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#.to_string(),
            ))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stalled_stream_fails_message_with_handling_error() {
        let server = Arc::new(McpServer::new(build_tool_registry(Arc::new(
            StaticUserDirectory,
        ))));
        let sessions = Arc::new(
            SessionRegistry::new(server, 1).with_delivery_timeout(Duration::from_millis(50)),
        );
        let app = build_app(AppState::new(
            sessions,
            Arc::new(SharedTokenVerifier::new(TOKEN, Identity::new("user_1"))),
            None,
        ));

        // Hold the stream open without reading past the handshake.
        let (_body, session_id) = open_stream(&app).await;
        let ping = |id: u64| json!({"jsonrpc": "2.0", "id": id, "method": "ping", "params": {}});

        let first = app
            .clone()
            .oneshot(post_message(
                &session_id,
                &format!("Bearer {TOKEN}"),
                ping(1).to_string(),
            ))
            .await
            .expect("request execution");
        assert_eq!(first.status(), StatusCode::OK);

        let second = tokio::time::timeout(
            Duration::from_secs(2),
            app.clone().oneshot(post_message(
                &session_id,
                &format!("Bearer {TOKEN}"),
                ping(2).to_string(),
            )),
        )
        .await
        .expect("request finishes instead of hanging")
        .expect("request execution");

        assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(second).await, "Error handling message");
    }
}
