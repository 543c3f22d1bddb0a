//! Web server for the mini app verification page

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::auth::{derive_secret_key, require_telegram_auth};
use super::turnstile::TurnstileClient;
use crate::config::{Config, TlsPaths};
use crate::verification::event::DEFAULT_VERIFICATION_TIMEOUT;
use crate::verification::{SharedVerificationRegistry, VerificationState};

const INDEX_TEMPLATE: &str = include_str!("index.html");

/// Web server configuration
pub struct WebServerConfig {
    pub listen_addr: SocketAddr,
    pub tls: Option<TlsPaths>,
}

impl WebServerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            listen_addr: config.listen_addr,
            tls: config.tls(),
        }
    }
}

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedVerificationRegistry,
    pub turnstile: TurnstileClient,
    pub secret_key: Arc<Vec<u8>>,
    pub testing: bool,
    pub page: Arc<String>,
}

impl AppState {
    pub fn new(
        registry: SharedVerificationRegistry,
        turnstile: TurnstileClient,
        bot_token: &str,
        site_key: &str,
        testing: bool,
    ) -> Self {
        Self {
            registry,
            turnstile,
            secret_key: Arc::new(derive_secret_key(bot_token)),
            testing,
            page: Arc::new(render_index(site_key)),
        }
    }
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    token: String,
}

pub fn error_body(message: &str) -> Value {
    json!({ "error": message, "success": false })
}

fn success_body(message: &str) -> Value {
    json!({ "success": true, "data": message })
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(error_body(message))).into_response()
}

fn render_index(site_key: &str) -> String {
    INDEX_TEMPLATE
        .replace("__VERIFY_URL__", "verify")
        .replace("__SITE_KEY__", site_key)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/verify", post(verify))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server, over TLS when certificate files are configured
pub async fn start_web_server(config: WebServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    match config.tls {
        Some(tls) => {
            info!("Loading TLS certificate {}", tls.cert.display());
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(|e| anyhow::anyhow!(
                    "Failed to load TLS files {} and {}: {}",
                    tls.cert.display(),
                    tls.key.display(),
                    e
                ))?;
            info!("Web server listening on https://{}", config.listen_addr);
            axum_server::bind_rustls(config.listen_addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
            info!("Web server listening on http://{}", listener.local_addr()?);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

/// GET / - the mini app page
async fn index(State(state): State<AppState>) -> Html<String> {
    Html(state.page.as_ref().clone())
}

/// POST /verify - check a solved challenge for the authenticated user
async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let auth = match require_telegram_auth(&headers, &state.secret_key, state.testing) {
        Ok(auth) => auth,
        Err(response) => return response,
    };

    let token = match payload {
        Ok(Json(body)) if !body.token.is_empty() => body.token,
        _ => return unauthorized("missing token"),
    };

    let remote_ip = headers
        .get("CF-Connecting-IP")
        .and_then(|v| v.to_str().ok());

    let verdict = match state.turnstile.verify(&token, remote_ip).await {
        Ok(verdict) => verdict,
        Err(e) => {
            error!("Challenge check for user {} failed: {}", auth.user.id, e);
            return unauthorized("challenge verification unavailable");
        }
    };

    let user = &auth.user;
    let (event, existed) = state.registry.get_or_create(
        user.id,
        user.username_or_empty(),
        DEFAULT_VERIFICATION_TIMEOUT,
    );
    if existed {
        event.update_username(user.username_or_empty());
        event.persist();
    }

    if !verdict.success {
        warn!(
            "User {} failed the challenge: {:?}",
            user.id, verdict.error_codes
        );
        event.set_state(VerificationState::Failed);
        return unauthorized("Human verification failed!");
    }

    event.set_state(VerificationState::Succeeded);
    if event.state() != VerificationState::Succeeded {
        info!("User {} passed the challenge after the window closed", user.id);
        return unauthorized("Verification window closed, please request to join again");
    }

    info!("User {} ({}) passed verification", user.id, user.full_name());
    (StatusCode::OK, Json(success_body("Verification successful!"))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::{create_shared_verification_registry, TransitionPolicy};
    use crate::web::auth::test_support::init_data_for;
    use crate::web::auth::TESTING_USER_ID;
    use axum::Form;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;

    const TOKEN: &str = "123456:TEST-TOKEN";

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Stand-in provider: the token "pass" succeeds, anything else fails
    async fn fake_provider() -> SocketAddr {
        async fn siteverify(Form(form): Form<HashMap<String, String>>) -> Json<Value> {
            if form.get("response").map(String::as_str) == Some("pass") {
                Json(json!({ "success": true, "error-codes": [] }))
            } else {
                Json(json!({ "success": false, "error-codes": ["invalid-input-response"] }))
            }
        }
        serve(Router::new().route("/siteverify", post(siteverify))).await
    }

    async fn start_app(testing: bool, provider_url: &str) -> (SocketAddr, SharedVerificationRegistry) {
        let registry = create_shared_verification_registry(None, TransitionPolicy::default());
        let state = AppState::new(
            registry.clone(),
            TurnstileClient::with_url("secret", provider_url),
            TOKEN,
            "site-key-123",
            testing,
        );
        (serve(router(state)).await, registry)
    }

    async fn post_verify(addr: SocketAddr, auth: Option<String>, body: Value) -> (StatusCode, Value) {
        let mut request = reqwest::Client::new()
            .post(format!("http://{}/verify", addr))
            .json(&body);
        if let Some(auth) = auth {
            request = request.header("Authorization", auth);
        }
        let response = request.send().await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_index_page_substitutions() {
        let provider = fake_provider().await;
        let (addr, _) = start_app(true, &format!("http://{}/siteverify", provider)).await;

        let page = reqwest::get(format!("http://{}/", addr)).await.unwrap().text().await.unwrap();
        assert!(page.contains("site-key-123"));
        assert!(page.contains("fetch(\"verify\""));
        assert!(!page.contains("__SITE_KEY__"));
    }

    #[tokio::test]
    async fn test_success_marks_user_succeeded() {
        let provider = fake_provider().await;
        let (addr, registry) = start_app(false, &format!("http://{}/siteverify", provider)).await;

        let init_data = init_data_for(501, Utc::now(), &derive_secret_key(TOKEN));
        let (status, body) = post_verify(
            addr,
            Some(format!("Telegram {}", init_data)),
            json!({ "token": "pass" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let event = registry.get(501).unwrap();
        assert_eq!(event.state(), VerificationState::Succeeded);
        assert_eq!(event.username(), "ann");
    }

    #[tokio::test]
    async fn test_failed_challenge_marks_user_failed() {
        let provider = fake_provider().await;
        let (addr, registry) = start_app(true, &format!("http://{}/siteverify", provider)).await;

        let (status, body) = post_verify(addr, None, json!({ "token": "nope" })).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Human verification failed!");
        assert_eq!(registry.get(TESTING_USER_ID).unwrap().state(), VerificationState::Failed);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_without_event() {
        let provider = fake_provider().await;
        let (addr, registry) = start_app(false, &format!("http://{}/siteverify", provider)).await;

        let init_data = init_data_for(502, Utc::now(), &derive_secret_key("999:OTHER"));
        let (status, _) = post_verify(
            addr,
            Some(format!("Telegram {}", init_data)),
            json!({ "token": "pass" }),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(registry.get(502).is_none());
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let provider = fake_provider().await;
        let (addr, registry) = start_app(true, &format!("http://{}/siteverify", provider)).await;

        let (status, body) = post_verify(addr, None, json!({})).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing token");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_provider_unreachable_leaves_state_untouched() {
        let closed = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let (addr, registry) = start_app(true, &format!("http://{}/siteverify", closed)).await;
        let (existing, _) = registry.get_or_create(TESTING_USER_ID, "testing", Duration::from_secs(60));

        let (status, _) = post_verify(addr, None, json!({ "token": "pass" })).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(existing.state(), VerificationState::Verifying);
    }

    #[tokio::test]
    async fn test_success_after_failure_is_rejected() {
        let provider = fake_provider().await;
        let (addr, registry) = start_app(true, &format!("http://{}/siteverify", provider)).await;
        let (event, _) = registry.get_or_create(TESTING_USER_ID, "testing", Duration::from_secs(60));
        event.set_state(VerificationState::Failed);

        let (status, _) = post_verify(addr, None, json!({ "token": "pass" })).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(event.state(), VerificationState::Failed);
    }
}
