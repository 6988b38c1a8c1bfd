use crate::{
    api::handlers::{
        auth::{
            AuthConfig, AuthState, admin, context::session_layer, csrf::csrf_layer, login, password,
            principal::{admin_required, login_required},
            settings, signup,
        },
        contact, error_page, health, me, root,
    },
    cache::{Cache, MemoryCache, RedisCache},
    mail::Mailer,
    store::{MemoryUserStore, PgUserStore, UserStore},
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware,
    response::Response,
    routing::{get, post},
};
use sqlx::postgres::PgPoolOptions;
use std::{any::Any, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span, warn};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::ApiDoc;

/// `--redis-url` value that keeps sessions, tokens and users in process memory.
pub const MEMORY_BACKEND: &str = "memory://";

/// Build the application router around `state`.
///
/// Layer order, outermost first: panic guard, request id, tracing, shared state,
/// session, CSRF. Member and admin routes add their own guard on top.
pub fn app(state: Arc<AuthState>) -> Router {
    let members = Router::new()
        .route("/me", get(me::dashboard))
        .route(
            "/settings",
            get(settings::settings_page).post(settings::settings),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            login_required,
        ));

    let admins = Router::new()
        .route("/admin/impersonate", post(admin::impersonate))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_required,
        ));

    Router::new()
        .route("/", get(root::root))
        .route("/login", get(login::login_page).post(login::login))
        .route("/logout", get(login::logout))
        .route("/signup", get(signup::signup_page).post(signup::signup))
        .route(
            "/forgot-password",
            get(password::forgot_password_page).post(password::forgot_password),
        )
        .route("/settings/confirm-email", get(settings::confirm_email))
        .route("/contact", get(contact::contact_page).post(contact::contact))
        .route("/health", get(health::health).options(health::health))
        .route("/v1/version", get(health::version))
        .route("/v1/users/me", get(me::users_me))
        .merge(members)
        .merge(admins)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state.clone()))
                .layer(middleware::from_fn_with_state(state.clone(), session_layer))
                .layer(middleware::from_fn_with_state(state, csrf_layer)),
        )
}

/// Start the server
/// # Errors
/// Return error if the backends are unreachable or the server fails to start
pub async fn new(
    port: u16,
    dsn: Option<String>,
    redis_url: &str,
    auth_config: AuthConfig,
    mailer: Mailer,
) -> Result<()> {
    let (cache, store) = connect_backends(dsn, redis_url).await?;

    if !mailer.enabled() {
        warn!("Email is disabled; signup verification and password resets will not be sent");
    }

    let state = Arc::new(AuthState::new(auth_config, cache, store, mailer));
    let app = app(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn connect_backends(
    dsn: Option<String>,
    redis_url: &str,
) -> Result<(Arc<dyn Cache>, Arc<dyn UserStore>)> {
    if redis_url == MEMORY_BACKEND {
        warn!("Using in-memory cache and user store; all data is lost on restart");
        return Ok((Arc::new(MemoryCache::new()), Arc::new(MemoryUserStore::new())));
    }

    let cache = RedisCache::connect(redis_url)
        .await
        .context("Failed to connect to redis")?;

    let dsn = dsn.context("missing required argument: --dsn")?;

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let store = PgUserStore::new(pool);
    store
        .migrate()
        .await
        .context("Failed to apply database schema")?;

    Ok((Arc::new(cache), Arc::new(store)))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {detail}");

    error_page(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
        "Something went wrong.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::LOCATION;
    use tower::ServiceExt;

    fn state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:8080".to_string()),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryUserStore::new()),
            Mailer::disabled(),
        ))
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let response = app(state())
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn members_area_redirects_anonymous_visitors() {
        let response = app(state())
            .oneshot(Request::get("/me").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("/login?next=%2Fme")
        );
    }

    #[tokio::test]
    async fn health_reports_memory_backends() {
        let response = app(state())
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));
    }

    #[test]
    fn panic_handler_returns_500() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
