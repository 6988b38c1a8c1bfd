use super::handlers::{health, me};
use utoipa::OpenApi;

/// Machine-readable endpoints. HTML page views are not documented.
#[derive(OpenApi)]
#[openapi(
    paths(health::health, health::version, me::users_me),
    components(schemas(health::Health, health::Version, me::LoginOk)),
    tags(
        (name = "health", description = "Liveness and build information"),
        (name = "users", description = "Session probes")
    )
)]
pub struct ApiDoc;
