use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for Arena Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::get_session,
        crate::routes::sessions::get_lobby,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::lobby::LobbyListing,
            crate::dto::lobby::JoinableSummary,
            crate::dto::lobby::WatchableSummary,
            crate::dto::session::SessionSnapshot,
            crate::dto::session::ClockSnapshot,
            crate::dto::session::MoveSummary,
            crate::dto::session::SessionResultSummary,
            crate::dto::ws::InboundMessage,
            crate::dto::ws::OutboundMessage,
            crate::dao::models::SessionStatus,
            crate::state::session::ResultKind,
            crate::state::session::Side,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Read-only session and lobby views"),
        (name = "participants", description = "WebSocket protocol for players and spectators"),
    )
)]
pub struct ApiDoc;
