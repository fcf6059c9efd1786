/// Single serialized control flow feeding the session hub.
pub mod coordinator;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Session, clock, room and lobby coordination.
pub mod hub;
/// Write-through mirror of sessions into the document store.
pub mod persistence;
/// Move legality and terminal position detection.
pub mod rules;
/// Read-only session projections for REST handlers.
pub mod session_service;
/// Storage connection supervision and degraded mode.
pub mod storage_supervisor;
/// Periodic clock, clock-sync and liveness activities.
pub mod timers;
/// WebSocket connection and message handling service.
pub mod websocket_service;
