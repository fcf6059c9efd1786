use serde::Serialize;
use utoipa::ToSchema;

/// Overall availability reported by `/healthcheck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Sessions are being persisted.
    Ok,
    /// No session store is reachable; sessions run in memory only.
    Degraded,
}

/// Body of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Whether a session store is currently installed.
    pub storage: bool,
}

impl HealthResponse {
    /// Derive the response from storage availability.
    pub fn from_storage(available: bool) -> Self {
        Self {
            status: if available {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            storage: available,
        }
    }
}
