//! Query parameter extractors for list endpoints.

use serde::Deserialize;
use uuid::Uuid;

/// Query parameters for `GET /api/v1/executions`.
#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// Query parameters for `GET /api/v1/workflows`.
#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub tenant_id: Uuid,
}
