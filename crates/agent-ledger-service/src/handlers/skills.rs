//! Skill admission: may this caller run this skill right now?

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use agent_ledger_core::{admit, SkillCall, SkillConfig};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Admission request.
#[derive(Debug, Deserialize)]
pub struct AdmitRequest {
    /// The agent's configuration of the skill's category.
    pub config: SkillConfig,
    /// Skill name inside the category.
    pub skill: String,
    /// Calling user, if known.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Whether the caller owns the agent.
    #[serde(default)]
    pub is_private: bool,
}

/// Admission response.
#[derive(Debug, Serialize)]
pub struct AdmitResponse {
    /// Always true; refusals are returned as errors.
    pub admitted: bool,
    /// Category of the skill.
    pub category: String,
}

/// Check a skill call against its configuration and the category rate limit.
pub async fn admit_skill(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(body): Json<AdmitRequest>,
) -> Result<Json<AdmitResponse>, ApiError> {
    let call = SkillCall {
        skill: &body.skill,
        user_id: body.user_id.as_deref(),
        is_private: body.is_private,
    };
    admit(&body.config, call, &state.rate_limiter)?;

    Ok(Json(AdmitResponse {
        admitted: true,
        category: body.config.category().to_string(),
    }))
}
