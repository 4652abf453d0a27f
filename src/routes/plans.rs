use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::Result;
use crate::models::Plan;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub success: bool,
    pub plans: Vec<Plan>,
}

/// List purchasable plans, cheapest first
///
/// GET /api/plans
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<PlansResponse>> {
    let plans = Plan::list_active(&state.db).await?;
    Ok(Json(PlansResponse {
        success: true,
        plans,
    }))
}
