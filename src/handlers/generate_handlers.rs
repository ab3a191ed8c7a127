//! HTTP handlers for one-off name generation and corpus statistics.

use crate::{
    errors::AppError,
    models::pair::{LengthMode, RandomPairFilters, Stats},
    state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

/// Length filter as accepted over the wire. Both fields are optional; a
/// length without a mode means `upto`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiltersReq {
    pub length: Option<i64>,
    pub length_mode: Option<LengthMode>,
}

impl From<FiltersReq> for RandomPairFilters {
    fn from(req: FiltersReq) -> Self {
        RandomPairFilters {
            length: req.length.unwrap_or_default(),
            length_mode: req.length_mode.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateReq {
    #[serde(default)]
    pub filters: FiltersReq,
}

#[derive(Debug, Serialize)]
pub struct NameResponse {
    pub name: String,
}

/// `POST /api/v1/generate`
pub async fn generate(
    State(state): State<AppState>,
    body: Option<Json<GenerateReq>>,
) -> Result<Json<NameResponse>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let filters = RandomPairFilters::from(req.filters);
    let name = state.pairs.generate(&filters).await?;
    Ok(Json(NameResponse { name }))
}

/// `GET /api/v1/stats?length=&lengthMode=`
pub async fn stats(
    State(state): State<AppState>,
    Query(filters): Query<FiltersReq>,
) -> Result<Json<Stats>, AppError> {
    let stats = state.pairs.stats(&filters.into()).await?;
    Ok(Json(stats))
}
