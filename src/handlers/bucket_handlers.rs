//! HTTP handlers for bucket operations. Every handler is a thin shell over
//! `BucketService`; error mapping lives in `AppError`.

use super::generate_handlers::{FiltersReq, NameResponse};
use crate::{
    errors::AppError,
    models::{
        bucket::{Bucket, ListOptions},
        pair::RandomPairFilters,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub filters: FiltersReq,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBucketReq {
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBucketsQuery {
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDetails {
    #[serde(flatten)]
    pub bucket: Bucket,
    pub remaining_pairs: i64,
}

#[derive(Debug, Serialize)]
pub struct BucketList {
    pub buckets: Vec<Bucket>,
}

async fn details(state: &AppState, bucket: Bucket) -> Result<BucketDetails, AppError> {
    let remaining_pairs = state.buckets.remaining_values_total(&bucket).await?;
    Ok(BucketDetails {
        bucket,
        remaining_pairs,
    })
}

/// `POST /api/v1/buckets`: create and fill a bucket in one transaction.
pub async fn create_bucket(
    State(state): State<AppState>,
    Json(req): Json<CreateBucketReq>,
) -> Result<(StatusCode, Json<BucketDetails>), AppError> {
    let filters = RandomPairFilters::from(req.filters);
    let bucket = state
        .buckets
        .create_filled(&req.name, &req.description, filters)
        .await?;
    Ok((StatusCode::CREATED, Json(details(&state, bucket).await?)))
}

/// `GET /api/v1/buckets?archived=true`
pub async fn list_buckets(
    State(state): State<AppState>,
    Query(query): Query<ListBucketsQuery>,
) -> Result<Json<BucketList>, AppError> {
    let buckets = state
        .buckets
        .list(ListOptions {
            archived_only: query.archived,
        })
        .await?;
    Ok(Json(BucketList { buckets }))
}

/// `GET /api/v1/buckets/{id}`
pub async fn get_bucket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BucketDetails>, AppError> {
    let bucket = state.buckets.one_by_id(id).await?;
    Ok(Json(details(&state, bucket).await?))
}

/// `PATCH /api/v1/buckets/{id}`
pub async fn update_bucket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateBucketReq>,
) -> Result<Json<BucketDetails>, AppError> {
    let mut bucket = state.buckets.one_by_id(id).await?;
    bucket.description = req.description;
    state.buckets.save(&mut bucket).await?;
    Ok(Json(details(&state, bucket).await?))
}

/// `POST /api/v1/buckets/{id}/pop`
pub async fn pop_bucket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NameResponse>, AppError> {
    let bucket = state.buckets.one_by_id(id).await?;
    let name = state.buckets.pop(&bucket).await?;
    Ok(Json(NameResponse { name }))
}

/// `POST /api/v1/buckets/{id}/archive`
pub async fn archive_bucket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BucketDetails>, AppError> {
    let mut bucket = state.buckets.one_by_id(id).await?;
    state.buckets.archive(&mut bucket).await?;
    Ok(Json(details(&state, bucket).await?))
}

/// `POST /api/v1/buckets/{id}/recover`
pub async fn recover_bucket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BucketDetails>, AppError> {
    let mut bucket = state.buckets.one_by_id(id).await?;
    state.buckets.recover(&mut bucket).await?;
    Ok(Json(details(&state, bucket).await?))
}
