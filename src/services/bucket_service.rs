//! src/services/bucket_service.rs
//!
//! BucketService: lifecycle of buckets and the cursor based pop protocol.
//!
//! A bucket moves through `created -> filled -> (archived <-> recovered) ->
//! removed`. Filling materializes one random permutation of every matching
//! pair as `bucket_values` rows numbered `1..=N`; popping reads the row at the
//! bucket cursor and advances the cursor to the next existing order id.
//!
//! Every mutation runs in one immediate-lock write transaction on the single
//! writer connection. In particular the cursor is read and advanced inside
//! the same transaction, so two concurrent pops can never emit the same value.

use super::{
    clock::{Clock, SystemClock},
    database::Database,
    error::{ServiceError, ServiceResult, is_unique_violation},
    filters::{PairAliases, build_predicate},
};
use crate::models::{
    bucket::{Bucket, BucketValue, ListOptions},
    pair::{PAIR_SEPARATOR, RandomPairFilters},
};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::SqliteConnection;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

const BUCKET_NAME_MAX_LEN: usize = 63;

const FILL_ALIASES: PairAliases = PairAliases::new("adj", "noun");

const SELECT_BUCKET_SQL: &str = "SELECT id, name, description, cursor, filter_length_enabled,
        filter_length_mode, filter_length_value, created_at, updated_at, archived_at
     FROM buckets";

const ADVANCE_CURSOR_SQL: &str = "UPDATE buckets
     SET cursor = COALESCE(
             (SELECT MIN(order_id) FROM bucket_values
              WHERE bucket_id = buckets.id AND order_id > buckets.cursor),
             buckets.cursor + 1),
         updated_at = ?
     WHERE id = ?";

#[derive(Clone)]
pub struct BucketService {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl BucketService {
    pub fn new(db: Database) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Validate bucket name format.
    ///
    /// Names are lowercase DNS labels: 1–63 characters of lowercase letters,
    /// digits and hyphens, starting and ending with a letter or digit.
    fn ensure_bucket_name_safe(name: &str) -> ServiceResult<()> {
        let invalid = |reason: &str| ServiceError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        if name.is_empty() || name.len() > BUCKET_NAME_MAX_LEN {
            return Err(invalid("must be between 1 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, and hyphens",
            ));
        }

        if name.starts_with('-') || name.ends_with('-') {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        Ok(())
    }

    /// Insert a new, unfilled bucket.
    ///
    /// Returns BucketAlreadyExists if the name is taken.
    pub async fn create(
        &self,
        name: &str,
        description: &str,
        filters: RandomPairFilters,
    ) -> ServiceResult<Bucket> {
        Self::ensure_bucket_name_safe(name)?;

        let name = name.to_string();
        let description = description.to_string();
        let created_at = self.clock.now();

        let bucket = self
            .db
            .write_tx("create_bucket", move |conn| {
                Box::pin(async move {
                    insert_bucket(conn, name, &description, filters, created_at).await
                })
            })
            .await?;

        info!(bucket_id = bucket.id, name = %bucket.name, "bucket created");
        Ok(bucket)
    }

    /// Materialize a random permutation of every pair matching `filters`.
    ///
    /// Runs as one transaction: values are inserted with order ids `1..=N` and
    /// the cursor is set to 1. A bucket can only be filled once; a second fill
    /// returns BucketAlreadyFilled and writes nothing. A filter matching no
    /// pair returns NoMatchingPairs and leaves the bucket unfilled.
    pub async fn fill(&self, bucket: &Bucket, filters: &RandomPairFilters) -> ServiceResult<u64> {
        let filters = *filters;
        let bucket_id = bucket.id;
        let name = bucket.name.clone();
        let now = self.clock.now();

        let inserted = self
            .db
            .write_tx("fill_bucket", move |conn| {
                Box::pin(async move {
                    let state: Option<(i64, Option<DateTime<Utc>>, i64)> = sqlx::query_as(
                        "SELECT cursor, archived_at,
                            (SELECT COUNT(*) FROM bucket_values WHERE bucket_id = buckets.id)
                         FROM buckets WHERE id = ?",
                    )
                    .bind(bucket_id)
                    .fetch_optional(&mut *conn)
                    .await?;

                    let Some((cursor, archived_at, existing)) = state else {
                        return Err(ServiceError::BucketNotFound(name));
                    };
                    if archived_at.is_some() {
                        return Err(ServiceError::BucketArchived(name));
                    }
                    if cursor > 0 || existing > 0 {
                        return Err(ServiceError::BucketAlreadyFilled(name));
                    }

                    insert_values(conn, bucket_id, &filters, now).await
                })
            })
            .await?;

        info!(bucket_id, inserted, "bucket filled");
        Ok(inserted)
    }

    /// Create a bucket and fill it in a single transaction.
    ///
    /// When the fill fails (typically NoMatchingPairs) the insert is rolled
    /// back too, so the name stays free.
    pub async fn create_filled(
        &self,
        name: &str,
        description: &str,
        filters: RandomPairFilters,
    ) -> ServiceResult<Bucket> {
        Self::ensure_bucket_name_safe(name)?;

        let name = name.to_string();
        let description = description.to_string();
        let now = self.clock.now();

        let (bucket, inserted) = self
            .db
            .write_tx("create_filled_bucket", move |conn| {
                Box::pin(async move {
                    let mut bucket =
                        insert_bucket(&mut *conn, name, &description, filters, now).await?;
                    let inserted = insert_values(conn, bucket.id, &filters, now).await?;
                    bucket.cursor = 1;
                    bucket.updated_at = Some(now);
                    Ok((bucket, inserted))
                })
            })
            .await?;

        info!(bucket_id = bucket.id, name = %bucket.name, inserted, "bucket created and filled");
        Ok(bucket)
    }

    /// Emit the value at the bucket cursor and advance the cursor.
    ///
    /// The bucket state is re-read inside the write transaction; the cursor
    /// carried by `bucket` is ignored.
    pub async fn pop(&self, bucket: &Bucket) -> ServiceResult<String> {
        let bucket_id = bucket.id;
        let name = bucket.name.clone();
        let now = self.clock.now();

        let value = self
            .db
            .write_tx("pop_bucket_value", move |conn| {
                Box::pin(async move {
                    let state: Option<(i64, Option<DateTime<Utc>>)> =
                        sqlx::query_as("SELECT cursor, archived_at FROM buckets WHERE id = ?")
                            .bind(bucket_id)
                            .fetch_optional(&mut *conn)
                            .await?;

                    let Some((cursor, archived_at)) = state else {
                        return Err(ServiceError::BucketNotFound(name));
                    };
                    if archived_at.is_some() {
                        return Err(ServiceError::BucketArchived(name));
                    }

                    let value: Option<String> = sqlx::query_scalar(
                        "SELECT value FROM bucket_values WHERE bucket_id = ? AND order_id = ?",
                    )
                    .bind(bucket_id)
                    .bind(cursor)
                    .fetch_optional(&mut *conn)
                    .await?;

                    let Some(value) = value else {
                        return Err(ServiceError::BucketExhausted(name));
                    };

                    sqlx::query(ADVANCE_CURSOR_SQL)
                        .bind(now)
                        .bind(bucket_id)
                        .execute(&mut *conn)
                        .await?;

                    Ok(value)
                })
            })
            .await?;

        debug!(bucket_id, "popped bucket value");
        Ok(value)
    }

    /// Administrative cursor override.
    pub async fn set_cursor(&self, bucket_id: i64, cursor: i64) -> ServiceResult<()> {
        let now = self.clock.now();

        self.db
            .write_tx("set_bucket_cursor", move |conn| {
                Box::pin(async move {
                    let result =
                        sqlx::query("UPDATE buckets SET cursor = ?, updated_at = ? WHERE id = ?")
                            .bind(cursor)
                            .bind(now)
                            .bind(bucket_id)
                            .execute(&mut *conn)
                            .await?;
                    if result.rows_affected() == 0 {
                        return Err(ServiceError::BucketNotFound(bucket_id.to_string()));
                    }
                    Ok(())
                })
            })
            .await
    }

    /// Persist the mutable fields of `bucket`: description and archived_at.
    ///
    /// `updated_at` is refreshed both in storage and on `bucket`.
    pub async fn save(&self, bucket: &mut Bucket) -> ServiceResult<()> {
        let bucket_id = bucket.id;
        let name = bucket.name.clone();
        let description = bucket.description.clone();
        let archived_at = bucket.archived_at;
        let now = self.clock.now();

        self.db
            .write_tx("save_bucket", move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        "UPDATE buckets SET description = ?, archived_at = ?, updated_at = ?
                         WHERE id = ?",
                    )
                    .bind(&description)
                    .bind(archived_at)
                    .bind(now)
                    .bind(bucket_id)
                    .execute(&mut *conn)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(ServiceError::BucketNotFound(name));
                    }
                    Ok(())
                })
            })
            .await?;

        bucket.updated_at = Some(now);
        Ok(())
    }

    /// Mark the bucket read-only. Archiving an archived bucket keeps the
    /// original timestamp.
    pub async fn archive(&self, bucket: &mut Bucket) -> ServiceResult<()> {
        if bucket.archived_at.is_none() {
            bucket.archived_at = Some(self.clock.now());
        }
        self.save(bucket).await?;
        info!(bucket_id = bucket.id, "bucket archived");
        Ok(())
    }

    /// Make an archived bucket poppable again, from where it left off.
    pub async fn recover(&self, bucket: &mut Bucket) -> ServiceResult<()> {
        bucket.archived_at = None;
        self.save(bucket).await?;
        info!(bucket_id = bucket.id, "bucket recovered");
        Ok(())
    }

    /// List either active or archived buckets, newest first.
    pub async fn list(&self, opts: ListOptions) -> ServiceResult<Vec<Bucket>> {
        let sql = format!(
            "{} WHERE archived_at IS {} NULL ORDER BY created_at DESC, id DESC",
            SELECT_BUCKET_SQL,
            if opts.archived_only { "NOT" } else { "" }
        );

        self.db
            .read_tx("list_buckets", move |conn| {
                Box::pin(async move {
                    let buckets = sqlx::query_as::<_, Bucket>(&sql)
                        .fetch_all(&mut *conn)
                        .await?;
                    Ok(buckets)
                })
            })
            .await
    }

    /// Number of values not yet popped, measured against the stored cursor.
    pub async fn remaining_values_total(&self, bucket: &Bucket) -> ServiceResult<i64> {
        let bucket_id = bucket.id;

        self.db
            .read_tx("remaining_bucket_values", move |conn| {
                Box::pin(async move {
                    let count = sqlx::query_scalar::<_, i64>(
                        "SELECT COUNT(*)
                         FROM bucket_values v JOIN buckets b ON b.id = v.bucket_id
                         WHERE b.id = ? AND v.order_id >= b.cursor",
                    )
                    .bind(bucket_id)
                    .fetch_one(&mut *conn)
                    .await?;
                    Ok(count)
                })
            })
            .await
    }

    /// All materialized values of a bucket in permutation order.
    pub async fn values(&self, bucket: &Bucket) -> ServiceResult<Vec<BucketValue>> {
        let bucket_id = bucket.id;

        self.db
            .read_tx("bucket_values", move |conn| {
                Box::pin(async move {
                    let values = sqlx::query_as::<_, BucketValue>(
                        "SELECT bucket_id, value, order_id FROM bucket_values
                         WHERE bucket_id = ? ORDER BY order_id ASC",
                    )
                    .bind(bucket_id)
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(values)
                })
            })
            .await
    }

    pub async fn one_by_name(&self, name: &str) -> ServiceResult<Bucket> {
        let name = name.to_string();
        let sql = format!("{} WHERE name = ?", SELECT_BUCKET_SQL);

        self.db
            .read_tx("bucket_by_name", move |conn| {
                Box::pin(async move {
                    let bucket = sqlx::query_as::<_, Bucket>(&sql)
                        .bind(&name)
                        .fetch_optional(&mut *conn)
                        .await?;
                    bucket.ok_or(ServiceError::BucketNotFound(name))
                })
            })
            .await
    }

    pub async fn one_by_id(&self, id: i64) -> ServiceResult<Bucket> {
        let sql = format!("{} WHERE id = ?", SELECT_BUCKET_SQL);

        self.db
            .read_tx("bucket_by_id", move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, Bucket>(&sql)
                        .bind(id)
                        .fetch_optional(&mut *conn)
                        .await?
                        .ok_or_else(|| ServiceError::BucketNotFound(id.to_string()))
                })
            })
            .await
    }

    /// Delete every bucket, and its values, archived before `now - retention`.
    ///
    /// Returns the number of buckets removed.
    pub async fn remove_buckets_archived_for_more_than(
        &self,
        retention: Duration,
    ) -> ServiceResult<u64> {
        let now = self.clock.now();
        let cutoff = TimeDelta::from_std(retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let removed = self
            .db
            .write_tx("remove_archived_buckets", move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "DELETE FROM bucket_values WHERE bucket_id IN (
                            SELECT id FROM buckets WHERE archived_at IS NOT NULL AND archived_at < ?
                         )",
                    )
                    .bind(cutoff)
                    .execute(&mut *conn)
                    .await?;

                    let result = sqlx::query(
                        "DELETE FROM buckets WHERE archived_at IS NOT NULL AND archived_at < ?",
                    )
                    .bind(cutoff)
                    .execute(&mut *conn)
                    .await?;

                    Ok(result.rows_affected())
                })
            })
            .await?;

        if removed > 0 {
            info!(removed, %cutoff, "removed archived buckets");
        }
        Ok(removed)
    }
}

async fn insert_bucket(
    conn: &mut SqliteConnection,
    name: String,
    description: &str,
    filters: RandomPairFilters,
    created_at: DateTime<Utc>,
) -> ServiceResult<Bucket> {
    let enabled = filters.is_constrained();

    sqlx::query_as::<_, Bucket>(
        "INSERT INTO buckets (
            name, description, cursor, created_at,
            filter_length_enabled, filter_length_mode, filter_length_value
         ) VALUES (?, ?, 0, ?, ?, ?, ?)
         RETURNING id, name, description, cursor, filter_length_enabled,
             filter_length_mode, filter_length_value, created_at, updated_at, archived_at",
    )
    .bind(&name)
    .bind(description)
    .bind(created_at)
    .bind(enabled)
    .bind(enabled.then_some(filters.length_mode))
    .bind(enabled.then_some(filters.length))
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ServiceError::BucketAlreadyExists(name.clone())
        } else {
            ServiceError::Sqlx(err)
        }
    })
}

/// Insert the shuffled matching pairs as order ids `1..=N` and point the
/// cursor at the first one.
async fn insert_values(
    conn: &mut SqliteConnection,
    bucket_id: i64,
    filters: &RandomPairFilters,
    now: DateTime<Utc>,
) -> ServiceResult<u64> {
    let predicate = build_predicate(filters, FILL_ALIASES);
    let sql = format!(
        "INSERT INTO bucket_values (bucket_id, value, order_id)
         SELECT ?, adj.value || '{}' || noun.value, ROW_NUMBER() OVER (ORDER BY RANDOM())
         FROM adjectives adj JOIN nouns noun
         WHERE {}",
        PAIR_SEPARATOR, predicate.sql
    );
    let inserted = predicate
        .bind_query(sqlx::query(&sql).bind(bucket_id))
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if inserted == 0 {
        return Err(ServiceError::NoMatchingPairs);
    }

    sqlx::query("UPDATE buckets SET cursor = 1, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(bucket_id)
        .execute(&mut *conn)
        .await?;

    Ok(inserted)
}
