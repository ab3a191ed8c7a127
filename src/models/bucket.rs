//! Represents a bucket: a named, pre-shuffled sequence of unique names that
//! is consumed one value at a time.

use super::pair::{LengthMode, RandomPairFilters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bucket of pre-generated names.
///
/// Buckets are created empty, filled once with a random permutation of every
/// pair matching their filter, and then popped until exhausted. An archived
/// bucket is read-only until it is recovered or swept.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Row identifier assigned on insert.
    pub id: i64,

    /// Unique, DNS label compatible bucket name.
    pub name: String,

    /// Free-form description, empty when not provided.
    pub description: String,

    /// Order id of the next value to emit. Zero until the bucket is filled.
    pub cursor: i64,

    /// Whether a length filter was requested at creation time.
    pub filter_length_enabled: bool,

    /// Length comparison mode, only present when the filter is enabled.
    pub filter_length_mode: Option<LengthMode>,

    /// Length value, only present when the filter is enabled.
    pub filter_length_value: Option<i64>,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// Last time the cursor or any mutable field changed.
    pub updated_at: Option<DateTime<Utc>>,

    /// Set while the bucket is archived.
    pub archived_at: Option<DateTime<Utc>>,
}

impl Bucket {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Rebuild the filters this bucket was created with.
    pub fn filters(&self) -> RandomPairFilters {
        if !self.filter_length_enabled {
            return RandomPairFilters::default();
        }

        RandomPairFilters {
            length: self.filter_length_value.unwrap_or_default(),
            length_mode: self.filter_length_mode.unwrap_or_default(),
        }
    }
}

/// A single materialized value of a bucket.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BucketValue {
    pub bucket_id: i64,
    pub value: String,
    /// Position in the permutation computed at fill time, starting at 1.
    pub order_id: i64,
}

/// Options accepted when listing buckets.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    /// Return archived buckets instead of active ones.
    pub archived_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket() -> Bucket {
        Bucket {
            id: 1,
            name: "b1".into(),
            description: String::new(),
            cursor: 0,
            filter_length_enabled: false,
            filter_length_mode: None,
            filter_length_value: None,
            created_at: Utc::now(),
            updated_at: None,
            archived_at: None,
        }
    }

    #[test]
    fn filters_default_when_disabled() {
        let mut b = bucket();
        b.filter_length_value = Some(12);
        assert_eq!(b.filters(), RandomPairFilters::default());
    }

    #[test]
    fn filters_rebuilt_when_enabled() {
        let mut b = bucket();
        b.filter_length_enabled = true;
        b.filter_length_mode = Some(LengthMode::Exactly);
        b.filter_length_value = Some(6);
        assert_eq!(b.filters(), RandomPairFilters::exactly(6));
    }

    #[test]
    fn archived_follows_timestamp() {
        let mut b = bucket();
        assert!(!b.is_archived());
        b.archived_at = Some(Utc::now());
        assert!(b.is_archived());
    }
}
