//! Adjective/noun pairs and the length filters used to select them.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Separator placed between the adjective and the noun of a generated name.
pub const PAIR_SEPARATOR: &str = "-";

/// A single adjective + noun combination.
///
/// Pairs are never stored as-is: they are derived by joining the
/// `adjectives` and `nouns` corpora at query time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pair {
    pub adjective: String,
    pub noun: String,
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.adjective, PAIR_SEPARATOR, self.noun)
    }
}

/// How a length filter compares against the joined name length.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum LengthMode {
    /// `len(adjective) + len(noun) + 1 == length`
    Exactly,
    /// `len(adjective) + len(noun) + 1 <= length`
    #[default]
    Upto,
}

/// Constraint applied when selecting pairs.
///
/// A `length` of zero or less means "no constraint". The length always
/// accounts for the separator between both words.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RandomPairFilters {
    pub length: i64,
    pub length_mode: LengthMode,
}

impl RandomPairFilters {
    pub fn exactly(length: i64) -> Self {
        Self {
            length,
            length_mode: LengthMode::Exactly,
        }
    }

    pub fn upto(length: i64) -> Self {
        Self {
            length,
            length_mode: LengthMode::Upto,
        }
    }

    pub fn is_constrained(&self) -> bool {
        self.length > 0
    }
}

/// Aggregate numbers about the corpora, optionally narrowed by a filter.
#[derive(Serialize, Clone, Debug, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub adjective_count: i64,
    pub noun_count: i64,
    /// Size of the filtered adjective x noun cross join.
    pub pair_count: i64,
    /// On-disk size of the whole database, independent of the filter.
    pub database_size_bytes: i64,
}
