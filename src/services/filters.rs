//! Length predicate shared by single pair selection and bucket fills.
//!
//! The predicate is plain SQL with `?` placeholders plus the values to bind,
//! so callers splice it into their own statement and bind the parameters at
//! the matching position.

use crate::models::pair::{LengthMode, RandomPairFilters};
use sqlx::{
    Sqlite,
    query::{Query, QueryAs},
    sqlite::SqliteArguments,
};

/// Table aliases the predicate is written against.
#[derive(Clone, Copy, Debug)]
pub struct PairAliases {
    pub adjective: &'static str,
    pub noun: &'static str,
}

impl PairAliases {
    pub const fn new(adjective: &'static str, noun: &'static str) -> Self {
        Self { adjective, noun }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairPredicate {
    pub sql: String,
    pub params: Vec<i64>,
}

impl PairPredicate {
    pub fn bind_query<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        self.params.iter().fold(query, |query, value| query.bind(*value))
    }

    pub fn bind_query_as<'q, O>(
        &self,
        query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    ) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
        self.params.iter().fold(query, |query, value| query.bind(*value))
    }
}

/// Translate `filters` into a predicate over `len(adjective) + len(noun) + 1`.
///
/// Without a length constraint the predicate is a tautology.
pub fn build_predicate(filters: &RandomPairFilters, aliases: PairAliases) -> PairPredicate {
    if !filters.is_constrained() {
        return PairPredicate {
            sql: "1 = 1".to_string(),
            params: Vec::new(),
        };
    }

    let operator = match filters.length_mode {
        LengthMode::Exactly => "=",
        LengthMode::Upto => "<=",
    };

    PairPredicate {
        sql: format!(
            "(LENGTH({}.value) + LENGTH({}.value) + 1) {} ?",
            aliases.adjective, aliases.noun, operator
        ),
        params: vec![filters.length],
    }
}
