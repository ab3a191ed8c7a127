//! src/services/pair_service.rs
//!
//! Pair generator: random single pair selection and corpus statistics.
//!
//! `one_random` avoids materializing the cross product. It picks a random
//! anchor id inside each corpus id range and returns the first matching row at
//! or above both anchors. When nothing matches above the anchors the search
//! wraps around to the lowest ids, so `NoMatchingPairs` is only reported when
//! the filter excludes every pair. The distribution is skewed towards ids that
//! follow gaps or sit after non-matching rows; callers must not assume uniform
//! output.

use super::{
    database::Database,
    error::{ServiceError, ServiceResult},
    filters::{PairAliases, build_predicate},
};
use crate::models::pair::{Pair, RandomPairFilters, Stats};
use rand::Rng;
use tracing::debug;

const PAIR_ALIASES: PairAliases = PairAliases::new("a", "n");

const ID_RANGES_SQL: &str = "SELECT
    (SELECT MIN(id) FROM adjectives),
    (SELECT MAX(id) FROM adjectives),
    (SELECT MIN(id) FROM nouns),
    (SELECT MAX(id) FROM nouns)";

#[derive(Clone)]
pub struct PairGenerator {
    db: Database,
}

impl PairGenerator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Generate a formatted `adjective-noun` name.
    pub async fn generate(&self, filters: &RandomPairFilters) -> ServiceResult<String> {
        let pair = self.one_random(filters).await?;
        Ok(pair.to_string())
    }

    /// Select one random pair matching `filters`.
    pub async fn one_random(&self, filters: &RandomPairFilters) -> ServiceResult<Pair> {
        let predicate = build_predicate(filters, PAIR_ALIASES);

        self.db
            .read_tx("one_random_pair", move |conn| {
                Box::pin(async move {
                    let ranges: (Option<i64>, Option<i64>, Option<i64>, Option<i64>) =
                        sqlx::query_as(ID_RANGES_SQL).fetch_one(&mut *conn).await?;
                    let (Some(adj_min), Some(adj_max), Some(noun_min), Some(noun_max)) = ranges
                    else {
                        return Err(ServiceError::NoMatchingPairs);
                    };

                    let adjective_anchor = pick_anchor(adj_min, adj_max);
                    let noun_anchor = pick_anchor(noun_min, noun_max);

                    let anchored_sql = format!(
                        "SELECT a.value, n.value
                         FROM adjectives a JOIN nouns n
                         WHERE a.id >= ? AND n.id >= ? AND {}
                         LIMIT 1",
                        predicate.sql
                    );
                    let anchored = predicate
                        .bind_query_as(
                            sqlx::query_as::<_, (String, String)>(&anchored_sql)
                                .bind(adjective_anchor)
                                .bind(noun_anchor),
                        )
                        .fetch_optional(&mut *conn)
                        .await?;

                    let row = match anchored {
                        Some(row) => Some(row),
                        None => {
                            debug!(adjective_anchor, noun_anchor, "no pair above anchors, wrapping");
                            let wrapped_sql = format!(
                                "SELECT a.value, n.value
                                 FROM adjectives a JOIN nouns n
                                 WHERE {}
                                 ORDER BY a.id < ?, a.id, n.id < ?, n.id
                                 LIMIT 1",
                                predicate.sql
                            );
                            predicate
                                .bind_query_as(sqlx::query_as::<_, (String, String)>(&wrapped_sql))
                                .bind(adjective_anchor)
                                .bind(noun_anchor)
                                .fetch_optional(&mut *conn)
                                .await?
                        }
                    };

                    let (adjective, noun) = row.ok_or(ServiceError::NoMatchingPairs)?;
                    Ok(Pair { adjective, noun })
                })
            })
            .await
    }

    /// Corpus counts, the filtered pair count and the database size.
    pub async fn stats(&self, filters: &RandomPairFilters) -> ServiceResult<Stats> {
        let predicate = build_predicate(filters, PAIR_ALIASES);

        self.db
            .read_tx("pair_stats", move |conn| {
                Box::pin(async move {
                    let sql = format!(
                        "SELECT
                            (SELECT COUNT(*) FROM adjectives) AS adjective_count,
                            (SELECT COUNT(*) FROM nouns) AS noun_count,
                            (SELECT COUNT(*) FROM adjectives a CROSS JOIN nouns n WHERE {}) AS pair_count,
                            (SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()) AS database_size_bytes",
                        predicate.sql
                    );
                    let stats = predicate
                        .bind_query_as(sqlx::query_as::<_, Stats>(&sql))
                        .fetch_one(&mut *conn)
                        .await?;
                    Ok(stats)
                })
            })
            .await
    }
}

fn pick_anchor(min: i64, max: i64) -> i64 {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_stays_within_range() {
        for _ in 0..500 {
            let anchor = pick_anchor(3, 9);
            assert!((3..=9).contains(&anchor));
        }
    }

    #[test]
    fn anchor_of_single_id_range() {
        assert_eq!(pick_anchor(7, 7), 7);
    }
}
