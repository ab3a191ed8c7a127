#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, Utc};
use namebucket::services::{clock::Clock, database::Database};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;

pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Migrated database living in a throw-away directory.
pub struct TestDb {
    pub db: Database,
    dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        Self::with_timeout(OPERATION_TIMEOUT).await
    }

    pub async fn with_timeout(timeout: Duration) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db = Database::open(dir.path().join("namebucket.db"), timeout)
            .await
            .expect("open database");
        db.run_migrations().await.expect("run migrations");
        Self { db, dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("namebucket.db")
    }

    /// Migrated database seeded with `adjectives` and `nouns`.
    pub async fn seeded(adjectives: &[&str], nouns: &[&str]) -> Self {
        let test_db = Self::new().await;
        seed(&test_db.db, adjectives, nouns).await;
        test_db
    }
}

pub async fn seed(db: &Database, adjectives: &[&str], nouns: &[&str]) {
    for value in adjectives {
        sqlx::query("INSERT INTO adjectives (value) VALUES (?)")
            .bind(*value)
            .execute(db.writer())
            .await
            .expect("seed adjective");
    }
    for value in nouns {
        sqlx::query("INSERT INTO nouns (value) VALUES (?)")
            .bind(*value)
            .execute(db.writer())
            .await
            .expect("seed noun");
    }
}

/// `count` generated words of the form `<prefix><n>`.
pub fn words(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|n| format!("{}{}", prefix, n)).collect()
}

pub fn as_strs(words: &[String]) -> Vec<&str> {
    words.iter().map(String::as_str).collect()
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
