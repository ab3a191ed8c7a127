use crate::services::{
    bucket_service::BucketService, database::Database, pair_service::PairGenerator,
};

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub pairs: PairGenerator,
    pub buckets: BucketService,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self {
            pairs: PairGenerator::new(db.clone()),
            buckets: BucketService::new(db.clone()),
            db,
        }
    }
}
