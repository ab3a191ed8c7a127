//! Service layer: storage access, pair generation, bucket engine and the
//! background scheduler.

pub mod bucket_service;
pub mod clock;
pub mod database;
pub mod error;
pub mod filters;
pub mod pair_service;
pub mod scheduler;

pub use error::{ServiceError, ServiceResult};
