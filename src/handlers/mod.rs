pub mod bucket_handlers;
pub mod generate_handlers;
pub mod health_handlers;
