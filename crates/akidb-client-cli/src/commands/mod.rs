pub mod info;
pub mod ingest;
pub mod query;
