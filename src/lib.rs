pub mod core;
pub mod delivery;
pub mod ingest;
pub mod observability;
pub mod storage;
pub mod watch;
