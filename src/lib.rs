pub mod auth;
pub mod compactor;
pub mod datetime;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sql;
pub mod wal;
pub mod wire;
