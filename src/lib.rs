pub mod audit;
pub mod auth;
pub mod compactor;
pub mod engine;
pub mod gateway;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod store;
pub mod tls;
pub mod venue;
pub mod wire;
