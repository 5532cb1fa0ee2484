pub mod auth;
pub mod confirm;
pub mod purge;
pub mod scan;
pub mod store;
