pub mod dto;
pub mod error;
pub mod handlers;
pub mod import;
pub mod memory;
pub mod model;
pub mod naming;
pub mod postgres;
pub mod retry;
pub mod service;
pub mod store;
pub mod sync;
pub mod validation;
pub mod versioning;
