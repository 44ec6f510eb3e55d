#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod model;
pub mod sample;
pub mod time;

pub use error::CatalogError;
pub use time::Clock;
