#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod slug;
pub mod time;

pub use error::ValidationError;
pub use time::Clock;
