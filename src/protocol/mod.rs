//! Memcached ASCII protocol implementation (client side)

pub mod command;
pub mod parser;
pub mod response;

pub use command::{Command, MAX_KEY_LENGTH, is_valid_key, validate_key};
pub use parser::{ParseResult, parse_reply};
pub use response::{Reply, ValueItem};
