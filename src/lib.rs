pub mod cli;
pub mod config;
pub mod convert;
pub mod crypt;
pub mod destination;
pub mod encrypt;
pub mod error;
pub mod key_management;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod utils;

pub use crypt::OperatorKey;
pub use error::{Error, ErrorLocation, ErrorMeta, KeepsakeError, Result, ResultExt};
pub use keepsake_macros::error_context;
