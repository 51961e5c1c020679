pub mod bunch;
pub mod common;
pub mod exec;
pub mod orchestrator;

pub type Error = crate::common::error::ZdError;
pub type Result<T> = std::result::Result<T, Error>;

pub use common::{Map, Set};
