pub mod backend;
pub mod error;
pub mod num_util;
pub mod serialize;
pub mod state;

pub use error::{Error, Result};
