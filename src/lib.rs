pub mod anonymity;
pub mod buckets;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod policy;
pub mod record;
pub mod technique;

pub use error::{AnonymizationError, Result};
