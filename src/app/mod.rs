pub mod context;
pub mod error;

pub use context::{AppContext, CacheStatus};
pub use error::{PortalError, Result};
