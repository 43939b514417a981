pub mod catalog;
pub mod limiter;
pub mod session;
pub mod single_flight;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde_json::Value;

use crate::app::{PortalError, Result};

pub use catalog::{Catalog, Page};
pub use limiter::ConcurrencyLimiter;
pub use session::PortalSession;
pub use single_flight::SingleFlight;

/// Authenticated access to the portal's `load.php` API.
#[async_trait]
pub trait Portal: Send + Sync {
    /// Issues `type=<kind>&action=<action>` with the identity parameters and
    /// `params`, returning the raw response body.
    async fn fetch_raw(&self, kind: &str, action: &str, params: &[(&str, String)])
        -> Result<Vec<u8>>;

    /// Like [`fetch_raw`](Self::fetch_raw), decoded as JSON.
    async fn fetch_json(
        &self,
        kind: &str,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let body = self.fetch_raw(kind, action, params).await?;
        serde_json::from_slice(&body).map_err(|e| PortalError::decoding(e.to_string(), &body))
    }
}

/// Plain download of an absolute URL (posters, logos).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
