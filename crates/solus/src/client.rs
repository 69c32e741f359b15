//! HTTP client side of the control plane.
//!
//! Used by a second invocation, once liveness checking has confirmed an
//! instance is running, to talk to that instance's address. Calls are
//! single-shot with no retry; transport failures propagate to the caller.

use crate::error::{Result, SolusError};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// A client bound to one live instance's base address.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: reqwest::Client,
    base: Url,
}

impl RemoteClient {
    pub fn new(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    /// GET a route and return the parsed JSON response.
    pub async fn get(&self, route: &str) -> Result<Value> {
        let uri = self.route_uri(route)?;
        debug!("GET {uri}");
        let response = self.client.get(uri).send().await?;
        Ok(response.json().await?)
    }

    /// POST a JSON payload to a route and return the parsed JSON response.
    pub async fn post(&self, route: &str, payload: Value) -> Result<Value> {
        let uri = self.route_uri(route)?;
        debug!("POST {uri}");
        let response = self.client.post(uri).json(&payload).send().await?;
        Ok(response.json().await?)
    }

    fn route_uri(&self, route: &str) -> Result<Url> {
        self.base
            .join(route.trim_start_matches('/'))
            .map_err(|e| SolusError::Address {
                message: format!("bad route {route:?}: {e}"),
            })
    }
}
