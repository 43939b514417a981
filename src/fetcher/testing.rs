//! In-memory portal used by the indexer, hybrid and catalog tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::app::{PortalError, Result};
use crate::fetcher::{Fetcher, Portal};

#[derive(Debug, Clone)]
pub struct Request {
    pub kind: String,
    pub action: String,
    pub params: BTreeMap<String, String>,
}

impl Request {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn page(&self) -> Option<u32> {
        self.param("p").and_then(|p| p.parse().ok())
    }
}

type Handler = dyn Fn(&Request) -> Result<Value> + Send + Sync;

/// Portal whose responses come from a closure; every request is recorded.
pub struct ScriptedPortal {
    handler: Box<Handler>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedPortal {
    pub fn new(handler: impl Fn(&Request) -> Result<Value> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Pages requested for `category` via `get_ordered_list`, in order.
    pub fn pages_for(&self, category: &str) -> Vec<u32> {
        self.requests()
            .iter()
            .filter(|r| r.action == "get_ordered_list" && r.param("category") == Some(category))
            .filter_map(Request::page)
            .collect()
    }
}

#[async_trait]
impl Portal for ScriptedPortal {
    async fn fetch_raw(
        &self,
        kind: &str,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<u8>> {
        let request = Request {
            kind: kind.to_string(),
            action: action.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        };
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        let value = (self.handler)(&request)?;
        Ok(serde_json::to_vec(&value)?)
    }
}

pub fn item_json(id: &str, added: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Movie {id}"),
        "cmd": format!("ffmpeg http://cdn.example/{id}.mkv"),
        "added": added,
    })
}

pub fn page_response(total: usize, per_page: usize, items: Vec<Value>) -> Value {
    json!({
        "js": {
            "total_items": total.to_string(),
            "max_page_items": per_page,
            "data": items,
        }
    })
}

/// Serves `total` items for `category`, IDs `<category>-<n>`, newest first.
pub fn paged_category(category: &str, total: usize, per_page: usize, request: &Request) -> Value {
    let page = request.page().unwrap_or(0) as usize;
    let items = (page * per_page..((page + 1) * per_page).min(total))
        .map(|n| item_json(&format!("{category}-{n}"), &format!("2024-01-{:02} 00:00:00", 28 - n % 28)))
        .collect();
    page_response(total, per_page, items)
}

/// Failure the scripted portal hands back in place of a response.
pub fn scripted_failure(message: &str) -> PortalError {
    PortalError::Other(message.to_string())
}

/// Byte fetcher counting downloads per URL.
pub struct CountingFetcher {
    body: Vec<u8>,
    calls: Mutex<Vec<String>>,
    delay: std::time::Duration,
}

impl CountingFetcher {
    pub fn new(body: Vec<u8>, delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            body,
            calls: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(url.to_string());
        tokio::time::sleep(self.delay).await;
        Ok(self.body.clone())
    }
}
