//! HTTP implementation of [`ResourceRepository`].
//!
//! `GET/POST {base}/{endpoint}`, `GET/PUT/DELETE {base}/{endpoint}/{id}`.
//! Status mapping: 404 → `NotFound`, 400/409/422 → `Validation`, anything else
//! unsuccessful (or a transport error) → `Network`.

#![forbid(unsafe_code)]

use std::marker::PhantomData;
use std::time::Instant;

use anyhow::Context;
use metrics::{counter, histogram};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{info, warn};
use vitrine_core::draft::Payload;
use vitrine_core::resource::Resource;
use vitrine_core::ResourceId;

use crate::{wire, Ack, ApiConfig, ApiError, ApiResult, ResourceRepository};

pub struct RestRepository<R> {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Resource> RestRepository<R> {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vitrine/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            _kind: PhantomData,
        })
    }

    pub fn collection_url(&self) -> String { format!("{}/{}", self.base_url, R::ENDPOINT) }

    pub fn item_url(&self, id: &ResourceId) -> String {
        format!("{}/{}/{}", self.base_url, R::ENDPOINT, id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let rb = self.client.request(method, url);
        match &self.token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    async fn send(&self, op: &'static str, rb: RequestBuilder) -> ApiResult<Value> {
        let t0 = Instant::now();
        let resp = rb.send().await.map_err(|e| {
            warn!(kind = R::KIND, op, error = %e, "api: transport failed");
            counter!("vitrine_http_errors_total", 1u64, "op" => op);
            ApiError::Network(e.to_string())
        })?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;
        histogram!("vitrine_http_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
        info!(kind = R::KIND, op, status = status.as_u16(), took_ms = %t0.elapsed().as_millis(), "api: response");
        classify(status, &body)?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Network(format!("malformed response: {}", e)))
    }
}

/// Map an HTTP status (and error body) onto the error taxonomy.
pub fn classify(status: StatusCode, body: &str) -> ApiResult<()> {
    if status.is_success() {
        return Ok(());
    }
    let msg = wire::error_message(body).unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::NOT_FOUND => Err(ApiError::NotFound(msg)),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(ApiError::Validation(msg))
        }
        _ => Err(ApiError::Network(format!("http {}: {}", status.as_u16(), msg))),
    }
}

#[async_trait::async_trait]
impl<R: Resource> ResourceRepository<R> for RestRepository<R> {
    async fn list(&self) -> ApiResult<Vec<R>> {
        let url = self.collection_url();
        let v = self.send("list", self.request(Method::GET, &url)).await?;
        wire::decode_list(v)
    }

    async fn get(&self, id: &ResourceId) -> ApiResult<R> {
        let url = self.item_url(id);
        let v = self.send("get", self.request(Method::GET, &url)).await?;
        wire::decode(v)
    }

    async fn create(&self, payload: Payload) -> ApiResult<R> {
        let url = self.collection_url();
        let v = self.send("create", self.request(Method::POST, &url).json(&payload)).await?;
        let created: R = wire::decode(v)?;
        if created.id().is_none() {
            return Err(ApiError::Network("create response carried no id".into()));
        }
        Ok(created)
    }

    async fn update(&self, id: &ResourceId, payload: Payload) -> ApiResult<R> {
        let url = self.item_url(id);
        let v = self.send("update", self.request(Method::PUT, &url).json(&payload)).await?;
        wire::decode(v)
    }

    async fn delete(&self, id: &ResourceId) -> ApiResult<Ack> {
        let url = self.item_url(id);
        self.send("delete", self.request(Method::DELETE, &url)).await?;
        Ok(Ack { id: id.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_core::resource::{Advertisement, Review};

    #[test]
    fn urls_follow_endpoint() {
        let cfg = ApiConfig { base_url: "https://svc.test/api/".into(), token: None };
        let ads = RestRepository::<Advertisement>::new(&cfg).unwrap();
        assert_eq!(ads.collection_url(), "https://svc.test/api/annonces");
        assert_eq!(ads.item_url(&"42".into()), "https://svc.test/api/annonces/42");
        let reviews = RestRepository::<Review>::new(&cfg).unwrap();
        assert_eq!(reviews.collection_url(), "https://svc.test/api/avis");
    }

    #[test]
    fn status_classification() {
        assert!(classify(StatusCode::OK, "").is_ok());
        assert!(classify(StatusCode::NO_CONTENT, "").is_ok());
        assert_eq!(
            classify(StatusCode::NOT_FOUND, r#"{"message":"annonce introuvable"}"#),
            Err(ApiError::NotFound("annonce introuvable".into()))
        );
        assert!(matches!(classify(StatusCode::UNPROCESSABLE_ENTITY, "{}"), Err(ApiError::Validation(_))));
        let err = classify(StatusCode::BAD_GATEWAY, "").unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("502"));
    }
}
