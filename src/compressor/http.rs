use crate::compressor::intercept::{EndpointMatcher, HostRequest, HostResponse, Transport};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::Method;
use std::time::Duration;

/// Real network dispatcher behind the interception layer.
pub struct ReqwestTransport {
    client: Client,
    matcher: EndpointMatcher,
}

impl ReqwestTransport {
    pub fn new(matcher: EndpointMatcher, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client, matcher })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn dispatch(&self, request: HostRequest) -> Result<HostResponse> {
        let url = self
            .matcher
            .resolve(&request.url)
            .ok_or_else(|| anyhow!("cannot resolve request url `{}`", request.url))?;
        let method = Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("invalid http method `{}`", request.method))?;

        let mut builder = self.client.request(method, url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body.into_bytes());
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read response body from {url}"))?
            .to_vec();

        Ok(HostResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
