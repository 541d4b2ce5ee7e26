use async_trait::async_trait;
use dispatch_runtime::{decode_envelope_json, ResultEnvelope, RpcCall};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use super::{RemoteBackend, TransportError};

/// Form-POST transport: `action=<verb>&params=<json array>`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        if self.api_key.is_empty() {
            return Ok(headers);
        }
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|err| TransportError::Network(format!("api key header: {err}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|err| TransportError::Network(format!("authorization header: {err}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn call(&self, token: &str, call: &RpcCall) -> Result<ResultEnvelope, TransportError> {
        let params = serde_json::to_string(&call.params(token))
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        let form = [("action", call.verb()), ("params", params.as_str())];

        tracing::trace!(target: "dispatch::transport", verb = call.verb(), "rpc.send");
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers()?)
            .form(&form)
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        match decode_envelope_json(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(TransportError::Status(status.as_u16())),
            Err(err) => Err(TransportError::InvalidResponse(err.to_string())),
        }
    }
}
