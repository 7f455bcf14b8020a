//! Standards-compliant connector backed by a ureq agent.

use ureq::http;

use crate::error::DispatchError;
use crate::http::{HttpRequest, HttpResponse};

use super::Connector;

pub struct UreqConnector {
    agent: ureq::Agent,
}

impl UreqConnector {
    pub fn new() -> Self {
        // Non-2xx statuses are data here; the dispatcher classifies them.
        // Any method token `HttpMethod` accepts must reach the wire.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .allow_non_standard_methods(true)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for UreqConnector {
    fn supports_scheme(&self, scheme: &str) -> bool {
        matches!(scheme, "http" | "https")
    }

    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError> {
        let method = http::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|_| DispatchError::InvalidMethod(request.method.to_string()))?;
        let mut builder = http::Request::builder().method(method).uri(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let result = match &request.body {
            Some(body) => builder
                .body(body.clone().into_bytes())
                .map_err(|e| DispatchError::Network(e.to_string()))
                .and_then(|req| self.agent.run(req).map_err(|e| DispatchError::Network(e.to_string()))),
            None => builder
                .body(())
                .map_err(|e| DispatchError::Network(e.to_string()))
                .and_then(|req| self.agent.run(req).map_err(|e| DispatchError::Network(e.to_string()))),
        };
        let mut response = result?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let bytes = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(|e| DispatchError::Network(format!("failed to read body: {e}")))?;

        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}
