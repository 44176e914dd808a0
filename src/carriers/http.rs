use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{CarrierCode, CarrierError};
use crate::errors::ServiceError;

const MAX_ERROR_BODY: usize = 512;

pub(crate) enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
    Header { name: &'static str, value: String },
}

/// JSON-over-HTTP client shared by the carrier adapters
pub(crate) struct CarrierHttp {
    provider: CarrierCode,
    client: reqwest::Client,
    base_url: String,
    auth: Auth,
}

/// An explicit override wins, otherwise sandbox or production
pub(crate) fn resolve_base_url(
    override_url: Option<&str>,
    sandbox: bool,
    sandbox_url: &str,
    production_url: &str,
) -> String {
    let url = match override_url {
        Some(url) if !url.trim().is_empty() => url,
        _ if sandbox => sandbox_url,
        _ => production_url,
    };
    url.trim_end_matches('/').to_string()
}

impl CarrierHttp {
    pub(crate) fn new(
        provider: CarrierCode,
        base_url: String,
        auth: Auth,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build {provider} HTTP client: {e}"))
            })?;

        Ok(Self {
            provider,
            client,
            base_url,
            auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Header { name, value } => builder.header(*name, value),
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CarrierError> {
        self.send(self.request(Method::GET, path)).await
    }

    pub(crate) async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, CarrierError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, CarrierError> {
        let provider = self.provider;
        let response = builder
            .send()
            .await
            .map_err(|source| CarrierError::Http { provider, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| CarrierError::Http { provider, source })?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(CarrierError::Status {
                provider,
                status: status.as_u16(),
                body,
            });
        }

        debug!(carrier = %provider, status = status.as_u16(), "carrier response received");
        serde_json::from_str(&body).map_err(|e| CarrierError::decode(provider, e.to_string()))
    }
}
