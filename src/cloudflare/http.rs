use super::LoadBalancerApi;
use crate::error::ApiError;
use crate::types::{LoadBalancer, Monitor, Pool, Zone};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// API key authentication for the Cloudflare v4 API.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub email: String,
    /// Scopes monitors and pools to an organization instead of the user.
    pub organization_id: Option<String>,
}

/// [`LoadBalancerApi`] over the Cloudflare v4 REST API.
pub struct CloudflareApi {
    client: Client,
    base_url: String,
    scope: String,
}

impl CloudflareApi {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-key", header_value(&credentials.api_key)?);
        headers.insert("x-auth-email", header_value(&credentials.email)?);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            scope: account_scope(credentials.organization_id.as_deref()),
        })
    }

    async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_envelope(status, &body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(Method::GET, path, None).await
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    let mut header =
        HeaderValue::from_str(value).map_err(|e| ApiError::Credentials(e.to_string()))?;
    header.set_sensitive(true);
    Ok(header)
}

/// Path prefix owning monitors and pools.
fn account_scope(organization_id: Option<&str>) -> String {
    match organization_id {
        Some(id) if !id.is_empty() => format!("/organizations/{}", id),
        _ => "/user".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ResponseMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Unwrap the `{success, errors, result}` envelope every response uses.
fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ApiError> {
    let envelope: Envelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !(200..300).contains(&status) => {
            return Err(ApiError::Api {
                status,
                messages: vec![body.trim().to_string()],
            })
        }
        Err(e) => return Err(e.into()),
    };

    match envelope.result {
        Some(result) if envelope.success && (200..300).contains(&status) => Ok(result),
        _ => Err(ApiError::Api {
            status,
            messages: envelope
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect(),
        }),
    }
}

#[async_trait]
impl LoadBalancerApi for CloudflareApi {
    async fn list_monitors(&self) -> Result<Vec<Monitor>, ApiError> {
        self.get(&format!("{}/load_balancers/monitors", self.scope))
            .await
    }

    async fn create_monitor(&self, monitor: &Monitor) -> Result<Monitor, ApiError> {
        let path = format!("{}/load_balancers/monitors", self.scope);
        self.request(Method::POST, &path, Some(monitor)).await
    }

    async fn list_pools(&self) -> Result<Vec<Pool>, ApiError> {
        self.get(&format!("{}/load_balancers/pools", self.scope)).await
    }

    async fn create_pool(&self, pool: &Pool) -> Result<Pool, ApiError> {
        let path = format!("{}/load_balancers/pools", self.scope);
        self.request(Method::POST, &path, Some(pool)).await
    }

    async fn update_pool(&self, id: &str, pool: &Pool) -> Result<Pool, ApiError> {
        let path = format!("{}/load_balancers/pools/{}", self.scope, id);
        self.request(Method::PUT, &path, Some(pool)).await
    }

    async fn list_zones(&self, name: &str) -> Result<Vec<Zone>, ApiError> {
        let url = format!("{}/zones", self.base_url);
        debug!("GET {}?name={}", url, name);
        let response = self.client.get(url).query(&[("name", name)]).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_envelope(status, &body)
    }

    async fn list_load_balancers(&self, zone_id: &str) -> Result<Vec<LoadBalancer>, ApiError> {
        self.get(&format!("/zones/{}/load_balancers", zone_id)).await
    }

    async fn create_load_balancer(
        &self,
        zone_id: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ApiError> {
        let path = format!("/zones/{}/load_balancers", zone_id);
        self.request(Method::POST, &path, Some(load_balancer)).await
    }

    async fn update_load_balancer(
        &self,
        zone_id: &str,
        id: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ApiError> {
        let path = format!("/zones/{}/load_balancers/{}", zone_id, id);
        self.request(Method::PUT, &path, Some(load_balancer)).await
    }
}
