//! HTTP client for the Ocado mobile API.
//!
//! Mirrors the iOS application's request shape: a fixed header set with an
//! API key and banner id, a monotonically increasing `sessionsequenceno`,
//! and `Authorization: token:<bearer>` carrying whichever token the caller
//! supplies (session token for resources, refresh token for the refresh
//! endpoint).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderName,
    HeaderValue, USER_AGENT,
};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{
    Cart, DeliverySlot, DeliverySubscription, RecentOrders, UserProfile, parse_order_count,
};

const DEFAULT_API_BASE: &str = "https://api.mol.osp.tech/rocket-osp";

// Constants extracted from Ocado iOS app traffic.
const API_KEY: &str = "NVpXAmgMAE1Cg5Mblpefg4YaVA2lXMr65AG6J8A1";
const BANNER_ID: &str = "eafa5127-d256-497b-9609-4869092accd6";
const UA_API: &str = "Ocado-iPhone-Application/1.417.2 (iOS/26.2.1) iPhone18,2";
const REQUEST_SOURCE: &str = "ios";
const REQUEST_SOURCE_VERSION: &str = "1.417.2 (33861072)";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response of `POST /v1/authorize/refresh`.
///
/// The refresh token may or may not be rotated alongside the session token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Connection options for [`OcadoClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API base URL, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout. Timeouts surface as transient errors.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Stateless-credential client for the Ocado mobile API.
pub struct OcadoClient {
    http: Client,
    base_url: String,
    seq: AtomicU64,
    /// Delivery destination id, resolved once and reused for slot lookups.
    delivery_destination: Mutex<Option<String>>,
}

impl OcadoClient {
    /// Create a client with default options.
    pub fn new() -> Result<Self, ApiError> {
        Self::with_options(ClientOptions::default())
    }

    /// Create a client with custom options.
    pub fn with_options(options: ClientOptions) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(options.timeout).build()?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            seq: AtomicU64::new(0),
            delivery_destination: Mutex::new(None),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Build the standard header set, authorized with `token`.
    fn headers(&self, token: &str) -> Result<HeaderMap, ApiError> {
        let mut h = HeaderMap::new();
        h.insert(ACCEPT, HeaderValue::from_static("application/json"));
        h.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB"));
        h.insert(
            HeaderName::from_static("accept-currency"),
            HeaderValue::from_static("GBP"),
        );
        h.insert(USER_AGENT, HeaderValue::from_static(UA_API));
        h.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static(API_KEY),
        );
        h.insert(
            HeaderName::from_static("bannerid"),
            HeaderValue::from_static(BANNER_ID),
        );
        h.insert(
            HeaderName::from_static("ecom-request-source"),
            HeaderValue::from_static(REQUEST_SOURCE),
        );
        h.insert(
            HeaderName::from_static("ecom-request-source-version"),
            HeaderValue::from_static(REQUEST_SOURCE_VERSION),
        );
        h.insert(
            HeaderName::from_static("client-features"),
            HeaderValue::from_static("image-http-redirects"),
        );
        h.insert(
            HeaderName::from_static("sessionsequenceno"),
            HeaderValue::from_str(&self.next_seq().to_string())
                .map_err(|e| ApiError::Parse(format!("invalid sequence header: {e}")))?,
        );
        h.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        h.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("token:{token}"))
                .map_err(|e| ApiError::Parse(format!("token not header-safe: {e}")))?,
        );
        Ok(h)
    }

    /// Perform a request and decode the JSON body.
    ///
    /// A 401 surfaces as [`ApiError::Unauthorized`]; any other non-success
    /// status carries the body text for diagnostics.
    async fn request_json(
        &self,
        method: Method,
        path: &str,
        token: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url).headers(self.headers(token)?);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        Ok(response.json().await?)
    }

    /// Mint a new session token from a refresh token.
    ///
    /// A 401 here means the refresh token itself was rejected.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        debug!("refreshing session token");

        let url = format!("{}/v1/authorize/refresh", self.base_url);
        let mut headers = self.headers(refresh_token)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .http
            .post(&url)
            .headers(headers)
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let refreshed: RefreshResponse = response.json().await?;
        debug!("session token refreshed");
        Ok(refreshed)
    }

    /// `GET /v1/user/current`.
    pub async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError> {
        let data = self
            .request_json(Method::GET, "/v1/user/current", token, &[])
            .await?;
        Ok(UserProfile::from_value(&data))
    }

    /// `GET /v2/orders/recent`: upcoming and delivered orders.
    pub async fn recent_orders(&self, token: &str) -> Result<RecentOrders, ApiError> {
        let data = self
            .request_json(Method::GET, "/v2/orders/recent", token, &[])
            .await?;
        Ok(RecentOrders::from_value(&data))
    }

    /// `GET /v3/orders/not-cancelled-count`.
    pub async fn active_order_count(&self, token: &str) -> Result<u64, ApiError> {
        let data = self
            .request_json(Method::GET, "/v3/orders/not-cancelled-count", token, &[])
            .await?;
        Ok(parse_order_count(&data))
    }

    /// `GET /v1/carts/active`: simplified cart.
    pub async fn active_cart(&self, token: &str) -> Result<Cart, ApiError> {
        let data = self
            .request_json(Method::GET, "/v1/carts/active", token, &[])
            .await?;
        Ok(Cart::from_value(&data))
    }

    /// `POST /v2/delivery/locations`: resolve and cache the delivery
    /// destination id (primary address preferred, else the first).
    async fn delivery_destination_id(&self, token: &str) -> Result<Option<String>, ApiError> {
        if let Some(id) = self.delivery_destination.lock().clone() {
            return Ok(Some(id));
        }

        let data = self
            .request_json(
                Method::POST,
                "/v2/delivery/locations",
                token,
                &[("deliveryMethod", "HOME_DELIVERY")],
            )
            .await?;

        let locations: Vec<Value> = match data {
            Value::Array(list) => list,
            Value::Null => Vec::new(),
            single => vec![single],
        };

        let destination_of = |loc: &Value| -> Option<String> {
            loc.get("address")?
                .get("deliveryDestinationId")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let resolved = locations
            .iter()
            .find(|loc| {
                loc.get("address")
                    .and_then(|a| a.get("primary"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            })
            .and_then(destination_of)
            .or_else(|| locations.first().and_then(destination_of));

        if let Some(id) = &resolved {
            *self.delivery_destination.lock() = Some(id.clone());
        }
        Ok(resolved)
    }

    /// `GET /v4/slot/next-available`.
    ///
    /// Returns `Ok(None)` when no delivery destination is known for the
    /// account; transport and authorization errors propagate.
    pub async fn next_available_slot(&self, token: &str) -> Result<Option<DeliverySlot>, ApiError> {
        let Some(destination_id) = self.delivery_destination_id(token).await? else {
            debug!("no delivery destination; skipping slot lookup");
            return Ok(None);
        };

        let data = self
            .request_json(
                Method::GET,
                "/v4/slot/next-available",
                token,
                &[("deliveryDestinationId", destination_id.as_str())],
            )
            .await?;

        Ok(Some(DeliverySlot::from_value(&data)))
    }

    /// `GET /v1/user/subscriptions/delivery/active`.
    ///
    /// Returns `Ok(None)` when the account has no active subscription.
    pub async fn delivery_subscription(
        &self,
        token: &str,
    ) -> Result<Option<DeliverySubscription>, ApiError> {
        let data = self
            .request_json(
                Method::GET,
                "/v1/user/subscriptions/delivery/active",
                token,
                &[],
            )
            .await?;
        Ok(DeliverySubscription::from_value(&data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.base_url, DEFAULT_API_BASE);
        assert_eq!(options.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = OcadoClient::with_options(ClientOptions {
            base_url: "https://example.test/api/".to_string(),
            ..ClientOptions::default()
        })
        .unwrap();
        assert_eq!(client.base_url, "https://example.test/api");
    }

    #[test]
    fn test_sequence_number_increments() {
        let client = OcadoClient::new().unwrap();
        assert_eq!(client.next_seq(), 1);
        assert_eq!(client.next_seq(), 2);
        assert_eq!(client.next_seq(), 3);
    }

    #[test]
    fn test_headers_carry_token_and_sequence() {
        let client = OcadoClient::new().unwrap();

        let headers = client.headers("abc123").unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "token:abc123");
        assert_eq!(headers.get("sessionsequenceno").unwrap(), "1");
        assert_eq!(headers.get("x-api-key").unwrap(), API_KEY);

        let headers = client.headers("abc123").unwrap();
        assert_eq!(headers.get("sessionsequenceno").unwrap(), "2");
    }

    #[test]
    fn test_headers_reject_non_header_safe_token() {
        let client = OcadoClient::new().unwrap();
        assert!(client.headers("bad\ntoken").is_err());
    }

    #[test]
    fn test_refresh_response_without_rotation() {
        let parsed: RefreshResponse = serde_json::from_value(serde_json::json!({
            "token": "s1"
        }))
        .unwrap();
        assert_eq!(parsed.token, "s1");
        assert!(parsed.refresh_token.is_none());
    }
}
