//! Paginated source of voting-power balance updates.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::domain::snapshot::BalanceUpdate;
use crate::error::EngineError;

/// External system reporting balance changes ordered by update time.
#[async_trait]
pub trait BalanceSource: Send + Sync + std::fmt::Debug {
    /// Returns up to `take` updates with `updatedAt > after_ms`, skipping the
    /// first `skip` of them. Results are ordered by update time ascending.
    async fn fetch_balances(
        &self,
        after_ms: i64,
        skip: u32,
        take: u32,
    ) -> Result<Vec<BalanceUpdate>, EngineError>;

    /// Newest update time the source has indexed, in milliseconds.
    async fn latest_indexed_timestamp(&self) -> Result<i64, EngineError>;
}

#[derive(Debug, Deserialize)]
struct BalancesPage {
    balances: Vec<BalanceUpdate>,
}

#[derive(Debug, Deserialize)]
struct IndexedTimestamp {
    timestamp: i64,
}

/// [`BalanceSource`] speaking JSON over HTTP.
///
/// * `GET {base}/balances?afterTimestamp=&network=&skip=&take=` answers
///   `{"balances": [{"address", "balance", "updatedAt"}]}`
/// * `GET {base}/latestIndexedTimestamp?network=` answers `{"timestamp"}`
#[derive(Debug, Clone)]
pub struct HttpBalanceSource {
    base_url: String,
    network: String,
    client: Client,
}

impl HttpBalanceSource {
    /// Creates a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str, network: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::InvalidConfig(format!("balance source client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            network: network.to_string(),
            client,
        })
    }

    fn balances_url(&self, after_ms: i64, skip: u32, take: u32) -> Result<Url, EngineError> {
        Url::parse_with_params(
            &format!("{}/balances", self.base_url),
            &[
                ("afterTimestamp", after_ms.to_string()),
                ("network", self.network.clone()),
                ("skip", skip.to_string()),
                ("take", take.to_string()),
            ],
        )
        .map_err(|e| EngineError::InvalidConfig(format!("balance source url: {e}")))
    }

    fn latest_indexed_url(&self) -> Result<Url, EngineError> {
        Url::parse_with_params(
            &format!("{}/latestIndexedTimestamp", self.base_url),
            &[("network", self.network.as_str())],
        )
        .map_err(|e| EngineError::InvalidConfig(format!("balance source url: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, EngineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EngineError::UpstreamRejected(format!("malformed response: {e}")))
    }
}

/// 5xx and 429 are worth retrying; other non-success codes are not.
fn classify_status(status: StatusCode) -> EngineError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        EngineError::UpstreamUnavailable(format!("status {status}"))
    } else {
        EngineError::UpstreamRejected(format!("status {status}"))
    }
}

#[async_trait]
impl BalanceSource for HttpBalanceSource {
    async fn fetch_balances(
        &self,
        after_ms: i64,
        skip: u32,
        take: u32,
    ) -> Result<Vec<BalanceUpdate>, EngineError> {
        let url = self.balances_url(after_ms, skip, take)?;
        let page: BalancesPage = self.get_json(url).await?;
        tracing::debug!(after_ms, skip, take, received = page.balances.len(), "fetched balance page");
        Ok(page.balances)
    }

    async fn latest_indexed_timestamp(&self) -> Result<i64, EngineError> {
        let url = self.latest_indexed_url()?;
        let body: IndexedTimestamp = self.get_json(url).await?;
        Ok(body.timestamp)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn source() -> HttpBalanceSource {
        let Ok(source) =
            HttpBalanceSource::new("http://indexer.local/", "gnosis", Duration::from_secs(1))
        else {
            panic!("client should build");
        };
        source
    }

    #[test]
    fn balances_url_carries_cursor_and_page() {
        let Ok(url) = source().balances_url(1_700_000_000_000, 2000, 1000) else {
            panic!("url should parse");
        };
        assert_eq!(url.path(), "/balances");
        assert_eq!(
            url.query(),
            Some("afterTimestamp=1700000000000&network=gnosis&skip=2000&take=1000")
        );
    }

    #[test]
    fn latest_indexed_url_names_network() {
        let Ok(url) = source().latest_indexed_url() else {
            panic!("url should parse");
        };
        assert_eq!(url.as_str(), "http://indexer.local/latestIndexedTimestamp?network=gnosis");
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(classify_status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST).is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND).is_transient());
    }

    #[test]
    fn page_body_uses_camel_case() {
        let json = r#"{"balances":[{"address":"0xAb","balance":12.5,"updatedAt":77}]}"#;
        let Ok(page) = serde_json::from_str::<BalancesPage>(json) else {
            panic!("page should parse");
        };
        assert_eq!(page.balances.len(), 1);
        assert_eq!(page.balances.first().map(|b| b.updated_at), Some(77));
    }
}
