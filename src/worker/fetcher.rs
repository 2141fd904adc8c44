use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use url::Url;

use crate::config::CollectorSettings;
use crate::db::models::Delegation;
use crate::error::FetchError;

/// Source of the current delegation set of a validator.
#[async_trait]
pub trait DelegationSource: Send + Sync {
    /// Every (delegator, amount) pair currently delegated to `validator_addr`,
    /// in the order the source reports them.
    async fn fetch_delegations(&self, validator_addr: &str)
        -> Result<Vec<Delegation>, FetchError>;
}

/// Delay between retries (exponential backoff base)
const RETRY_DELAY_MS: u64 = 100;
/// Ceiling for a single backoff delay
const MAX_RETRY_DELAY_MS: u64 = 30_000;

fn retry_delay(attempt: u32) -> Duration {
    let millis = RETRY_DELAY_MS
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(millis)
}

/// Cosmos SDK LCD (REST gateway) client for the staking module.
///
/// Walks every page of
/// `/cosmos/staking/v1beta1/validators/{validator}/delegations`.
#[derive(Clone)]
pub struct LcdClient {
    http: reqwest::Client,
    base_url: Url,
    page_size: u32,
    max_retries: u32,
    denom: Option<String>,
}

impl LcdClient {
    pub fn new(settings: &CollectorSettings) -> Result<Self, FetchError> {
        let base_url = Url::parse(&settings.api_base_url)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        info!("LCD client configured for {}", base_url);

        Ok(Self {
            http,
            base_url,
            page_size: settings.page_size,
            max_retries: settings.max_retries,
            denom: settings.denom.clone(),
        })
    }

    fn delegations_url(&self, validator_addr: &str) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend([
                "cosmos",
                "staking",
                "v1beta1",
                "validators",
                validator_addr,
                "delegations",
            ]);
        Ok(url)
    }

    async fn fetch_page_with_retry(
        &self,
        url: &Url,
        page_key: Option<&str>,
    ) -> Result<DelegationPage, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_page(url, page_key).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = retry_delay(attempt);
                    warn!(
                        "Fetching {} failed ({}), retrying in {:?} ({}/{})",
                        url,
                        e,
                        delay,
                        attempt + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_page(
        &self,
        url: &Url,
        page_key: Option<&str>,
    ) -> Result<DelegationPage, FetchError> {
        let mut request = self
            .http
            .get(url.clone())
            .query(&[("pagination.limit", self.page_size.to_string())]);
        if let Some(key) = page_key {
            request = request.query(&[("pagination.key", key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        parse_page(&body, self.denom.as_deref())
    }
}

#[async_trait]
impl DelegationSource for LcdClient {
    async fn fetch_delegations(
        &self,
        validator_addr: &str,
    ) -> Result<Vec<Delegation>, FetchError> {
        let url = self.delegations_url(validator_addr)?;
        let mut delegations = Vec::new();
        let mut page_key: Option<String> = None;
        let mut visited = FxHashSet::default();

        loop {
            let page = self.fetch_page_with_retry(&url, page_key.as_deref()).await?;
            debug!(
                "Fetched {} delegations for {} (page key {:?})",
                page.delegations.len(),
                validator_addr,
                page_key
            );
            delegations.extend(page.delegations);

            match page.next_key {
                Some(next) if !visited.insert(next.clone()) => {
                    return Err(FetchError::RepeatedPageKey(next));
                },
                Some(next) => page_key = Some(next),
                None => break,
            }
        }

        Ok(delegations)
    }
}

// ==================== WIRE FORMAT ====================

#[derive(Debug, Deserialize)]
struct DelegationsResponse {
    delegation_responses: Vec<DelegationResponse>,
    #[serde(default)]
    pagination: Option<PageResponse>,
}

#[derive(Debug, Deserialize)]
struct DelegationResponse {
    delegation: DelegationInfo,
    balance: Coin,
}

#[derive(Debug, Deserialize)]
struct DelegationInfo {
    delegator_address: String,
}

#[derive(Debug, Deserialize)]
struct Coin {
    denom: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    next_key: Option<String>,
}

/// One decoded page of the delegations listing.
#[derive(Debug)]
pub struct DelegationPage {
    pub delegations: Vec<Delegation>,
    /// Key of the next page, `None` on the last page
    pub next_key: Option<String>,
}

/// Decodes one page of the LCD delegations listing.
///
/// Amounts must be base-10 integers that fit an `i64`. When `expected_denom`
/// is set, every balance must be in that denom.
pub fn parse_page(
    body: &[u8],
    expected_denom: Option<&str>,
) -> Result<DelegationPage, FetchError> {
    let response: DelegationsResponse = serde_json::from_slice(body)?;

    let delegations = response
        .delegation_responses
        .into_iter()
        .map(|entry| {
            let delegator = entry.delegation.delegator_address;

            if let Some(expected) = expected_denom {
                if entry.balance.denom != expected {
                    return Err(FetchError::Denom {
                        delegator,
                        expected: expected.to_string(),
                        found: entry.balance.denom,
                    });
                }
            }

            let amount = entry
                .balance
                .amount
                .parse::<i64>()
                .map_err(|_| FetchError::Amount {
                    delegator: delegator.clone(),
                    amount: entry.balance.amount.clone(),
                })?;

            Ok(Delegation::new(delegator, amount))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let next_key = response
        .pagination
        .and_then(|p| p.next_key)
        .filter(|key| !key.is_empty());

    Ok(DelegationPage {
        delegations,
        next_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    /// Local LCD stand-in replaying queued responses in order.
    #[derive(Default)]
    struct MockLcd {
        responses: Mutex<VecDeque<(StatusCode, String)>>,
        page_keys: Mutex<Vec<Option<String>>>,
    }

    impl MockLcd {
        fn page_keys(&self) -> Vec<Option<String>> {
            self.page_keys.lock().unwrap().clone()
        }
    }

    async fn serve_delegations(
        State(lcd): State<Arc<MockLcd>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, String) {
        lcd.page_keys
            .lock()
            .unwrap()
            .push(params.get("pagination.key").cloned());
        lcd.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((StatusCode::NOT_FOUND, String::new()))
    }

    async fn spawn_lcd(responses: Vec<(StatusCode, String)>) -> (LcdClient, Arc<MockLcd>) {
        let lcd = Arc::new(MockLcd {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        });
        let app = Router::new()
            .route(
                "/cosmos/staking/v1beta1/validators/:validator/delegations",
                get(serve_delegations),
            )
            .with_state(lcd.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let settings = CollectorSettings {
            api_base_url: format!("http://{}", addr),
            validators: vec!["val".to_string()],
            ..Default::default()
        };
        (LcdClient::new(&settings).unwrap(), lcd)
    }

    fn page(delegations: &[(&str, i64)], next_key: Option<&str>) -> (StatusCode, String) {
        let entries: Vec<_> = delegations
            .iter()
            .map(|(delegator, amount)| {
                json!({
                    "delegation": { "delegator_address": delegator },
                    "balance": { "denom": "uatom", "amount": amount.to_string() }
                })
            })
            .collect();
        let body = json!({
            "delegation_responses": entries,
            "pagination": { "next_key": next_key, "total": "0" }
        });
        (StatusCode::OK, body.to_string())
    }

    const PAGE: &str = r#"{
        "delegation_responses": [
            {
                "delegation": {
                    "delegator_address": "cosmos1alice",
                    "validator_address": "cosmosvaloper1val",
                    "shares": "1000.000000000000000000"
                },
                "balance": { "denom": "uatom", "amount": "1000" }
            },
            {
                "delegation": {
                    "delegator_address": "cosmos1bob",
                    "validator_address": "cosmosvaloper1val",
                    "shares": "25.000000000000000000"
                },
                "balance": { "denom": "uatom", "amount": "25" }
            }
        ],
        "pagination": { "next_key": "AAEC", "total": "3" }
    }"#;

    #[test]
    fn test_parse_page_keeps_order_and_next_key() {
        let page = parse_page(PAGE.as_bytes(), Some("uatom")).unwrap();
        assert_eq!(
            page.delegations,
            vec![
                Delegation::new("cosmos1alice", 1000),
                Delegation::new("cosmos1bob", 25)
            ]
        );
        assert_eq!(page.next_key.as_deref(), Some("AAEC"));
    }

    #[test]
    fn test_last_page_has_no_next_key() {
        let body =
            r#"{"delegation_responses": [], "pagination": {"next_key": null, "total": "0"}}"#;
        let page = parse_page(body.as_bytes(), None).unwrap();
        assert!(page.delegations.is_empty());
        assert!(page.next_key.is_none());

        let body = r#"{"delegation_responses": [], "pagination": {"next_key": ""}}"#;
        assert!(parse_page(body.as_bytes(), None).unwrap().next_key.is_none());
    }

    #[test]
    fn test_rejects_non_numeric_amount() {
        let body = r#"{"delegation_responses": [
            {"delegation": {"delegator_address": "cosmos1alice"},
             "balance": {"denom": "uatom", "amount": "12.5"}}
        ]}"#;
        let err = parse_page(body.as_bytes(), Some("uatom")).unwrap_err();
        assert!(matches!(err, FetchError::Amount { ref amount, .. } if amount == "12.5"));
    }

    #[test]
    fn test_rejects_unexpected_denom() {
        let body = r#"{"delegation_responses": [
            {"delegation": {"delegator_address": "cosmos1alice"},
             "balance": {"denom": "stake", "amount": "10"}}
        ]}"#;
        assert!(matches!(
            parse_page(body.as_bytes(), Some("uatom")),
            Err(FetchError::Denom { .. })
        ));
        // No denom check configured
        assert!(parse_page(body.as_bytes(), None).is_ok());
    }

    #[test]
    fn test_rejects_unexpected_shape() {
        assert!(matches!(
            parse_page(br#"{"validators": []}"#, None),
            Err(FetchError::Payload(_))
        ));
        assert!(matches!(parse_page(b"<html>", None), Err(FetchError::Payload(_))));
    }

    #[test]
    fn test_delegations_url() {
        let settings = CollectorSettings {
            api_base_url: "https://lcd.example.com/rest/".to_string(),
            validators: vec!["val".to_string()],
            ..Default::default()
        };
        let client = LcdClient::new(&settings).unwrap();
        let url = client.delegations_url("cosmosvaloper1abc").unwrap();
        assert_eq!(
            url.as_str(),
            "https://lcd.example.com/rest/cosmos/staking/v1beta1/validators/cosmosvaloper1abc/delegations"
        );
    }

    #[tokio::test]
    async fn test_fetch_joins_pages_in_order() {
        let (client, lcd) = spawn_lcd(vec![
            page(&[("cosmos1alice", 1000), ("cosmos1bob", 25)], Some("AAEC")),
            page(&[("cosmos1carol", 7)], None),
        ])
        .await;

        let delegations = client.fetch_delegations("cosmosvaloper1val").await.unwrap();
        assert_eq!(
            delegations,
            vec![
                Delegation::new("cosmos1alice", 1000),
                Delegation::new("cosmos1bob", 25),
                Delegation::new("cosmos1carol", 7),
            ]
        );
        assert_eq!(lcd.page_keys(), vec![None, Some("AAEC".to_string())]);
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let (client, lcd) = spawn_lcd(vec![
            (StatusCode::SERVICE_UNAVAILABLE, String::new()),
            page(&[("cosmos1alice", 1000)], None),
        ])
        .await;

        let delegations = client.fetch_delegations("cosmosvaloper1val").await.unwrap();
        assert_eq!(delegations, vec![Delegation::new("cosmos1alice", 1000)]);
        assert_eq!(lcd.page_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_client_errors() {
        let (client, lcd) = spawn_lcd(vec![
            (StatusCode::NOT_FOUND, String::new()),
            page(&[("cosmos1alice", 1000)], None),
        ])
        .await;

        let err = client.fetch_delegations("cosmosvaloper1val").await.unwrap_err();
        assert!(matches!(err, FetchError::Status(404)));
        assert_eq!(lcd.page_keys().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_stops_on_repeated_page_key() {
        let (client, lcd) = spawn_lcd(vec![
            page(&[("cosmos1alice", 1000)], Some("AAEC")),
            page(&[("cosmos1bob", 25)], Some("AAEC")),
            page(&[("cosmos1carol", 7)], None),
        ])
        .await;

        let err = client.fetch_delegations("cosmosvaloper1val").await.unwrap_err();
        assert!(matches!(err, FetchError::RepeatedPageKey(ref key) if key == "AAEC"));
        assert_eq!(lcd.page_keys().len(), 2);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(retry_delay(0), Duration::from_millis(100));
        assert_eq!(retry_delay(3), Duration::from_millis(800));
        assert_eq!(retry_delay(64), Duration::from_millis(MAX_RETRY_DELAY_MS));
        assert_eq!(retry_delay(u32::MAX), Duration::from_millis(MAX_RETRY_DELAY_MS));
    }
}
