use crate::de::{de_opt_f64, de_opt_i64, de_opt_string, truncate_body};
use derive_more::{Display, Error};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use time::Date;
use wb_types::iso_date;
use wb_types::supply::{DailyRecord, ItemMetadata};

pub mod de;
pub mod wb_card;

pub const DEFAULT_BASE_URL: &str = "https://mpstats.io/api/wb/get";
pub const TOKEN_HEADER: &str = "X-Mpstats-TOKEN";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct MpstatsConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl MpstatsConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[error(ignore)]
    #[display("Invalid request: {_0}")]
    InvalidRequest(String),
    #[display("MPStats rejected the API token")]
    UpstreamAuth,
    #[display("MPStats request timed out")]
    UpstreamTimeout,
    #[display("MPStats rate limit exceeded")]
    RateLimited,
    #[display("Item not found")]
    NotFound,
    #[display("MPStats responded with {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error(ignore)]
    #[display("Unable to decode MPStats response: {_0}")]
    Decode(String),
    #[error(ignore)]
    #[display("{_0}")]
    Transport(anyhow::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.into())
        }
    }
}

impl From<reqwest_middleware::Error> for FetchError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => Self::Transport(err),
        }
    }
}

/// Maps an unsuccessful upstream status to the matching error.
pub fn status_error(status: StatusCode, body: &str) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::UpstreamAuth,
        StatusCode::NOT_FOUND => FetchError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => FetchError::UpstreamTimeout,
        s => FetchError::Upstream {
            status: s.as_u16(),
            body: truncate_body(body),
        },
    }
}

/// One way of asking MPStats for the same data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub path: String,
    pub params: Vec<(String, String)>,
}

/// Ordered candidate queries, tried until one returns rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionStrategy(pub Vec<Candidate>);

impl ResolutionStrategy {
    /// Per-day sales, first including FBS warehouses, then without them.
    pub fn item_sales(sku: &str, d1: Date, d2: Date) -> Self {
        let path = format!("/item/{sku}/sales");
        Self(
            ["1", "0"]
                .into_iter()
                .map(|fbs| Candidate {
                    path: path.clone(),
                    params: vec![
                        ("d1".to_string(), iso_date::format(&d1)),
                        ("d2".to_string(), iso_date::format(&d2)),
                        ("fbs".to_string(), fbs.to_string()),
                    ],
                })
                .collect(),
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Rows<T> {
    Plain(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> From<Rows<T>> for Vec<T> {
    fn from(rows: Rows<T>) -> Self {
        match rows {
            Rows::Plain(v) | Rows::Wrapped { data: v } => v,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SalesRow {
    #[serde(default, rename = "data", deserialize_with = "de_opt_string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub sales: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub balance: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub client_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub final_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub brand: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub category: Option<String>,
}

impl SalesRow {
    pub fn unit_price(&self) -> Decimal {
        self.client_price
            .or(self.final_price)
            .or(self.price)
            .and_then(Decimal::from_f64)
            .map(|p| p.round_dp(2))
            .unwrap_or_default()
    }

    pub fn metadata(&self) -> ItemMetadata {
        ItemMetadata {
            id: self.id.clone().unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
            brand: self.brand.clone().unwrap_or_default(),
            category: self.category.clone().unwrap_or_default(),
        }
    }

    /// `None` for rows without a readable date.
    pub fn record(&self) -> Option<DailyRecord> {
        let date = iso_date::parse(self.date.as_deref()?).ok()?;
        Some(DailyRecord {
            date,
            units_sold: self.sales.unwrap_or_default().max(0) as u64,
            stock_balance: self.balance.unwrap_or_default().max(0) as u64,
            unit_price: self.unit_price(),
        })
    }
}

/// Records sorted by date plus whatever identifiers the first row carried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SalesSeries {
    pub metadata: ItemMetadata,
    pub records: Vec<DailyRecord>,
}

impl SalesSeries {
    pub fn from_rows(rows: Vec<SalesRow>) -> Self {
        let mut rows = rows
            .into_iter()
            .filter_map(|row| match row.record() {
                Some(record) => Some((record, row)),
                None => {
                    log::warn!("Skipping MPStats row with unreadable date: {:?}", row.date);
                    None
                }
            })
            .collect::<Vec<_>>();
        rows.sort_by_key(|(record, _)| record.date);
        let metadata = rows
            .first()
            .map(|(_, row)| row.metadata())
            .unwrap_or_default();
        Self {
            metadata,
            records: rows.into_iter().map(|(record, _)| record).collect(),
        }
    }
}

pub struct MpstatsClient {
    client: ClientWithMiddleware,
    config: MpstatsConfig,
}

impl MpstatsClient {
    pub fn new(config: MpstatsConfig, client: ClientWithMiddleware) -> Self {
        if config.token.trim().is_empty() {
            log::warn!("MPStats API token is empty, every request will be rejected");
        }
        Self { client, config }
    }

    pub fn config(&self) -> &MpstatsConfig {
        &self.config
    }

    async fn get_json<T: DeserializeOwned>(&self, candidate: &Candidate) -> Result<Vec<T>, FetchError> {
        let token = self.config.token.trim();
        if token.is_empty() {
            return Err(FetchError::UpstreamAuth);
        }
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), candidate.path);
        log::debug!("GET {url} {:?}", candidate.params);
        let resp = self
            .client
            .get(&url)
            .query(&candidate.params)
            .header(TOKEN_HEADER, token)
            .timeout(self.config.timeout)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<Rows<T>>(&text)
            .map(Vec::from)
            .map_err(|err| FetchError::Decode(format!("{err}. Body: {}", truncate_body(&text))))
    }

    /// Runs `strategy` until a candidate yields rows.
    ///
    /// `NotFound` and empty answers fall through to the next candidate, any
    /// other failure aborts. When every candidate is exhausted the result is
    /// empty if at least one of them answered, `NotFound` otherwise.
    pub async fn resolve<T: DeserializeOwned>(
        &self,
        strategy: &ResolutionStrategy,
    ) -> Result<Vec<T>, FetchError> {
        let mut answered_empty = false;
        for candidate in &strategy.0 {
            match self.get_json::<T>(candidate).await {
                Ok(rows) if !rows.is_empty() => return Ok(rows),
                Ok(_) => {
                    log::info!("MPStats returned no rows for {} {:?}", candidate.path, candidate.params);
                    answered_empty = true;
                }
                Err(FetchError::NotFound) => {
                    log::info!("MPStats has nothing at {} {:?}", candidate.path, candidate.params);
                }
                Err(err) => return Err(err),
            }
        }
        if answered_empty {
            Ok(Vec::new())
        } else {
            Err(FetchError::NotFound)
        }
    }

    pub async fn item_series(&self, sku: &str, d1: Date, d2: Date) -> Result<SalesSeries, FetchError> {
        let sku = sku.trim();
        if sku.is_empty() {
            return Err(FetchError::InvalidRequest("SKU is required".to_string()));
        }
        // The SKU becomes a path segment of an authenticated request.
        if !sku.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(FetchError::InvalidRequest(format!(
                "SKU must contain only letters and digits: {sku}"
            )));
        }
        if d1 > d2 {
            return Err(FetchError::InvalidRequest(format!(
                "Start date {} is after end date {}",
                iso_date::format(&d1),
                iso_date::format(&d2)
            )));
        }
        log::info!(
            "Fetching sales data for SKU {sku} from {} to {}",
            iso_date::format(&d1),
            iso_date::format(&d2)
        );
        let rows = self
            .resolve::<SalesRow>(&ResolutionStrategy::item_sales(sku, d1, d2))
            .await?;
        Ok(SalesSeries::from_rows(rows))
    }

    pub async fn item_sales(&self, sku: &str, d1: Date, d2: Date) -> Result<Vec<DailyRecord>, FetchError> {
        Ok(self.item_series(sku, d1, d2).await?.records)
    }
}
