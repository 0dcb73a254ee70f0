#![deny(clippy::unwrap_used)]

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::IntoDeserializer;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};

pub mod access;
pub mod ai;
pub mod config;
pub mod control;
pub mod csv;
pub mod operation;
pub mod supply;

static DEFAULT_ACCEPT_ENCODING: &str = "br;q=1.0, gzip;q=0.6, deflate;q=0.4, *;q=0.2";
static USER_AGENT: &str = concat!("wb-analytics/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub struct SqlWrapper<T>(pub T);

impl<T> SqlWrapper<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> SqlWrapper<T> {
    pub fn from_sql<R>(r: R) -> Result<T, <Self as TryFrom<R>>::Error>
    where
        Self: TryFrom<R>,
    {
        r.try_into().map(|w: Self| w.0)
    }
}

pub fn conversion_error<E>(idx: usize, ty: rusqlite::types::Type, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, err.into())
}

/// Hands out one permit every `60 / rpm` seconds.
pub struct RateLimiter(Arc<Notify>);

impl RateLimiter {
    pub fn new(rpm: u64) -> Self {
        let notify = Arc::new(Notify::new());
        let n = notify.clone();
        let duration = Duration::from_millis(60_000 / rpm.max(1));
        tokio::spawn(async move {
            let notify = n;
            loop {
                sleep(duration).await;
                notify.notify_one();
            }
        });
        Self(notify)
    }
}

#[async_trait]
impl reqwest_ratelimit::RateLimiter for RateLimiter {
    async fn acquire_permit(&self) {
        self.0.notified().await;
    }
}

/// Outbound HTTP client shared by the upstream integrations.
pub fn http_client(rpm: Option<u64>) -> Result<ClientWithMiddleware, anyhow::Error> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT_ENCODING,
        reqwest::header::HeaderValue::from_static(DEFAULT_ACCEPT_ENCODING),
    );
    let client = reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(USER_AGENT)
        .build()?;
    let builder = ClientBuilder::new(client);
    Ok(match rpm {
        Some(rpm) => builder
            .with(reqwest_ratelimit::all(RateLimiter::new(rpm)))
            .build(),
        None => builder.build(),
    })
}

pub fn empty_string_as_none<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    let opt = Option::<String>::deserialize(de)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => T::deserialize(s.into_deserializer()).map(Some),
    }
}

/// Rounds half away from zero to `dp` decimal places.
pub fn round_to(x: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (x * factor).round() / factor
}
