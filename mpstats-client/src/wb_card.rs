use crate::de::{de_opt_string, truncate_body};
use crate::{status_error, FetchError};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::time::Duration;
use wb_types::supply::ItemMetadata;

pub const DEFAULT_CARD_BASE_URL: &str = "https://card.wb.ru";
const CARD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize, Default)]
struct CardResponse {
    #[serde(default)]
    data: CardData,
}

#[derive(Deserialize, Default)]
struct CardData {
    #[serde(default)]
    products: Vec<CardProduct>,
}

#[derive(Deserialize)]
struct CardProduct {
    #[serde(default, deserialize_with = "de_opt_string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    brand: Option<String>,
    #[serde(default, rename = "subjectName", deserialize_with = "de_opt_string")]
    subject_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    entity: Option<String>,
}

impl From<CardProduct> for ItemMetadata {
    fn from(p: CardProduct) -> Self {
        ItemMetadata {
            id: p.id.unwrap_or_default(),
            name: p.name.unwrap_or_default(),
            brand: p.brand.unwrap_or_default(),
            category: p.subject_name.or(p.entity).unwrap_or_default(),
        }
    }
}

/// Public Wildberries product card lookup, used only to fill in item names.
pub struct WbCardClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl WbCardClient {
    pub fn new(base_url: impl Into<String>, client: ClientWithMiddleware) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub async fn product(&self, sku: &str) -> Result<Option<ItemMetadata>, FetchError> {
        let url = format!("{}/cards/v2/detail", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("appType", "1"),
                ("curr", "rub"),
                ("dest", "-1257786"),
                ("spp", "30"),
                ("nm", sku.trim()),
            ])
            .timeout(CARD_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        let card: CardResponse = serde_json::from_str(&text)
            .map_err(|err| FetchError::Decode(format!("{err}. Body: {}", truncate_body(&text))))?;
        Ok(card
            .data
            .products
            .into_iter()
            .next()
            .map(ItemMetadata::from))
    }
}
