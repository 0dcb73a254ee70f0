use crate::config::OpenAiConfig;
use derive_more::{Display, Error};
use mpstats_client::de::truncate_body;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOKENS: u32 = 1500;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[display("product_description")]
    ProductDescription,
    #[display("product_card")]
    ProductCard,
    #[display("sales_text")]
    SalesText,
    #[display("ad_copy")]
    AdCopy,
    #[display("social_post")]
    SocialPost,
    #[display("email_marketing")]
    EmailMarketing,
    #[display("landing_page")]
    LandingPage,
    #[display("seo_content")]
    SeoContent,
}

impl ContentType {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::ProductDescription => {
                "Ты опытный копирайтер маркетплейса Wildberries. Напиши продающее описание товара: \
                 выгоды для покупателя, характеристики, сценарии использования. Без выдуманных фактов."
            }
            Self::ProductCard => {
                "Ты специалист по карточкам товаров Wildberries. Составь карточку: название до 60 символов, \
                 ключевые характеристики списком, описание и комплектацию."
            }
            Self::SalesText => {
                "Ты маркетолог. Напиши продающий текст по формуле AIDA: внимание, интерес, желание, действие."
            }
            Self::AdCopy => {
                "Ты рекламный копирайтер. Предложи три коротких варианта рекламного объявления с призывом к действию."
            }
            Self::SocialPost => {
                "Ты SMM-специалист. Напиши пост для соцсетей о товаре с эмодзи и хэштегами."
            }
            Self::EmailMarketing => {
                "Ты email-маркетолог. Напиши письмо для рассылки: тема, прехедер, основной текст и призыв к действию."
            }
            Self::LandingPage => {
                "Ты специалист по конверсии. Предложи структуру лендинга по блокам с заголовками и кратким содержанием."
            }
            Self::SeoContent => {
                "Ты SEO-специалист маркетплейсов. Подбери ключевые запросы и напиши SEO-описание товара с их естественным вхождением."
            }
        }
    }
}

#[derive(Debug, Display, Error)]
pub enum AiError {
    #[display("AI helper is not configured")]
    NotConfigured,
    #[display("Prompt is empty")]
    EmptyPrompt,
    #[display("OpenAI request timed out")]
    Timeout,
    #[display("OpenAI responded with {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error(ignore)]
    #[display("Unable to decode OpenAI response: {_0}")]
    Decode(String),
    #[error(ignore)]
    #[display("{_0}")]
    Transport(anyhow::Error),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.into())
        }
    }
}

impl From<reqwest_middleware::Error> for AiError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => Self::Transport(err),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

pub struct OpenAiClient {
    client: ClientWithMiddleware,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig, client: ClientWithMiddleware) -> Self {
        if config.api_key.as_deref().unwrap_or("").is_empty() {
            log::warn!("OPENAI_API_KEY is not set, AI helper is disabled");
        }
        Self { client, config }
    }

    pub async fn generate(&self, content_type: ContentType, prompt: &str) -> Result<String, AiError> {
        let api_key = match self.config.api_key.as_deref() {
            Some(k) if !k.is_empty() => k,
            _ => return Err(AiError::NotConfigured),
        };
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AiError::EmptyPrompt);
        }
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: content_type.system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: 0.7,
        };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .timeout(COMPLETION_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AiError::Upstream {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|err| AiError::Decode(format!("{err}. Body: {}", truncate_body(&text))))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AiError::Decode("No completion choices".to_string()))
    }
}
