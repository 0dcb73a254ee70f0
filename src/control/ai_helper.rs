use crate::ai::{ContentType, OpenAiClient};
use crate::control::{audit, Identity, Response};
use crate::operation::{NewOperation, OperationKind, OperationRepository};
use crate::supply::Envelope;
use actix_web::{
    post,
    web::{Data, Json},
    HttpResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use wb_types::access::Login;

#[derive(Deserialize)]
pub struct AiHelperDto {
    pub content_type: ContentType,
    pub prompt: String,
}

#[post("/analysis/ai-helper")]
pub async fn ai_helper(
    identity: Identity,
    Json(dto): Json<AiHelperDto>,
    client: Data<OpenAiClient>,
    operations: Data<Arc<dyn OperationRepository>>,
) -> Response {
    log::info!("AI helper request by {}: {}", identity.login, dto.content_type);
    let content = client.generate(dto.content_type, &dto.prompt).await?;
    audit(
        operations.get_ref().as_ref(),
        NewOperation::completed(
            Login(identity.login),
            OperationKind::AiHelper,
            format!("AI helper ({})", dto.content_type),
        ),
    )
    .await;
    Ok(HttpResponse::Ok().json(Envelope::ok(json!({ "content": content }))))
}
