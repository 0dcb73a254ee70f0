use crate::control::{audit, ControllerError, Identity, Response};
use crate::csv::{export_file_name, supply_analysis_csv};
use crate::operation::{NewOperation, OperationKind, OperationRepository};
use crate::supply::{Envelope, SupplyAnalysis, SupplyPlanningService};
use actix::Addr;
use actix_web::{
    http::header::{ContentDisposition, DispositionParam, DispositionType},
    post,
    web::{Data, Json},
    HttpResponse,
};
use log_error::LogError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use wb_types::access::service::{RecordAnalysis, UserCredentialsService};
use wb_types::access::Login;
use wb_types::supply::PlanningConfig;

fn default_delivery_time() -> u32 {
    7
}

fn default_safety_days() -> u32 {
    3
}

#[derive(Deserialize)]
pub struct MonthlyAnalysisDto {
    pub sku: String,
    #[serde(default = "default_delivery_time")]
    pub delivery_time: u32,
    #[serde(default = "default_safety_days")]
    pub safety_days: u32,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub purchase_price: Decimal,
}

async fn run_analysis(
    dto: MonthlyAnalysisDto,
    identity: Identity,
    service: &SupplyPlanningService,
    users: &Addr<UserCredentialsService>,
    operations: &dyn OperationRepository,
) -> Result<SupplyAnalysis, ControllerError> {
    let config = PlanningConfig::new(dto.delivery_time, dto.safety_days, dto.purchase_price)?;
    let today = OffsetDateTime::now_utc().date();
    let analysis = service.monthly_analysis(&dto.sku, &config, today).await?;

    let login = Login(identity.login);
    users
        .send(RecordAnalysis(login.clone()))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r)
        .log_error("Unable to update analyses counter");
    audit(
        operations,
        NewOperation::completed(
            login,
            OperationKind::SupplyPlanning,
            format!("Планирование поставок для артикула {}", analysis.sku),
        ),
    )
    .await;
    Ok(analysis)
}

#[post("/planning/monthly-analysis")]
pub async fn monthly_analysis(
    Json(dto): Json<MonthlyAnalysisDto>,
    identity: Identity,
    service: Data<SupplyPlanningService>,
    users: Data<Addr<UserCredentialsService>>,
    operations: Data<Arc<dyn OperationRepository>>,
) -> Response {
    let analysis = run_analysis(
        dto,
        identity,
        &service,
        &users,
        operations.get_ref().as_ref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(Envelope::ok(analysis)))
}

#[post("/planning/monthly-analysis/export")]
pub async fn monthly_analysis_export(
    Json(dto): Json<MonthlyAnalysisDto>,
    identity: Identity,
    service: Data<SupplyPlanningService>,
    users: Data<Addr<UserCredentialsService>>,
    operations: Data<Arc<dyn OperationRepository>>,
) -> Response {
    let analysis = run_analysis(
        dto,
        identity,
        &service,
        &users,
        operations.get_ref().as_ref(),
    )
    .await?;
    let body = supply_analysis_csv(&analysis)?;
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(export_file_name(&analysis.sku))],
        })
        .body(body))
}
