use crate::control::{ControllerError, Identity, Response};
use crate::empty_string_as_none;
use crate::supply::{SalesPoint, SupplyPlanningService, ANALYSIS_WINDOW_DAYS};
use actix_web::{
    get,
    web::{Data, Path, Query},
    HttpResponse,
};
use serde::Deserialize;
use time::{Date, Duration, OffsetDateTime};
use wb_types::iso_date;

#[derive(Deserialize)]
pub struct PeriodQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub d1: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub d2: Option<String>,
}

fn parse_date(name: &str, value: Option<&str>, default: Date) -> Result<Date, ControllerError> {
    match value {
        Some(v) => iso_date::parse(v)
            .map_err(|_| ControllerError::InvalidInput(format!("{name} must be YYYY-MM-DD, got {v}"))),
        None => Ok(default),
    }
}

impl PeriodQuery {
    /// Missing bounds default to the last month ending today.
    pub fn resolve(&self, today: Date) -> Result<(Date, Date), ControllerError> {
        let d2 = parse_date("d2", self.d2.as_deref(), today)?;
        let d1 = parse_date("d1", self.d1.as_deref(), d2 - Duration::days(ANALYSIS_WINDOW_DAYS))?;
        Ok((d1, d2))
    }
}

#[get("/item/{sku}/sales")]
pub async fn item_sales(
    _identity: Identity,
    sku: Path<String>,
    q: Query<PeriodQuery>,
    service: Data<SupplyPlanningService>,
) -> Response {
    let (d1, d2) = q.resolve(OffsetDateTime::now_utc().date())?;
    let records = service.mpstats().item_sales(&sku, d1, d2).await?;
    Ok(HttpResponse::Ok().json(records.iter().map(SalesPoint::from).collect::<Vec<_>>()))
}
