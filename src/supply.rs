use crate::round_to;
use derive_more::{Display, Error, From};
use log_error::LogError;
use mpstats_client::wb_card::WbCardClient;
use mpstats_client::{FetchError, MpstatsClient};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use time::{Date, Duration};
use wb_types::iso_date;
use wb_types::supply::{
    self, DailyRecord, ItemMetadata, PlanningConfig, PlanningError, SupplyReport,
};

/// Days of history a monthly analysis looks back over.
pub const ANALYSIS_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Display, Error, From)]
pub enum SupplyPlanningError {
    Fetch(FetchError),
    Planning(PlanningError),
}

/// One point of the chart series, copied from the fetched records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesPoint {
    pub date: String,
    pub sales: u64,
    pub balance: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl From<&DailyRecord> for SalesPoint {
    fn from(r: &DailyRecord) -> Self {
        Self {
            date: iso_date::format(&r.date),
            sales: r.units_sold,
            balance: r.stock_balance,
            price: r.unit_price,
        }
    }
}

/// Dashboard view of a [`SupplyReport`], rounded for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyAnalysis {
    pub sku: String,
    pub name: String,
    pub brand: String,
    pub category: String,

    pub total_sales: u64,
    pub total_days: usize,
    pub avg_daily_sales: f64,
    pub start_balance: u64,
    pub end_balance: u64,
    pub avg_balance: f64,
    pub turnover: f64,

    pub target_stock: i64,
    pub safety_stock: i64,
    pub reorder_point: i64,
    pub recommended_order: i64,

    #[serde(with = "rust_decimal::serde::float")]
    pub revenue: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub cogs: Decimal,
    pub margin: f64,
    pub stock_value: i64,

    pub sales_trend: f64,
    pub trend: String,
    pub trend_emoji: &'static str,
    pub trend_text: &'static str,

    pub forecast_next_month: i64,
    pub planned_deliveries: i64,
    pub forecast_end_balance: i64,

    pub shortage: i64,
    pub overstock: i64,
    pub out_of_stock_risk: f64,

    pub days_of_supply: f64,
    pub sales_to_stock_ratio: f64,
    pub supply_priority: String,
    pub supply_priority_emoji: &'static str,
    pub supply_priority_text: &'static str,
    pub estimated_oos_date: String,

    pub sales_graph: Vec<SalesPoint>,
}

fn quantity(x: f64) -> i64 {
    x.round() as i64
}

impl SupplyAnalysis {
    pub fn new(metadata: ItemMetadata, report: &SupplyReport, records: &[DailyRecord]) -> Self {
        Self {
            sku: metadata.id,
            name: metadata.name,
            brand: metadata.brand,
            category: metadata.category,
            total_sales: report.total_sales,
            total_days: report.total_days,
            avg_daily_sales: round_to(report.avg_daily_sales, 2),
            start_balance: report.start_balance,
            end_balance: report.end_balance,
            avg_balance: round_to(report.avg_balance, 2),
            turnover: round_to(report.turnover, 2),
            target_stock: quantity(report.target_stock),
            safety_stock: quantity(report.safety_stock),
            reorder_point: quantity(report.reorder_point),
            recommended_order: quantity(report.recommended_order),
            revenue: report.revenue.round_dp(2),
            cogs: report.cogs.round_dp(2),
            margin: round_to(report.margin_pct, 2),
            stock_value: report.stock_value.round().try_into().unwrap_or(i64::MAX),
            sales_trend: round_to(report.sales_trend_pct, 2),
            trend: report.trend.to_string(),
            trend_emoji: report.trend.emoji(),
            trend_text: report.trend.label(),
            forecast_next_month: quantity(report.forecast_next_period),
            planned_deliveries: quantity(report.planned_deliveries),
            forecast_end_balance: quantity(report.forecast_end_balance),
            shortage: quantity(report.shortage),
            overstock: quantity(report.overstock),
            out_of_stock_risk: round_to(report.out_of_stock_risk_pct, 2),
            days_of_supply: round_to(report.days_of_supply, 1),
            sales_to_stock_ratio: round_to(report.sales_to_stock_ratio, 3),
            supply_priority: report.supply_priority.to_string(),
            supply_priority_emoji: report.supply_priority.emoji(),
            supply_priority_text: report.supply_priority.label(),
            estimated_oos_date: iso_date::format(&report.estimated_stockout_date),
            sales_graph: records.iter().map(SalesPoint::from).collect(),
        }
    }
}

/// Response envelope shared by the planning endpoints.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Fetches a month of sales and turns it into a supply plan.
pub struct SupplyPlanningService {
    mpstats: Arc<MpstatsClient>,
    cards: Option<Arc<WbCardClient>>,
}

impl SupplyPlanningService {
    pub fn new(mpstats: Arc<MpstatsClient>, cards: Option<Arc<WbCardClient>>) -> Self {
        Self { mpstats, cards }
    }

    pub fn mpstats(&self) -> &MpstatsClient {
        &self.mpstats
    }

    async fn metadata(&self, sku: &str) -> ItemMetadata {
        let Some(cards) = &self.cards else {
            return ItemMetadata::default();
        };
        cards
            .product(sku)
            .await
            .log_error("Unable to enrich item from WB card")
            .flatten()
            .unwrap_or_default()
    }

    pub async fn monthly_analysis(
        &self,
        sku: &str,
        config: &PlanningConfig,
        today: Date,
    ) -> Result<SupplyAnalysis, SupplyPlanningError> {
        let sku = sku.trim();
        let d1 = today - Duration::days(ANALYSIS_WINDOW_DAYS);
        let series = self.mpstats.item_series(sku, d1, today).await?;
        let report = supply::calculate(&series.records, config, today)?;
        let metadata = series.metadata.or(self.metadata(sku).await).or(ItemMetadata {
            id: sku.to_string(),
            ..Default::default()
        });
        log::info!(
            "Supply plan for {sku}: {} days, priority {}",
            report.total_days,
            report.supply_priority
        );
        Ok(SupplyAnalysis::new(metadata, &report, &series.records))
    }
}
