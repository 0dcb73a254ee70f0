use derive_more::{Display, Error};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, Duration};

/// Days summed on each side of the window when comparing early and late sales.
pub const TREND_WINDOW_DAYS: usize = 7;
pub const MIN_TREND_RECORDS: usize = TREND_WINDOW_DAYS * 2;
pub const FORECAST_HORIZON_DAYS: f64 = 30.0;
pub const TREND_THRESHOLD_PCT: f64 = 10.0;

/// One calendar day of marketplace observations for a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    #[serde(with = "crate::iso_date")]
    pub date: Date,
    pub units_sold: u64,
    pub stock_balance: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
}

/// Identifier fields passed through to the report untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub category: String,
}

impl ItemMetadata {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty() && self.brand.is_empty() && self.category.is_empty()
    }

    /// Fills every empty field from `fallback`.
    pub fn or(self, fallback: ItemMetadata) -> ItemMetadata {
        fn pick(a: String, b: String) -> String {
            if a.trim().is_empty() {
                b
            } else {
                a
            }
        }
        ItemMetadata {
            id: pick(self.id, fallback.id),
            name: pick(self.name, fallback.name),
            brand: pick(self.brand, fallback.brand),
            category: pick(self.category, fallback.category),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningConfig {
    pub lead_time_days: u32,
    pub safety_days: u32,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub unit_cost: Decimal,
}

impl PlanningConfig {
    pub fn new(
        lead_time_days: u32,
        safety_days: u32,
        unit_cost: Decimal,
    ) -> Result<Self, PlanningError> {
        if lead_time_days == 0 {
            return Err(PlanningError::ZeroLeadTime);
        }
        if unit_cost.is_sign_negative() && !unit_cost.is_zero() {
            return Err(PlanningError::NegativeUnitCost);
        }
        Ok(Self {
            lead_time_days,
            safety_days,
            unit_cost,
        })
    }

    /// Days of demand the target stock has to cover.
    pub fn cover_days(&self) -> u32 {
        self.lead_time_days.saturating_add(self.safety_days)
    }
}

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlanningError {
    #[display("Not enough sales data to build a supply plan")]
    InsufficientData,
    #[display("Delivery time must be at least one day")]
    ZeroLeadTime,
    #[display("Purchase price cannot be negative")]
    NegativeUnitCost,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    #[display("growth")]
    Growth,
    #[display("decline")]
    Decline,
    #[display("stable")]
    Stable,
}

impl Trend {
    pub fn classify(sales_trend_pct: f64) -> Self {
        if sales_trend_pct > TREND_THRESHOLD_PCT {
            Self::Growth
        } else if sales_trend_pct < -TREND_THRESHOLD_PCT {
            Self::Decline
        } else {
            Self::Stable
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Growth => "📈",
            Self::Decline => "📉",
            Self::Stable => "➡️",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Growth => "Рост",
            Self::Decline => "Падение",
            Self::Stable => "Стабильно",
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplyPriority {
    #[display("high")]
    High,
    #[display("medium")]
    Medium,
    #[display("low")]
    Low,
}

impl SupplyPriority {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::High => "🔴",
            Self::Medium => "🟡",
            Self::Low => "🟢",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "Срочно",
            Self::Medium => "Важно",
            Self::Low => "В порядке",
        }
    }
}

/// Supply planning figures for one item over one observation window.
///
/// Values are unrounded; rounding for display happens where the report is serialised.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyReport {
    pub total_sales: u64,
    pub total_days: usize,
    pub avg_daily_sales: f64,
    pub start_balance: u64,
    pub end_balance: u64,
    pub avg_balance: f64,
    pub turnover: f64,

    pub target_stock: f64,
    pub max_daily_sales: u64,
    pub safety_stock: f64,
    pub reorder_point: f64,
    pub recommended_order: f64,

    pub revenue: Decimal,
    pub cogs: Decimal,
    pub margin_pct: f64,
    pub stock_value: Decimal,

    pub sales_trend_pct: f64,
    pub trend: Trend,

    pub forecast_next_period: f64,
    pub planned_deliveries: f64,
    pub forecast_end_balance: f64,

    pub shortage: f64,
    pub overstock: f64,
    pub out_of_stock_risk_pct: f64,

    pub days_of_supply: f64,
    pub sales_to_stock_ratio: f64,
    pub supply_priority: SupplyPriority,
    pub estimated_stockout_date: Date,
}

/// `numerator / denominator`, or zero when the denominator is zero.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or_default()
}

/// Builds the supply plan for `records` as seen on `today`.
///
/// Records are re-sorted by date; callers normally pass them sorted already.
pub fn calculate(
    records: &[DailyRecord],
    config: &PlanningConfig,
    today: Date,
) -> Result<SupplyReport, PlanningError> {
    let mut records = records.to_vec();
    records.sort_by_key(|r| r.date);
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Err(PlanningError::InsufficientData);
    };

    let total_days = records.len();
    let total_sales: u64 = records.iter().map(|r| r.units_sold).sum();
    let avg_daily_sales = total_sales as f64 / total_days as f64;

    let start_balance = first.stock_balance;
    let end_balance = last.stock_balance;
    // Mean of the window boundaries, not of the whole series.
    let avg_balance = (start_balance as f64 + end_balance as f64) / 2.0;
    let turnover = safe_ratio(total_sales as f64, avg_balance);

    let lead_time = f64::from(config.lead_time_days);
    let cover_days = f64::from(config.cover_days());
    let target_stock = avg_daily_sales * cover_days;

    let max_daily_sales = records.iter().map(|r| r.units_sold).max().unwrap_or_default();
    let safety_stock = if max_daily_sales as f64 > avg_daily_sales {
        (max_daily_sales as f64 - avg_daily_sales) * lead_time
    } else {
        0.0
    };
    let reorder_point = avg_daily_sales * lead_time + safety_stock;

    let end = end_balance as f64;
    let recommended_order = (target_stock - end).max(0.0);

    let revenue: Decimal = records
        .iter()
        .map(|r| Decimal::from(r.units_sold) * r.unit_price)
        .sum();
    let cogs = Decimal::from(total_sales) * config.unit_cost;
    let margin_pct = safe_ratio(to_f64(revenue - cogs), to_f64(revenue)) * 100.0;
    let stock_value = Decimal::from(end_balance) * config.unit_cost;

    let sales_trend_pct = sales_trend_pct(&records);
    let trend = Trend::classify(sales_trend_pct);

    let forecast_next_period =
        avg_daily_sales * FORECAST_HORIZON_DAYS * (1.0 + sales_trend_pct / 100.0);
    let planned_deliveries = recommended_order;
    let forecast_end_balance = end - forecast_next_period + planned_deliveries;

    let shortage = (reorder_point - end).max(0.0);
    // A reorder point above the target stock would let both flags fire at once.
    let overstock = if shortage > 0.0 {
        0.0
    } else {
        (end - target_stock).max(0.0)
    };
    let out_of_stock_risk_pct = safe_ratio(end, reorder_point) * 100.0;

    let days_of_supply = safe_ratio(end, avg_daily_sales);
    let sales_to_stock_ratio = safe_ratio(total_sales as f64, avg_balance + total_sales as f64);
    let supply_priority = if end < reorder_point {
        SupplyPriority::High
    } else if days_of_supply < cover_days {
        SupplyPriority::Medium
    } else {
        SupplyPriority::Low
    };
    let estimated_stockout_date = today
        .checked_add(Duration::days(days_of_supply.floor() as i64))
        .unwrap_or(Date::MAX);

    Ok(SupplyReport {
        total_sales,
        total_days,
        avg_daily_sales,
        start_balance,
        end_balance,
        avg_balance,
        turnover,
        target_stock,
        max_daily_sales,
        safety_stock,
        reorder_point,
        recommended_order,
        revenue,
        cogs,
        margin_pct,
        stock_value,
        sales_trend_pct,
        trend,
        forecast_next_period,
        planned_deliveries,
        forecast_end_balance,
        shortage,
        overstock,
        out_of_stock_risk_pct,
        days_of_supply,
        sales_to_stock_ratio,
        supply_priority,
        estimated_stockout_date,
    })
}

/// Percent change between the first and the last week of the window.
fn sales_trend_pct(sorted: &[DailyRecord]) -> f64 {
    if sorted.len() < MIN_TREND_RECORDS {
        return 0.0;
    }
    let week = |r: &[DailyRecord]| r.iter().map(|r| r.units_sold).sum::<u64>() as f64;
    let first = week(&sorted[..TREND_WINDOW_DAYS]);
    let last = week(&sorted[sorted.len() - TREND_WINDOW_DAYS..]);
    safe_ratio(last - first, first) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rust_decimal_macros::dec;
    use time::macros::date;

    const TODAY: Date = date!(2024 - 07 - 31);

    fn series(days: &[(u64, u64)], price: Decimal) -> Vec<DailyRecord> {
        days.iter()
            .enumerate()
            .map(|(i, &(units_sold, stock_balance))| DailyRecord {
                date: date!(2024 - 07 - 01) + Duration::days(i as i64),
                units_sold,
                stock_balance,
                unit_price: price,
            })
            .collect()
    }

    fn config(lead: u32, safety: u32, cost: Decimal) -> PlanningConfig {
        PlanningConfig::new(lead, safety, cost).unwrap()
    }

    #[test]
    fn flat_month_is_stable() {
        let records = series(&[(10, 300); 30], dec!(100));
        let report = calculate(&records, &config(7, 3, dec!(0)), TODAY).unwrap();

        assert_eq!(report.total_sales, 300);
        assert_eq!(report.total_days, 30);
        assert_eq!(report.avg_daily_sales, 10.0);
        assert_eq!(report.avg_balance, 300.0);
        assert_eq!(report.turnover, 1.0);
        assert_eq!(report.target_stock, 100.0);
        assert_eq!(report.safety_stock, 0.0);
        assert_eq!(report.reorder_point, 70.0);
        assert_eq!(report.recommended_order, 0.0);
        assert_eq!(report.sales_trend_pct, 0.0);
        assert_eq!(report.trend, Trend::Stable);
        assert_eq!(report.revenue, dec!(30000));
        assert_eq!(report.margin_pct, 100.0);
        assert_eq!(report.overstock, 200.0);
        assert_eq!(report.shortage, 0.0);
        assert_eq!(report.days_of_supply, 30.0);
        assert_eq!(report.supply_priority, SupplyPriority::Low);
        assert_eq!(report.estimated_stockout_date, date!(2024 - 08 - 30));
    }

    #[test]
    fn doubled_last_week_is_growth() {
        let mut days = vec![(10, 100); 7];
        days.extend(vec![(20, 100); 7]);
        let report = calculate(&series(&days, dec!(50)), &config(7, 3, dec!(0)), TODAY).unwrap();

        assert!((report.sales_trend_pct - 100.0).abs() < 1e-9);
        assert_eq!(report.trend, Trend::Growth);
        assert!((report.forecast_next_period - 15.0 * 30.0 * 2.0).abs() < 1e-9);
    }

    #[test]
    fn halved_last_week_is_decline() {
        let mut days = vec![(20, 500); 7];
        days.extend(vec![(5, 500); 3]);
        days.extend(vec![(10, 500); 7]);
        let report = calculate(&series(&days, dec!(50)), &config(7, 3, dec!(0)), TODAY).unwrap();

        assert!((report.sales_trend_pct + 50.0).abs() < 1e-9);
        assert_eq!(report.trend, Trend::Decline);
    }

    #[test]
    fn short_window_skips_trend() {
        let days = vec![(1, 10), (1, 10), (1, 10), (50, 10)];
        let report = calculate(&series(&days, dec!(1)), &config(1, 0, dec!(0)), TODAY).unwrap();
        assert_eq!(report.sales_trend_pct, 0.0);
        assert_eq!(report.trend, Trend::Stable);
    }

    #[test]
    fn single_record_is_stable() {
        let report =
            calculate(&series(&[(3, 40)], dec!(10)), &config(5, 2, dec!(0)), TODAY).unwrap();
        assert_eq!(report.sales_trend_pct, 0.0);
        assert_eq!(report.trend, Trend::Stable);
        assert_eq!(report.avg_daily_sales, 3.0);
    }

    #[test]
    fn empty_stock_is_urgent() {
        let days = vec![(5, 20), (5, 15), (5, 10), (5, 0)];
        let report = calculate(&series(&days, dec!(10)), &config(7, 3, dec!(0)), TODAY).unwrap();

        assert!(report.reorder_point > 0.0);
        assert_eq!(report.out_of_stock_risk_pct, 0.0);
        assert_eq!(report.supply_priority, SupplyPriority::High);
        assert_eq!(report.days_of_supply, 0.0);
        assert_eq!(report.estimated_stockout_date, TODAY);
        assert_eq!(report.recommended_order, 50.0);
        assert_eq!(report.shortage, 35.0);
    }

    #[test]
    fn empty_series_is_rejected() {
        assert_eq!(
            calculate(&[], &config(7, 3, dec!(0)), TODAY),
            Err(PlanningError::InsufficientData)
        );
    }

    #[test]
    fn zero_balance_window_has_zero_turnover() {
        let days = vec![(4, 0), (4, 12), (4, 0)];
        let report = calculate(&series(&days, dec!(10)), &config(2, 1, dec!(0)), TODAY).unwrap();
        assert_eq!(report.avg_balance, 0.0);
        assert_eq!(report.turnover, 0.0);
    }

    #[test]
    fn no_sales_degrades_to_zeroes() {
        let report = calculate(&series(&[(0, 50); 20], dec!(10)), &config(7, 3, dec!(5)), TODAY)
            .unwrap();
        assert_eq!(report.avg_daily_sales, 0.0);
        assert_eq!(report.days_of_supply, 0.0);
        assert_eq!(report.margin_pct, 0.0);
        assert_eq!(report.out_of_stock_risk_pct, 0.0);
        assert_eq!(report.stock_value, dec!(250));
        assert_eq!(report.supply_priority, SupplyPriority::Medium);
    }

    #[test]
    fn unit_cost_drives_financials() {
        let days = vec![(2, 30), (4, 26), (6, 20)];
        let report = calculate(&series(&days, dec!(250)), &config(3, 1, dec!(100)), TODAY).unwrap();
        assert_eq!(report.revenue, dec!(3000));
        assert_eq!(report.cogs, dec!(1200));
        assert!((report.margin_pct - 60.0).abs() < 1e-9);
        assert_eq!(report.stock_value, dec!(2000));
    }

    #[test]
    fn peak_day_builds_safety_stock() {
        let days = vec![(2, 100), (2, 100), (8, 100)];
        let report = calculate(&series(&days, dec!(1)), &config(5, 0, dec!(0)), TODAY).unwrap();
        assert_eq!(report.max_daily_sales, 8);
        assert!((report.safety_stock - 20.0).abs() < 1e-9);
        assert!((report.reorder_point - 40.0).abs() < 1e-9);
    }

    #[test]
    fn unsorted_input_is_ordered_by_date() {
        let mut records = series(&[(1, 10), (1, 20), (1, 30)], dec!(1));
        records.reverse();
        let report = calculate(&records, &config(1, 0, dec!(0)), TODAY).unwrap();
        assert_eq!(report.start_balance, 10);
        assert_eq!(report.end_balance, 30);
    }

    #[test]
    fn invariants_hold_for_random_series() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let len = rng.gen_range(1..=45);
            let days = (0..len)
                .map(|_| (rng.gen_range(0..60), rng.gen_range(0..400)))
                .collect::<Vec<_>>();
            let cfg = config(rng.gen_range(1..30), rng.gen_range(0..15), dec!(12.5));
            let records = series(&days, dec!(99.9));
            let report = calculate(&records, &cfg, TODAY).unwrap();

            let total: u64 = days.iter().map(|(s, _)| s).sum();
            assert_eq!(report.avg_daily_sales, total as f64 / len as f64);
            assert!(report.recommended_order >= 0.0);
            assert!(report.shortage == 0.0 || report.overstock == 0.0);
            assert!(report.turnover >= 0.0);
        }
    }

    #[test]
    fn config_rejects_zero_lead_time() {
        assert_eq!(
            PlanningConfig::new(0, 3, dec!(0)),
            Err(PlanningError::ZeroLeadTime)
        );
        assert_eq!(
            PlanningConfig::new(1, 3, dec!(-1)),
            Err(PlanningError::NegativeUnitCost)
        );
    }

    #[test]
    fn metadata_fills_gaps_from_fallback() {
        let card = ItemMetadata {
            name: "Платье".to_string(),
            ..Default::default()
        };
        let merged = card.or(ItemMetadata {
            id: "123".to_string(),
            name: "ignored".to_string(),
            brand: "Brand".to_string(),
            category: String::new(),
        });
        assert_eq!(merged.id, "123");
        assert_eq!(merged.name, "Платье");
        assert_eq!(merged.brand, "Brand");
        assert!(merged.category.is_empty());
    }
}
