use crate::supply::SupplyAnalysis;
use csv::WriterBuilder;

/// Metric/value sheet followed by the daily series, ready to download.
pub fn supply_analysis_csv(a: &SupplyAnalysis) -> Result<Vec<u8>, anyhow::Error> {
    let mut w = WriterBuilder::new().flexible(true).from_writer(vec![]);
    let metrics: Vec<(&str, String)> = vec![
        ("sku", a.sku.clone()),
        ("name", a.name.clone()),
        ("brand", a.brand.clone()),
        ("category", a.category.clone()),
        ("total_sales", a.total_sales.to_string()),
        ("total_days", a.total_days.to_string()),
        ("avg_daily_sales", a.avg_daily_sales.to_string()),
        ("start_balance", a.start_balance.to_string()),
        ("end_balance", a.end_balance.to_string()),
        ("avg_balance", a.avg_balance.to_string()),
        ("turnover", a.turnover.to_string()),
        ("target_stock", a.target_stock.to_string()),
        ("safety_stock", a.safety_stock.to_string()),
        ("reorder_point", a.reorder_point.to_string()),
        ("recommended_order", a.recommended_order.to_string()),
        ("revenue", a.revenue.to_string()),
        ("cogs", a.cogs.to_string()),
        ("margin", a.margin.to_string()),
        ("stock_value", a.stock_value.to_string()),
        ("sales_trend", a.sales_trend.to_string()),
        ("trend", a.trend.clone()),
        ("forecast_next_month", a.forecast_next_month.to_string()),
        ("planned_deliveries", a.planned_deliveries.to_string()),
        ("forecast_end_balance", a.forecast_end_balance.to_string()),
        ("shortage", a.shortage.to_string()),
        ("overstock", a.overstock.to_string()),
        ("out_of_stock_risk", a.out_of_stock_risk.to_string()),
        ("days_of_supply", a.days_of_supply.to_string()),
        ("sales_to_stock_ratio", a.sales_to_stock_ratio.to_string()),
        ("supply_priority", a.supply_priority.clone()),
        ("estimated_oos_date", a.estimated_oos_date.clone()),
    ];
    w.write_record(["metric", "value"])?;
    for (metric, value) in &metrics {
        w.write_record([*metric, value.as_str()])?;
    }
    w.write_record(None::<&[u8]>)?;
    w.write_record(["date", "sales", "balance", "price"])?;
    for p in &a.sales_graph {
        w.write_record([
            p.date.clone(),
            p.sales.to_string(),
            p.balance.to_string(),
            p.price.to_string(),
        ])?;
    }
    Ok(w.into_inner().map_err(|e| e.into_error())?)
}

pub fn export_file_name(sku: &str) -> String {
    let sku: String = sku
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!("supply_plan_{sku}.csv")
}
