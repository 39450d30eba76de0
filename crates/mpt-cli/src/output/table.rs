use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

/// Leading columns for portfolio rows; anything not listed keeps its serialised order after
/// these.
const COLUMN_ORDER: &[&str] = &[
    "asset",
    "name",
    "objective",
    "percentile",
    "action",
    "expected_return",
    "volatility",
    "sharpe_ratio",
    "weight",
    "current_weight",
    "target_weight",
    "post_trade_weight",
    "drift",
    "relative_drift_pct",
    "trade_amount",
    "shares",
    "transaction_cost",
    "return_contribution",
    "risk_contribution",
];

/// Fields holding fractions of one, shown as percentages.
const PERCENT_FIELDS: &[&str] = &[
    "expected_return",
    "volatility",
    "weight",
    "current_weight",
    "target_weight",
    "post_trade_weight",
    "drift",
    "return_contribution",
    "risk_contribution",
    "fraction",
    "max_drawdown",
    "value_at_risk",
    "conditional_value_at_risk",
    "probability_of_loss",
    "success_rate",
    "turnover",
    "portfolio_return",
    "portfolio_volatility",
    "min_variance_return",
    "max_return",
    "weights",
];

/// Render the envelope as tables: row payloads as one table, otherwise the result's scalar
/// fields as a Field/Value table followed by one table per nested row list.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(rows)) = map.get("results") {
                print_rows(rows);
            } else if let Some(Value::Object(result)) = map.get("result") {
                print_result(result);
            } else {
                print_fields(map);
            }
            print_envelope_notes(map);
        }
        Value::Array(rows) => print_rows(rows),
        other => println!("{other}"),
    }
}

fn print_result(result: &Map<String, Value>) {
    print_fields(result);
    for (key, val) in result {
        if let Value::Array(rows) = val {
            if rows.first().map_or(false, Value::is_object) {
                println!("\n{}", header_label(key));
                print_rows(rows);
            }
        }
    }
}

/// Scalar fields, with nested objects (rebalance summary, terminal distribution) flattened
/// one level under a combined label.
fn print_fields(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        match val {
            Value::Object(inner) => {
                for (sub, v) in inner {
                    if !v.is_object() {
                        let label = format!("{} / {}", header_label(key), header_label(sub));
                        builder.push_record([label, format_cell(sub, v)]);
                    }
                }
            }
            Value::Array(rows) if rows.first().map_or(false, Value::is_object) => {}
            _ => builder.push_record([header_label(key), format_cell(key, val)]),
        }
    }
    println!("{}", Table::from(builder));
}

fn print_rows(rows: &[Value]) {
    let Some(Value::Object(first)) = rows.first() else {
        if rows.is_empty() {
            println!("(no rows)");
        }
        for item in rows {
            println!("{}", format_cell("", item));
        }
        return;
    };

    let columns = ordered_columns(first);
    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| header_label(c)));
    for item in rows {
        if let Value::Object(map) = item {
            builder.push_record(
                columns
                    .iter()
                    .map(|c| map.get(*c).map(|v| format_cell(c, v)).unwrap_or_default()),
            );
        }
    }
    println!("{}", Table::from(builder));
}

fn print_envelope_notes(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {w}");
            }
        }
    }
    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {meth}");
    }
}

fn ordered_columns(row: &Map<String, Value>) -> Vec<&str> {
    let mut columns: Vec<&str> = row.keys().map(String::as_str).collect();
    columns.sort_by_key(|c| COLUMN_ORDER.iter().position(|k| k == c).unwrap_or(usize::MAX));
    columns
}

fn header_label(key: &str) -> String {
    match key {
        "expected_return" => "Exp. Return".into(),
        "sharpe_ratio" => "Sharpe".into(),
        "relative_drift_pct" => "Rel. Drift %".into(),
        "var_95" => "VaR 95".into(),
        "cvar_95" => "CVaR 95".into(),
        "std_dev" => "Std Dev".into(),
        _ => key
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" "),
    }
}

fn format_cell(key: &str, value: &Value) -> String {
    let percent = PERCENT_FIELDS.contains(&key);
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if percent => format!("{:.2}%", f * 100.0),
            Some(f) if n.is_f64() => format!("{f:.4}"),
            _ => n.to_string(),
        },
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Null => "-".to_string(),
        Value::Array(items) => format_series(key, items),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Weight vectors list every entry; long paths (simulation bands) show start and end.
fn format_series(key: &str, items: &[Value]) -> String {
    if items.len() > 8 && items.iter().all(Value::is_number) {
        let first = format_cell(key, &items[0]);
        let last = format_cell(key, &items[items.len() - 1]);
        return format!("{first} .. {last} ({} steps)", items.len() - 1);
    }
    items
        .iter()
        .map(|v| format_cell(key, v))
        .collect::<Vec<_>>()
        .join(" / ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rebalance_row_columns_lead_with_asset_and_action() {
        let row = json!({
            "current_weight": "0.46",
            "trade_amount": "-10000",
            "action": "SELL",
            "asset": "SPY",
            "current_value": "46000"
        });
        let cols = ordered_columns(row.as_object().unwrap());
        assert_eq!(
            cols,
            vec!["asset", "action", "current_weight", "trade_amount", "current_value"]
        );
    }

    #[test]
    fn test_header_labels() {
        assert_eq!(header_label("expected_return"), "Exp. Return");
        assert_eq!(header_label("post_trade_weight"), "Post Trade Weight");
        assert_eq!(header_label("cvar_95"), "CVaR 95");
    }

    #[test]
    fn test_fractions_render_as_percent() {
        assert_eq!(format_cell("volatility", &json!(0.1234)), "12.34%");
        assert_eq!(format_cell("sharpe_ratio", &json!(0.51234)), "0.5123");
        assert_eq!(format_cell("weights", &json!([0.4, 0.6])), "40.00% / 60.00%");
        assert_eq!(format_cell("drift", &json!("0.06")), "0.06");
    }

    #[test]
    fn test_long_series_collapses_to_endpoints() {
        let path: Vec<f64> = (0..=10).map(|t| 1000.0 + t as f64).collect();
        assert_eq!(
            format_cell("values", &json!(path)),
            "1000.0000 .. 1010.0000 (10 steps)"
        );
    }
}
