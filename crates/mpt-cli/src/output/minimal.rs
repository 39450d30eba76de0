use serde_json::Value;

/// Print just the key answer value from the output.
///
/// Heuristic: look for well-known result fields in order of priority,
/// then fall back to the first field in the result object.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let priority_keys = [
        "weights",
        "sharpe_ratio",
        "needs_rebalancing",
        "best_sharpe",
        "best_median",
        "terminal",
        "points",
        "mean_returns",
        "statistics",
    ];

    if let Value::Object(map) = result_obj {
        // Rebalance summaries live one level down.
        if let Some(Value::Object(summary)) = map.get("summary") {
            if let Some(val) = summary.get("needs_rebalancing") {
                println!("{}", format_minimal(val));
                return;
            }
        }

        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    println!("{}", format_minimal(val));
                    return;
                }
            }
        }

        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result_obj));
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(arr) if arr.iter().all(Value::is_number) => arr
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(","),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
