pub mod csv_out;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::Value;

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => print_json(&strip_row_view(value)),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// Commands with a per-row payload also attach it under `results` for the row-oriented
/// renderers; JSON output keeps only the envelope.
fn strip_row_view(value: &Value) -> Value {
    let mut v = value.clone();
    if let Value::Object(ref mut map) = v {
        map.remove("results");
    }
    v
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("JSON serialization error: {}", e),
    }
}
