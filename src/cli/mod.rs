//! Client side: the session lifecycle the CLI drives, its transports and storage,
//! and response rendering.

use serde_json::Value;

pub mod connectivity;
pub mod persist;
pub mod redirect;
pub mod session;

pub use connectivity::{ApiRequest, ApiResponse, AuthTransport, HttpMethod, HttpTransport, TransportError};
pub use persist::{FileSessionStorage, Lifecycle, MemorySessionStorage, PersistedSession, SessionStorage};
pub use redirect::{landing_view, LandingView};
pub use session::{SessionError, SessionLifecycle, SessionState};

/// Render the first list of objects in a response (`members`, `results`, ...) as an ASCII table.
/// Returns `None` when the response has no tabular part.
pub fn render_table(val: &Value) -> Option<String> {
    let rows_v = match val {
        Value::Array(_) => val,
        Value::Object(map) => map.values().find(|v| matches!(v, Value::Array(a) if !a.is_empty()))?,
        _ => return None,
    };
    let (cols, rows) = tabulate(rows_v)?;
    if rows.is_empty() { return None; }

    let max_col_width: usize = 60;
    let mut widths: Vec<usize> = cols.iter().map(|s| display_len(s).min(max_col_width)).collect();
    for r in &rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            let w = display_len(cell);
            if w > widths[i] { widths[i] = w.min(max_col_width); }
        }
    }

    let sep = build_separator(&widths);
    let mut out = Vec::with_capacity(rows.len() + 5);
    out.push(sep.clone());
    out.push(build_row(&cols, &widths));
    out.push(sep.clone());
    for r in &rows { out.push(build_row(r, &widths)); }
    out.push(sep);
    out.push(format!("rows: {}", rows.len()));
    Some(out.join("\n"))
}

// Objects become one column per key (sorted union); scalars a single "value" column.
fn tabulate(v: &Value) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    let Value::Array(arr) = v else { return None; };
    let mut keys: Vec<String> = Vec::new();
    let mut all_objects = true;
    for el in arr {
        if let Value::Object(map) = el {
            for k in map.keys() { if !keys.contains(k) { keys.push(k.clone()); } }
        } else {
            all_objects = false;
        }
    }
    if all_objects && !keys.is_empty() {
        keys.sort();
        let rows = arr
            .iter()
            .filter_map(|el| el.as_object())
            .map(|map| keys.iter().map(|k| map.get(k).map(to_cell_string).unwrap_or_default()).collect())
            .collect();
        Some((keys, rows))
    } else {
        let rows = arr.iter().map(|el| vec![to_cell_string(el)]).collect();
        Some((vec!["value".to_string()], rows))
    }
}

fn to_cell_string(v: &Value) -> String {
    match v {
        Value::Null => String::from("NULL"),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn display_len(s: &str) -> usize { s.chars().count() }

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let text = truncate(&cell, *w);
        let pad = w.saturating_sub(display_len(&text));
        s.push(' ');
        s.push_str(&text);
        s.push_str(&" ".repeat(pad));
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if display_len(s) <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}
