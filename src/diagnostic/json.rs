use super::{Diagnostic, Severity};

/// One JSON object per diagnostic (NDJSON on stderr), machine-readable
/// for editors and agents.
pub fn render(d: &Diagnostic) -> String {
    let severity = match d.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };

    let mut obj = serde_json::json!({
        "severity": severity,
        "message": d.message,
        "notes": d.notes,
    });
    if let Some(code) = d.code {
        obj["code"] = serde_json::Value::String(code.to_string());
    }
    if let Some(loc) = &d.loc {
        obj["file"] = serde_json::Value::String(loc.file.clone());
        obj["line"] = serde_json::Value::from(loc.line);
        obj["col"] = serde_json::Value::from(loc.col);
    }
    if let Some(snippet) = &d.snippet {
        obj["snippet"] = serde_json::Value::String(snippet.clone());
    }
    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj).unwrap_or_else(|_| {
        r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string()
    })
}
