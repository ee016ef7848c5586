use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use sentinel_core::monitor::STATUS_OK;

use crate::error::ApiError;
use crate::state::AppState;

/// Escape a label value per the OpenMetrics text format.
fn label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let monitors = state.store.list_monitors().await?;
    let mut out = String::with_capacity(256 + monitors.len() * 256);

    let _ = writeln!(out, "# TYPE sentinel_monitors gauge");
    let _ = writeln!(out, "# HELP sentinel_monitors Number of configured monitors");
    let _ = writeln!(out, "sentinel_monitors {}", monitors.len());

    let _ = writeln!(out, "# TYPE sentinel_monitor info");
    let _ = writeln!(out, "# HELP sentinel_monitor Monitor definition");
    for m in &monitors {
        let _ = writeln!(
            out,
            "sentinel_monitor_info{{monitor_id=\"{}\",name=\"{}\",kind=\"{}\",active=\"{}\"}} 1",
            m.id,
            label(&m.name),
            m.kind,
            m.active
        );
    }

    let _ = writeln!(out, "# TYPE sentinel_monitor_up gauge");
    let _ = writeln!(out, "# HELP sentinel_monitor_up 1 if the last check returned 200");
    for m in &monitors {
        if let Some(last) = &m.last_check {
            let _ = writeln!(
                out,
                "sentinel_monitor_up{{monitor_id=\"{}\"}} {}",
                m.id,
                u8::from(last.status == STATUS_OK)
            );
        }
    }

    let _ = writeln!(out, "# TYPE sentinel_monitor_last_status gauge");
    let _ = writeln!(
        out,
        "# HELP sentinel_monitor_last_status Status of the last check (0 = unreachable)"
    );
    for m in &monitors {
        if let Some(last) = &m.last_check {
            let _ = writeln!(
                out,
                "sentinel_monitor_last_status{{monitor_id=\"{}\"}} {}",
                m.id, last.status
            );
        }
    }

    let _ = writeln!(out, "# TYPE sentinel_monitor_last_latency_ms gauge");
    let _ = writeln!(
        out,
        "# HELP sentinel_monitor_last_latency_ms Latency of the last check in milliseconds"
    );
    for m in &monitors {
        if let Some(last) = &m.last_check {
            let _ = writeln!(
                out,
                "sentinel_monitor_last_latency_ms{{monitor_id=\"{}\"}} {}",
                m.id, last.latency_ms
            );
        }
    }

    let _ = writeln!(out, "# EOF");

    Ok((
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_escapes_quotes_and_newlines() {
        assert_eq!(label(r#"a "b" \c"#), r#"a \"b\" \\c"#);
        assert_eq!(label("x\ny"), "x\\ny");
    }
}
