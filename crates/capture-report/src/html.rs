//! Static HTML report, one collapsible section per phase.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Instant;

use tracing::info;

use crate::escape::{html_escape, shorten};
use crate::model::{ReportModel, ReportRow, ReportSection};
use crate::writer::write_output;
use crate::{ExportStats, Exporter, ReportError};

const STYLE: &str = r#"
        body { font-family: Arial, sans-serif; margin: 20px; color: #222; }
        h1 { color: #333; }
        .summary { color: #555; margin-bottom: 16px; }
        section { margin-bottom: 24px; }
        section h2 { display: flex; gap: 12px; align-items: center; font-size: 1.2em; }
        section h2 .count { color: #777; font-weight: normal; }
        button.toggle { font-size: 0.8em; cursor: pointer; }
        table { border-collapse: collapse; width: 100%; }
        th, td { border: 1px solid #ddd; padding: 6px 8px; text-align: left; vertical-align: top; }
        th { background-color: #f2f2f2; }
        tr:nth-child(even) { background-color: #f9f9f9; }
        tr.ok .status { color: #1a7f37; font-weight: bold; }
        tr.bad .status { color: #cf222e; font-weight: bold; }
        td.url a { color: #0969da; word-break: break-all; }
        td.empty { color: #777; font-style: italic; text-align: center; }
        pre { margin: 4px 0 0; max-height: 320px; overflow: auto; background: #f6f8fa; padding: 6px; }
        .hidden { display: none; }
"#;

const SCRIPT: &str = r#"
        function toggleSection(id, button) {
            var body = document.getElementById(id);
            var hidden = body.classList.toggle('hidden');
            button.textContent = hidden ? 'Show' : 'Hide';
        }
"#;

pub fn render_html(model: &ReportModel, url_display_chars: usize) -> String {
    let failed = model.failed_rows();
    let mut sections = String::new();
    for (idx, section) in model.sections.iter().enumerate() {
        render_section(&mut sections, idx, section, url_display_chars);
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>{STYLE}    </style>
    <script>{SCRIPT}    </script>
</head>
<body>
    <h1>{title}</h1>
    <p class="summary">Generated {generated} &middot; {total} calls across {phases} phases &middot; {failed} not OK</p>
{sections}    <footer class="summary">Generated by api-sniffer {version}</footer>
</body>
</html>
"#,
        title = html_escape(&model.title),
        generated = html_escape(&model.generated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        total = model.total_rows(),
        phases = model.sections.len(),
        version = env!("CARGO_PKG_VERSION"),
    )
}

fn render_section(out: &mut String, idx: usize, section: &ReportSection, url_chars: usize) {
    let body_id = format!("phase-{idx}");
    let label = html_escape(&section.label);
    let _ = write!(
        out,
        r#"    <section>
        <h2>{label} <span class="count">({count})</span> <button class="toggle" onclick="toggleSection('{body_id}', this)">Hide</button></h2>
        <table id="{body_id}">
            <thead><tr><th>Time</th><th>Status</th><th>Method</th><th>URL</th><th>Response</th></tr></thead>
            <tbody>
"#,
        count = section.rows.len(),
    );
    if section.rows.is_empty() {
        out.push_str(
            "            <tr><td class=\"empty\" colspan=\"5\">No calls captured</td></tr>\n",
        );
    }
    for row in &section.rows {
        render_row(out, row, url_chars);
    }
    out.push_str("            </tbody>\n        </table>\n    </section>\n");
}

fn render_row(out: &mut String, row: &ReportRow, url_chars: usize) {
    let class = if row.is_ok() { "ok" } else { "bad" };
    let url = html_escape(&row.url);
    let shown = html_escape(&shorten(&row.url, url_chars));
    let body = match &row.body {
        Some(body) => format!(
            "<details><summary>view</summary><pre>{}</pre></details>",
            html_escape(body)
        ),
        None => String::new(),
    };
    let _ = writeln!(
        out,
        r#"            <tr class="call {class}"><td>{time}</td><td class="status">{status}</td><td>{method}</td><td class="url"><a href="{url}" title="{url}" target="_blank" rel="noopener">{shown}</a></td><td>{body}</td></tr>"#,
        time = html_escape(&row.time),
        status = row.status,
        method = html_escape(&row.method),
    );
}

/// Export a report model as a static HTML page.
pub struct HtmlExporter {
    model: ReportModel,
    url_display_chars: usize,
}

impl HtmlExporter {
    pub fn new(model: ReportModel, url_display_chars: usize) -> Self {
        Self {
            model,
            url_display_chars,
        }
    }
}

#[async_trait::async_trait]
impl Exporter for HtmlExporter {
    async fn export(&self, output_path: &Path) -> Result<ExportStats, ReportError> {
        let start = Instant::now();
        let html = render_html(&self.model, self.url_display_chars);
        write_output(output_path, html.as_bytes()).await?;
        info!(
            target: "capture-report",
            path = %output_path.display(),
            phases = self.model.sections.len(),
            total = self.model.total_rows(),
            "html report written"
        );
        Ok(ExportStats {
            total_calls: self.model.total_rows(),
            phases: self.model.sections.len(),
            bytes_written: html.len() as u64,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
