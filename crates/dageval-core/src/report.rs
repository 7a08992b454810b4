use crate::types::{CaseResult, EvalResult, Score};

/// Renders a self-contained HTML page: a summary header and one row per
/// case, with each metric's verbose DAG log folded underneath.
pub fn generate_html_report(result: &EvalResult) -> String {
    let mut rows = String::new();

    for (idx, cr) in result.cases.iter().enumerate() {
        let id = cr.case.id.clone().unwrap_or_else(|| format!("#{}", idx + 1));
        let all_passed = cr.all_passed();
        let passed_icon = if all_passed { "✓" } else { "✗" };
        let row_class = if all_passed { "pass" } else { "fail" };

        let mut scores_html = String::new();
        for score in &cr.scores {
            let score_class = if score.passed { "pass" } else { "fail" };
            scores_html.push_str(&format!(
                r#"<span class="badge {}">{}: {:.2}</span>"#,
                score_class,
                html_escape(&score.name),
                score.value
            ));
        }

        rows.push_str(&format!(
            r#"
            <tr class="{}">
                <td>{}</td>
                <td class="icon">{}</td>
                <td class="avg-score">{:.2}</td>
                <td><pre>{}</pre></td>
                <td><pre>{}</pre></td>
                <td class="scores">{}</td>
                <td>{}</td>
            </tr>
            <tr class="log-row {}">
                <td colspan="7">{}</td>
            </tr>
            "#,
            row_class,
            html_escape(&id),
            passed_icon,
            cr.avg_score(),
            html_escape(&cr.case.input),
            html_escape(cr.case.actual_output.as_deref().unwrap_or("")),
            scores_html,
            html_escape(&reasons(cr)),
            row_class,
            logs_html(idx, &cr.scores)
        ));
    }

    let pass_rate_class = if result.summary.pass_rate >= 0.8 {
        "good"
    } else if result.summary.pass_rate >= 0.5 {
        "warn"
    } else {
        "bad"
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>DAG Evaluation Report</title>
    <style>
        * {{ box-sizing: border-box; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            max-width: 1400px;
            margin: 0 auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
        }}
        .summary {{
            display: flex;
            gap: 20px;
            margin: 20px 0 30px 0;
            padding: 20px;
            background: #f8f9fa;
            border-radius: 6px;
        }}
        .summary-item {{ flex: 1; }}
        .summary-label {{
            font-size: 12px;
            color: #666;
            text-transform: uppercase;
        }}
        .summary-value {{ font-size: 28px; font-weight: 600; color: #333; }}
        .summary-value.good {{ color: #28a745; }}
        .summary-value.warn {{ color: #ffc107; }}
        .summary-value.bad {{ color: #dc3545; }}
        table {{ width: 100%; border-collapse: collapse; }}
        th {{
            background: #343a40;
            color: white;
            padding: 12px;
            text-align: left;
            font-size: 13px;
        }}
        td {{ padding: 12px; border-bottom: 1px solid #dee2e6; vertical-align: top; }}
        tr.pass {{ background: #f0f9f4; }}
        tr.fail {{ background: #fef3f2; }}
        .icon {{ text-align: center; font-size: 18px; width: 50px; }}
        .avg-score {{ font-weight: 600; color: #495057; }}
        pre {{
            margin: 0;
            padding: 8px;
            background: #f8f9fa;
            border-radius: 4px;
            font-size: 12px;
            max-height: 150px;
            overflow: auto;
            white-space: pre-wrap;
        }}
        .log-container pre {{ max-height: 600px; }}
        .badge {{ padding: 4px 8px; border-radius: 4px; font-size: 11px; font-weight: 600; }}
        .badge.pass {{ background: #d4edda; color: #155724; }}
        .badge.fail {{ background: #f8d7da; color: #721c24; }}
        .timestamp {{ color: #6c757d; font-size: 14px; }}
        .log-toggle {{
            background: #007bff;
            color: white;
            border: none;
            padding: 6px 12px;
            border-radius: 4px;
            cursor: pointer;
            font-size: 12px;
        }}
    </style>
    <script>
        function toggleLogs(id) {{
            const element = document.getElementById(id);
            element.style.display = element.style.display === 'none' ? 'block' : 'none';
        }}
    </script>
</head>
<body>
    <div class="container">
        <h1>DAG Evaluation Report</h1>
        <div class="timestamp">Generated: {}</div>

        <div class="summary">
            <div class="summary-item">
                <div class="summary-label">Total Cases</div>
                <div class="summary-value">{}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Passed</div>
                <div class="summary-value good">{}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Pass Rate</div>
                <div class="summary-value {}">{:.1}%</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Avg Score</div>
                <div class="summary-value">{:.3}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Evaluation Cost</div>
                <div class="summary-value">{:.4}</div>
            </div>
        </div>

        <table>
            <thead>
                <tr>
                    <th>ID</th>
                    <th>Status</th>
                    <th>Avg Score</th>
                    <th>Input</th>
                    <th>Actual Output</th>
                    <th>Scores</th>
                    <th>Reason</th>
                </tr>
            </thead>
            <tbody>
                {}
            </tbody>
        </table>
    </div>
</body>
</html>"#,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        result.summary.total,
        result.summary.passed,
        pass_rate_class,
        result.summary.pass_rate * 100.0,
        result.summary.avg_score,
        result.summary.evaluation_cost,
        rows
    )
}

fn reasons(cr: &CaseResult) -> String {
    if let Some(err) = &cr.error {
        return format!("task error: {err}");
    }
    cr.scores
        .iter()
        .filter_map(|s| s.reason.as_ref().map(|r| format!("{}: {}", s.name, r)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn logs_html(case_idx: usize, scores: &[Score]) -> String {
    let mut content = String::new();
    for score in scores {
        if let Some(logs) = &score.verbose_logs {
            content.push_str(&format!(
                "<strong>{}</strong><pre>{}</pre>",
                html_escape(&score.name),
                html_escape(logs)
            ));
        }
    }
    if content.is_empty() {
        return content;
    }
    format!(
        r#"<button class="log-toggle" onclick="toggleLogs('logs-{case_idx}')">verbose logs</button>
        <div id="logs-{case_idx}" class="log-container" style="display: none;">{content}</div>"#
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
