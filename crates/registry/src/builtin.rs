//! Built-in task definitions registered at startup.
//!
//! Parameters flow into the child either as positional shell arguments or as
//! numbers validated by the schema, so no shell-quoting of user strings ever
//! happens inside a generated script.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::registry::TaskSpec;

pub fn builtin_tasks() -> Vec<TaskSpec> {
    vec![demo_loop(), shell_command(), report_showcase()]
}

/// A slow counting loop that emits structured progress events.
fn demo_loop() -> TaskSpec {
    let schema = json!({
        "type": "object",
        "properties": {
            "count": {"type": "integer", "description": "number of steps"},
            "message": {"type": "string", "description": "text echoed each step"}
        },
        "required": []
    });
    TaskSpec::new(
        "demo_loop",
        "Demo loop",
        "1.0.0",
        schema,
        Arc::new(|params: &Value| {
            let count = params.get("count").and_then(Value::as_i64).unwrap_or(5);
            if !(1..=3600).contains(&count) {
                return Err(format!("count must be between 1 and 3600, got {count}"));
            }
            let message = params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Hello");
            let script = format!(
                r#"i=1
while [ "$i" -le {count} ]; do
  pct=$((i * 100 / {count}))
  printf '{{"type":"progress","data":{{"pct":%s,"stage":"computing"}}}}\n' "$pct"
  echo "step $i: $1"
  sleep 1
  i=$((i + 1))
done
echo "done"
"#
            );
            Ok(vec![
                "sh".to_string(),
                "-c".to_string(),
                script,
                "demo_loop".to_string(),
                message.to_string(),
            ])
        }),
    )
    .with_description("Counts to N, one step per second, reporting progress")
    .with_tags(&["demo"])
    .with_concurrency_limit(2)
}

/// Run an arbitrary shell command line.
fn shell_command() -> TaskSpec {
    let schema = json!({
        "type": "object",
        "properties": {
            "command": {"type": "string", "description": "command line passed to sh -c"}
        },
        "required": ["command"]
    });
    TaskSpec::new(
        "shell",
        "Shell command",
        "1.0.0",
        schema,
        Arc::new(|params: &Value| {
            let command = params
                .get("command")
                .and_then(Value::as_str)
                .ok_or_else(|| "command must be a string".to_string())?;
            Ok(vec![
                "sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ])
        }),
    )
    .with_description("Runs a caller-supplied command line under sh -c")
    .with_tags(&["shell"])
    .with_timeout_seconds(3600)
}

/// Generates a small CSV + HTML report pair and publishes both as artifacts.
fn report_showcase() -> TaskSpec {
    let schema = json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "data_points": {"type": "integer"}
        },
        "required": []
    });
    TaskSpec::new(
        "report_showcase",
        "Report showcase",
        "1.0.0",
        schema,
        Arc::new(|params: &Value| {
            let points = params
                .get("data_points")
                .and_then(Value::as_i64)
                .unwrap_or(100);
            if !(1..=100_000).contains(&points) {
                return Err(format!(
                    "data_points must be between 1 and 100000, got {points}"
                ));
            }
            let script = format!(
                r#"title="$1"
mkdir -p files
echo "index,value" > files/data.csv
i=0
while [ "$i" -lt {points} ]; do
  echo "$i,$((i * 3 % 97))" >> files/data.csv
  i=$((i + 1))
done
printf '{{"type":"progress","data":{{"pct":50,"stage":"csv written"}}}}\n'
{{
  echo "<!DOCTYPE html><html><head><title>$title</title></head><body>"
  echo "<h1>$title</h1><p>Rows: {points}</p>"
  echo "</body></html>"
}} > files/report.html
printf '{{"type":"artifact","data":{{"title":"Raw data","kind":"table","mime":"text/csv","path":"files/data.csv","file_id":"f_data_csv"}}}}\n'
printf '{{"type":"artifact","data":{{"title":"Report","kind":"html","mime":"text/html","path":"files/report.html","file_id":"f_report_html"}}}}\n'
printf '{{"type":"progress","data":{{"pct":100,"stage":"done"}}}}\n'
"#
            );
            let title = params
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("My Analysis");
            Ok(vec![
                "sh".to_string(),
                "-c".to_string(),
                script,
                "report_showcase".to_string(),
                title.to_string(),
            ])
        }),
    )
    .with_description("Produces a CSV and an HTML report, registered as artifacts")
    .with_tags(&["demo", "report"])
    .with_concurrency_limit(1)
}
