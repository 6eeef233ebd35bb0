use std::io::{self, Write};

use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::pipeline::{Answer, Pipeline, PipelineError};

/// Ask business questions in plain language and get rows back from the analytics engine.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version)]
pub struct Args {
    /// Question to answer. Without one, questions are read from stdin, one per line.
    pub question: Option<String>,

    /// Rebuild the metadata index before answering.
    #[arg(long)]
    pub reload: bool,

    /// Print the generated query alongside the rows.
    #[arg(long)]
    pub show_query: bool,
}

pub fn render_answer(answer: &Answer, show_query: bool) -> Result<String, serde_json::Error> {
    let mut out = format!("Selected data model: {}\n", answer.table_name);
    if show_query {
        out.push_str("Query:\n");
        out.push_str(&serde_json::to_string_pretty(&answer.query)?);
        out.push('\n');
    }
    if answer.result.is_empty() {
        out.push_str("No rows returned\n");
    } else {
        out.push_str(&serde_json::to_string_pretty(&answer.result.rows)?);
        out.push('\n');
    }
    Ok(out)
}

fn print_answer(answer: &Answer, show_query: bool) {
    match render_answer(answer, show_query) {
        Ok(text) => print!("{text}"),
        Err(e) => error!("Failed to render answer: {}", e),
    }
}

/// Runs one question, or a stdin loop where each line is an independent attempt.
pub async fn run(pipeline: &Pipeline, args: &Args) -> Result<(), PipelineError> {
    if args.reload {
        let columns = pipeline.reload_metadata().await?;
        info!("Reloaded metadata index with {} columns", columns);
    }

    if let Some(question) = &args.question {
        let answer = pipeline.ask(question).await?;
        print_answer(&answer, args.show_query);
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read question: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match pipeline.ask(&line).await {
            Ok(answer) => print_answer(&answer, args.show_query),
            Err(e) => error!("{} failed: {}", e.stage(), e),
        }
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    // A failed flush only delays the prompt.
    let _ = io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic_layer::AnalyticsResult;
    use serde_json::json;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["local", "--reload", "--show-query", "How many orders?"]);
        assert_eq!(args.question.as_deref(), Some("How many orders?"));
        assert!(args.reload);
        assert!(args.show_query);

        let args = Args::parse_from(["local"]);
        assert_eq!(args.question, None);
        assert!(!args.reload);
    }

    fn answer(rows: serde_json::Value) -> Answer {
        Answer {
            table_name: "Orders".to_string(),
            query: serde_json::from_value(json!({"measures": ["Orders.count"], "limit": 10}))
                .unwrap(),
            result: AnalyticsResult {
                rows: serde_json::from_value(rows).unwrap(),
            },
        }
    }

    #[test]
    fn test_render_answer_with_query() {
        let text = render_answer(&answer(json!([{"Orders.count": "4"}])), true).unwrap();
        assert!(text.starts_with("Selected data model: Orders\nQuery:\n"));
        assert!(text.contains("\"limit\": 10"));
        assert!(text.contains("\"Orders.count\": \"4\""));
    }

    #[test]
    fn test_render_answer_without_rows() {
        let text = render_answer(&answer(json!([])), false).unwrap();
        assert_eq!(text, "Selected data model: Orders\nNo rows returned\n");
    }
}
