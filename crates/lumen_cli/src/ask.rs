use anyhow::Result;
use lumen_core::Query;
use lumen_reasoning::{EngineEvent, ReasoningEngine};
use std::io::{self, Write};
use std::sync::Arc;

pub async fn run_buffered(engine: &ReasoningEngine, query: &Query) -> Result<()> {
    let result = engine.process_query(query).await?;
    println!("\n{}\n", result.response);

    if let Some(evaluation) = &result.evaluation {
        let metrics = evaluation.metrics.unwrap_or_default();
        eprintln!(
            "[{} | grade {} | attempts {} | grounding {:.2} | {:.0} ms | ${:.5}]",
            result.outcome.as_str(),
            evaluation.overall_grade,
            result.attempts,
            metrics.grounding_score,
            metrics.latency_ms,
            metrics.estimated_cost
        );
    } else {
        eprintln!("[{}]", result.outcome.as_str());
    }
    Ok(())
}

pub async fn run_streaming(engine: &Arc<ReasoningEngine>, query: Query) -> Result<()> {
    let mut events = engine.process_query_stream(query);
    let mut stdout = io::stdout();

    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Security { assessment } => {
                eprintln!(
                    "· security: safe={} risk={:.2} ({})",
                    assessment.is_safe, assessment.risk_score, assessment.threat
                );
            }
            EngineEvent::Status { content } => eprintln!("· {}", content),
            EngineEvent::Plan { content } => {
                for step in &content.steps {
                    eprintln!("· step {}: {}", step.step_id, step.tool);
                }
            }
            EngineEvent::StepResult { content } => {
                let state = if content.output.is_error() {
                    "error"
                } else if content.output.is_empty() {
                    "empty"
                } else {
                    "ok"
                };
                eprintln!("· step {} {}: {}", content.step_id, content.tool, state);
            }
            EngineEvent::Token { content } => {
                print!("{}", content);
                stdout.flush()?;
            }
            EngineEvent::Evaluation {
                evaluation,
                metrics,
            } => {
                eprintln!(
                    "\n· judge: {} ({}) grounding {:.2} | {:.0} ms | ${:.5}",
                    evaluation.overall_grade,
                    evaluation.reasoning,
                    metrics.grounding_score,
                    metrics.latency_ms,
                    metrics.estimated_cost
                );
            }
            EngineEvent::Error { content } => {
                println!("\n{}", content);
            }
            EngineEvent::Complete => {
                println!();
            }
        }
    }
    Ok(())
}
