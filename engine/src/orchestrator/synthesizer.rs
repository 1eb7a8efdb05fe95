//! Final answer synthesis

use sdk::errors::EngineError;
use serde::Deserialize;
use tracing::{debug, warn};

use super::context::ExecutionContext;
use super::parse::parse_object;
use super::planning::consult;
use super::planner::Planner;

pub const NOTHING_EXECUTED: &str = "No commands were executed, so there is nothing to answer from.";
pub const SYNTHESIS_FAILED: &str = "Could not synthesize an answer from the collected data.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerReply {
    direct_answer: String,
}

pub fn synthesis_prompt(ctx: &ExecutionContext) -> String {
    format!(
        "Question: {question}\n\n\
         Extracted data:\n{data}\n\n\
         Answer the question directly and literally using only the extracted data. \
         Give numbers where the data has them.\n\
         Reply with JSON only: {{\"directAnswer\": \"...\"}}",
        question = ctx.prompt_question,
        data = ctx.working_memory.data_to_prompt_json(),
    )
}

/// Produce the final answer from `data_extracted`
///
/// # Errors
///
/// Only [`EngineError::Cancelled`]; any other failure yields a fixed message.
pub async fn synthesize_direct_answer(
    planner: &dyn Planner,
    ctx: &mut ExecutionContext,
) -> Result<String, EngineError> {
    if ctx.results.is_empty() {
        return Ok(NOTHING_EXECUTED.to_string());
    }

    let prompt = synthesis_prompt(ctx);
    let reply = match consult(planner, ctx, &prompt).await {
        Ok(reply) => reply,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            warn!("Synthesis call failed: {}", e);
            return Ok(SYNTHESIS_FAILED.to_string());
        }
    };

    match parse_object::<AnswerReply>(&reply, "directAnswer") {
        Some(answer) if !answer.direct_answer.trim().is_empty() => {
            Ok(answer.direct_answer.trim().to_string())
        }
        _ => {
            debug!("Synthesis reply unusable");
            Ok(SYNTHESIS_FAILED.to_string())
        }
    }
}
