//! Client for the AI planning service (any OpenAI-compatible chat endpoint).
//! Optional; see [`PlannerConfig::from_env`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::TaskTemplate;
use crate::error::RegimenError;

const PLANNER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct PlannerConfig {
    pub url: String,
    pub key: String,
    pub model: String,
    pub client: reqwest::Client,
}

impl PlannerConfig {
    /// Returns `None` if `REGIMEN_PLANNER_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("REGIMEN_PLANNER_URL").ok()?;
        let key = std::env::var("REGIMEN_PLANNER_KEY").unwrap_or_default();
        let model = std::env::var("REGIMEN_PLANNER_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
        let client = reqwest::Client::builder().timeout(PLANNER_TIMEOUT).build().ok()?;
        Some(Self { url, key, model, client })
    }
}

/// One suggested activity for a concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub solution: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instruction: String,
    pub monthly_frequency: u32,
}

pub type Plan = BTreeMap<String, Vec<Solution>>;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    response_format: serde_json::Value,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

const PLAN_PROMPT: &str = "You plan self-improvement routines. For each concern you are given, \
    suggest 1-4 concrete, safe activities. Reply with a JSON object mapping each concern name to \
    an array of {\"solution\": short activity name, \"description\": one sentence, \
    \"instruction\": how to do it, \"monthly_frequency\": times per month (1-30)}. \
    Use only the concern names given. No commentary.";

/// Ask the planner for activities per concern.
pub async fn plan_routine(
    cfg: &PlannerConfig,
    part: &str,
    concerns: &[String],
) -> Result<Plan, RegimenError> {
    if concerns.is_empty() {
        return Err(RegimenError::Validation("at least one concern is required".into()));
    }
    let req = ChatRequest {
        model: &cfg.model,
        messages: vec![
            ChatMessage { role: "system", content: PLAN_PROMPT.into() },
            ChatMessage {
                role: "user",
                content: format!("part: {part}\nconcerns: {}", concerns.join(", ")),
            },
        ],
        temperature: 0.2,
        response_format: serde_json::json!({ "type": "json_object" }),
    };

    let mut builder = cfg.client.post(&cfg.url).json(&req);
    if !cfg.key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.key));
    }
    let start = std::time::Instant::now();
    let resp = builder
        .send()
        .await
        .map_err(|e| RegimenError::UpstreamTransport(format!("planner request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(RegimenError::Upstream(format!("planner returned {status}: {body}")));
    }
    let chat: ChatResponse = resp
        .json()
        .await
        .map_err(|e| RegimenError::Upstream(format!("planner response parse failed: {e}")))?;
    let content = chat
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .ok_or_else(|| RegimenError::Upstream("planner returned no content".into()))?;

    let plan = parse_plan(&content, concerns)?;
    debug!(
        model = %cfg.model,
        concerns = plan.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "planner answered"
    );
    Ok(plan)
}

/// Parse the planner's JSON (possibly fenced in a markdown block) and keep
/// only the concerns that were asked for.
pub fn parse_plan(raw: &str, concerns: &[String]) -> Result<Plan, RegimenError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    let mut plan: Plan = serde_json::from_str(body.trim())
        .map_err(|e| RegimenError::Upstream(format!("planner output is not a plan: {e}")))?;
    plan.retain(|concern, solutions| {
        solutions.retain(|s| !s.solution.trim().is_empty());
        concerns.contains(concern) && !solutions.is_empty()
    });
    if plan.is_empty() {
        return Err(RegimenError::Upstream("planner suggested nothing usable".into()));
    }
    Ok(plan)
}

/// Lowercase ascii words joined by `-`.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Occurrences per week for a monthly frequency, at least one.
pub fn weekly_total(monthly: u32) -> u32 {
    ((monthly as f64 * 7.0 / 30.0).round() as u32).max(1)
}

/// One template per distinct solution; the first concern to suggest a key
/// keeps it.
pub fn solutions_to_templates(plan: &Plan) -> Vec<TaskTemplate> {
    let mut out: Vec<TaskTemplate> = Vec::new();
    for (concern, solutions) in plan {
        for s in solutions {
            let key = slugify(&s.solution);
            if key.is_empty() || out.iter().any(|t| t.key == key) {
                continue;
            }
            out.push(TaskTemplate {
                key,
                name: s.solution.trim().to_string(),
                icon: String::new(),
                color: String::new(),
                concern: concern.clone(),
                description: s.description.clone(),
                instruction: s.instruction.clone(),
                total: weekly_total(s.monthly_frequency),
            });
        }
    }
    out
}
