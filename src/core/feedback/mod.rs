//! Post-call scorecard evaluation.
//!
//! One non-streaming LLM call judges the transcript against nine criteria
//! split over five categories; each criterion passes only when the
//! transcript clearly demonstrates the behavior. An unparseable model
//! response degrades to an all-false scorecard rather than failing the
//! request.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::llm::{BasetenChat, ChatMessage, LlmError, Persona, Role};

/// Request body for `POST /api/feedback`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub transcript: Vec<ChatMessage>,
    pub persona: Persona,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Score {
    pub correct: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Criterion {
    pub name: String,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub name: String,
    pub score: Score,
    pub criteria: Vec<Criterion>,
}

/// Response body for `POST /api/feedback`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scorecard {
    pub overall_score: Score,
    pub categories: Vec<Category>,
    pub summary: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

/// Shape the model is asked to return.
#[derive(Debug, Default, Deserialize)]
struct Evaluation {
    #[serde(default)]
    criteria: CriteriaFlags,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CriteriaFlags {
    #[serde(default)]
    permission_opener: bool,
    #[serde(default)]
    used_research: bool,
    #[serde(default)]
    provided_proof: bool,
    #[serde(default)]
    checked_relevance: bool,
    #[serde(default)]
    asked_preconceptions: bool,
    #[serde(default)]
    next_steps: bool,
    #[serde(default)]
    meeting_booked: bool,
    #[serde(default)]
    confirmed_time: bool,
    #[serde(default)]
    success_criteria: bool,
}

const FEEDBACK_PROMPT: &str = r#"You are a sales coach evaluating a cold call transcript. Be strict but fair.

PERSONA CONTEXT:
{persona_context}

TRANSCRIPT:
{transcript}

Evaluate against these 9 criteria. For each, return true ONLY if clearly demonstrated:

OPENER (2 criteria):
1. permission_opener: Asked for permission or time before pitching
2. used_research: Referenced specific info about prospect/company

SOCIAL_PROOF (2 criteria):
3. provided_proof: Gave concrete example/case study/metric
4. checked_relevance: Asked if the proof resonated or was relevant

DISCOVERY (1 criterion):
5. asked_preconceptions: Asked what prospect already knows/thinks about the space

CLOSING (2 criteria):
6. next_steps: Proposed clear next action
7. meeting_booked: Got commitment for follow-up

TAKEAWAY (2 criteria):
8. confirmed_time: Re-confirmed availability/timing works
9. success_criteria: Asked what would make next call successful

Also provide:
- summary: One short phrase (max 5 words) capturing main advice
- strengths: Array of 1-2 short strength tags (max 3 words each)
- improvements: Array of 1-2 short improvement tags (max 3 words each)

Return ONLY valid JSON:
{
  "criteria": {
    "permission_opener": bool,
    "used_research": bool,
    "provided_proof": bool,
    "checked_relevance": bool,
    "asked_preconceptions": bool,
    "next_steps": bool,
    "meeting_booked": bool,
    "confirmed_time": bool,
    "success_criteria": bool
  },
  "summary": "string",
  "strengths": ["string"],
  "improvements": ["string"]
}"#;

/// Evaluate a finished call and assemble the scorecard.
pub async fn evaluate_call(
    llm: &BasetenChat,
    transcript: &[ChatMessage],
    persona: Persona,
) -> Result<Scorecard, LlmError> {
    let prompt = FEEDBACK_PROMPT
        .replace("{persona_context}", persona.feedback_context())
        .replace("{transcript}", &format_transcript(transcript));

    let content = llm.complete(&prompt).await?;
    let evaluation = match serde_json::from_str::<Evaluation>(extract_json(&content)) {
        Ok(evaluation) => evaluation,
        Err(e) => {
            warn!("unparseable feedback evaluation: {e}");
            Evaluation {
                summary: Some("Analysis failed".to_string()),
                ..Default::default()
            }
        }
    };
    Ok(build_scorecard(evaluation))
}

/// Render the conversation the way the coach prompt expects: the caller
/// practicing is the sales rep, the agent is the prospect.
fn format_transcript(messages: &[ChatMessage]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for message in messages {
        let speaker = match message.role {
            Role::User => "Sales Rep",
            Role::Assistant => "Prospect",
        };
        lines.push(format!("{speaker}: {}", message.content));
    }
    lines.join("\n")
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    for fence in ["```json", "```"] {
        if let Some(rest) = trimmed.strip_prefix(fence)
            && let Some(end) = rest.find("```")
        {
            return rest[..end].trim();
        }
    }
    trimmed
}

fn build_scorecard(evaluation: Evaluation) -> Scorecard {
    let flags = evaluation.criteria;
    let categories = vec![
        category(
            "Opener",
            vec![
                ("Permission based opener?", flags.permission_opener),
                ("Used research on prospect?", flags.used_research),
            ],
        ),
        category(
            "Social Proof",
            vec![
                ("Provided social proof?", flags.provided_proof),
                ("Asked if social proof was relevant?", flags.checked_relevance),
            ],
        ),
        category(
            "Discovery",
            vec![("SDR asked for preconceptions?", flags.asked_preconceptions)],
        ),
        category(
            "Closing",
            vec![
                ("Next steps agreed upon?", flags.next_steps),
                ("Follow-up meeting booked?", flags.meeting_booked),
            ],
        ),
        category(
            "Takeaway",
            vec![
                ("Re-confirmed time works?", flags.confirmed_time),
                ("Asked for success criteria?", flags.success_criteria),
            ],
        ),
    ];

    let correct = categories.iter().map(|c| c.score.correct).sum();
    let total = categories.iter().map(|c| c.score.total).sum();

    Scorecard {
        overall_score: Score { correct, total },
        categories,
        summary: evaluation
            .summary
            .unwrap_or_else(|| "Keep improving".to_string()),
        strengths: evaluation.strengths,
        improvements: evaluation.improvements,
    }
}

fn category(name: &str, criteria: Vec<(&str, bool)>) -> Category {
    let correct = criteria.iter().filter(|(_, passed)| *passed).count() as u32;
    let total = criteria.len() as u32;
    Category {
        name: name.to_string(),
        score: Score { correct, total },
        criteria: criteria
            .into_iter()
            .map(|(name, passed)| Criterion {
                name: name.to_string(),
                passed,
            })
            .collect(),
    }
}
