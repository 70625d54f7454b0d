//! Prompts for the remote extraction and judgment collaborator

/// Triple extraction prompt
///
/// Placeholder: {text} - the interaction text to analyze
pub const EXTRACTION_PROMPT: &str = r#"Extract durable facts from the following interaction as subject-predicate-object triples.

Include:
- Facts about the user (preferences, background, goals, relationships)
- Decisions or conclusions that were reached
- Stable facts about projects, tools, or people that were discussed

Do NOT include:
- Greetings or small talk
- Questions that were asked but not answered
- Temporary or speculative statements

For each triple give a confidence from 0.0 to 1.0 reflecting how clearly the
interaction states it.

Interaction:
{text}

Respond with a JSON array in this exact format:
[
  {"subject": "user", "predicate": "prefers", "object": "dark mode", "confidence": 0.9}
]

Respond with [] if there is nothing worth keeping. Only include the JSON array, no other text."#;

/// Judgment prompt
///
/// Placeholders: {criteria} - comma-separated criterion names,
/// {text} - the text to judge
pub const JUDGMENT_PROMPT: &str = r#"Score the following text against each criterion with a number from 0.0 (not at all) to 1.0 (completely).

Criteria: {criteria}

Criterion meanings:
- answered: the new information answers the question
- plausibility: the statement is likely to be true and worth remembering
- confidence: how certain you are of your other scores

Text:
{text}

Respond with a single JSON object mapping each criterion to its score, for example:
{"answered": 0.8}

Only include the JSON object, no other text."#;

/// Build the extraction prompt for `text`
pub fn extraction_prompt(text: &str) -> String {
    EXTRACTION_PROMPT.replace("{text}", text)
}

/// Build the judgment prompt for `text` and `criteria`
pub fn judgment_prompt(text: &str, criteria: &[&str]) -> String {
    JUDGMENT_PROMPT
        .replace("{criteria}", &criteria.join(", "))
        .replace("{text}", text)
}
