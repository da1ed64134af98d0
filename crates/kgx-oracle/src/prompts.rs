//! Prompt templates per extraction kind

use kgx_core::ExtractionKind;

const TEXT_PLACEHOLDER: &str = "{text}";

/// Prompt template for an extraction kind
pub fn template(kind: ExtractionKind) -> &'static str {
    match kind {
        ExtractionKind::Celebrity => include_str!("prompts/celebrity.txt"),
        ExtractionKind::CelebrityRelation => include_str!("prompts/celebrity_relation.txt"),
        ExtractionKind::Work => include_str!("prompts/work.txt"),
        ExtractionKind::Event => include_str!("prompts/event.txt"),
        ExtractionKind::Triples => include_str!("prompts/triples.txt"),
    }
}

/// Render the prompt sent to the oracle
pub fn render(kind: ExtractionKind, text: &str) -> String {
    template(kind).replacen(TEXT_PLACEHOLDER, text, 1)
}

/// Shorten over-long input before prompting.
///
/// Text longer than `limit` characters is cut to `target` characters, backing
/// up to the last sentence end when one lies past 60% of `target`.
pub fn truncate_for_prompt(text: &str, limit: usize, target: usize) -> &str {
    if text.chars().count() <= limit {
        return text;
    }

    let cut = text
        .char_indices()
        .nth(target)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];

    let min_keep = target * 3 / 5;
    if let Some((pos, ch)) = head
        .char_indices()
        .rev()
        .find(|(_, c)| matches!(c, '。' | '！' | '？'))
    {
        if head[..pos].chars().count() > min_keep {
            return &head[..pos + ch.len_utf8()];
        }
    }

    head
}
