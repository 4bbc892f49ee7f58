//! Emotion Classifier (C13, spec §4.13).
//!
//! Per-profile prosody tables grounded directly on the teacher's
//! `tts/emotion_tts.rs` `get_modifiers` (`match` on a fixed key set,
//! returning small numeric tuples) — generalised from the teacher's two
//! scalars (speed, pitch) tied to a runtime mood value, to the spec's three
//! scalars (emphasis, pause-before, pause-after) tied to a document-level,
//! deterministically-scored profile instead of a live mood input.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::document::semantic::SemanticElement;

/// A preset mapping from document class to prosody annotations (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmotionProfile {
    Auto,
    Technical,
    Marketing,
    Narrative,
    Tutorial,
}

/// Fixed tie-break order for scoring (spec §4.13: "ties resolved in the
/// fixed order above").
const SCORED_PROFILES: [EmotionProfile; 4] =
    [EmotionProfile::Technical, EmotionProfile::Marketing, EmotionProfile::Narrative, EmotionProfile::Tutorial];

/// Semantic element plus prosody annotation (spec §3 `Emotion-Annotated
/// Element`).
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedElement {
    pub element: SemanticElement,
    pub profile: EmotionProfile,
    pub emphasis: f32,
    pub pause_before_ms: u32,
    pub pause_after_ms: u32,
}

struct ProfileDefaults {
    base_emphasis: f32,
    heading_emphasis: f32,
    heading_pause_after_ms: u32,
    code_pause_ms: u32,
    list_pause_before_ms: u32,
    default_pause_ms: u32,
}

/// Small fixed table per profile (spec §4.13: "Numeric values are a small
/// fixed table per profile").
fn defaults_for(profile: EmotionProfile) -> ProfileDefaults {
    match profile {
        EmotionProfile::Auto => defaults_for(EmotionProfile::Narrative),
        EmotionProfile::Technical => ProfileDefaults {
            base_emphasis: 0.3,
            heading_emphasis: 0.6,
            heading_pause_after_ms: 500,
            code_pause_ms: 400,
            list_pause_before_ms: 150,
            default_pause_ms: 100,
        },
        EmotionProfile::Marketing => ProfileDefaults {
            base_emphasis: 0.6,
            heading_emphasis: 0.9,
            heading_pause_after_ms: 350,
            code_pause_ms: 300,
            list_pause_before_ms: 120,
            default_pause_ms: 80,
        },
        EmotionProfile::Narrative => ProfileDefaults {
            base_emphasis: 0.45,
            heading_emphasis: 0.7,
            heading_pause_after_ms: 600,
            code_pause_ms: 350,
            list_pause_before_ms: 180,
            default_pause_ms: 150,
        },
        EmotionProfile::Tutorial => ProfileDefaults {
            base_emphasis: 0.5,
            heading_emphasis: 0.75,
            heading_pause_after_ms: 450,
            code_pause_ms: 400,
            list_pause_before_ms: 250,
            default_pause_ms: 120,
        },
    }
}

const TECHNICAL_TERMS: [&str; 8] =
    ["function", "algorithm", "compile", "server", "database", "api", "protocol", "variable"];
const SUPERLATIVES: [&str; 7] = ["best", "amazing", "incredible", "revolutionary", "ultimate", "unbeatable", "guaranteed"];
const CTA_PHRASES: [&str; 5] = ["buy now", "sign up", "act now", "limited time", "click here"];
const IMPERATIVE_VERBS: [&str; 8] = ["click", "run", "install", "type", "open", "select", "enter", "navigate"];

fn quote_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["“”]"#).unwrap())
}

fn leading_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.)]").unwrap())
}

/// Tally signals per profile and return the score for each (spec §4.13).
fn score_document(elements: &[SemanticElement]) -> HashMap<EmotionProfile, u32> {
    let mut scores: HashMap<EmotionProfile, u32> = SCORED_PROFILES.iter().map(|p| (*p, 0)).collect();

    for element in elements {
        let text = element.text_content();
        let lower = text.to_ascii_lowercase();

        match element {
            SemanticElement::CodeBlock(_) => *scores.get_mut(&EmotionProfile::Technical).unwrap() += 3,
            SemanticElement::Code(_) => *scores.get_mut(&EmotionProfile::Technical).unwrap() += 1,
            SemanticElement::Heading { text, .. } if text.to_ascii_lowercase().contains("chapter") => {
                *scores.get_mut(&EmotionProfile::Narrative).unwrap() += 2;
            }
            SemanticElement::ListItem(t) => {
                if leading_number_regex().is_match(t) {
                    *scores.get_mut(&EmotionProfile::Tutorial).unwrap() += 2;
                }
            }
            _ => {}
        }

        for term in TECHNICAL_TERMS {
            if lower.contains(term) {
                *scores.get_mut(&EmotionProfile::Technical).unwrap() += 1;
            }
        }
        for term in SUPERLATIVES {
            if lower.contains(term) {
                *scores.get_mut(&EmotionProfile::Marketing).unwrap() += 1;
            }
        }
        for phrase in CTA_PHRASES {
            if lower.contains(phrase) {
                *scores.get_mut(&EmotionProfile::Marketing).unwrap() += 2;
            }
        }
        *scores.get_mut(&EmotionProfile::Marketing).unwrap() += text.matches('!').count() as u32;
        *scores.get_mut(&EmotionProfile::Narrative).unwrap() += quote_regex().find_iter(text).count() as u32 / 2;
        for word in lower.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.ends_with("ed") && word.len() > 3 {
                *scores.get_mut(&EmotionProfile::Narrative).unwrap() += 1;
            }
        }
        for verb in IMPERATIVE_VERBS {
            if lower.contains(verb) {
                *scores.get_mut(&EmotionProfile::Tutorial).unwrap() += 1;
            }
        }
        if lower.contains("step ") || lower.contains("step:") {
            *scores.get_mut(&EmotionProfile::Tutorial).unwrap() += 2;
        }
    }

    scores
}

/// Deterministic document-level classification (spec §4.13). Highest score
/// wins; ties resolved in `SCORED_PROFILES` order.
///
/// Deliberately not `Iterator::max_by_key`: on a tie it returns the *last*
/// equally-maximal element, the opposite of the fixed-order tie-break the
/// spec requires, so the winner is tracked by hand with a strict `>`.
fn resolve_auto_profile(elements: &[SemanticElement]) -> EmotionProfile {
    let scores = score_document(elements);
    let mut winner = SCORED_PROFILES[0];
    let mut winner_score = scores.get(&winner).copied().unwrap_or(0);
    for &profile in &SCORED_PROFILES[1..] {
        let score = scores.get(&profile).copied().unwrap_or(0);
        if score > winner_score {
            winner = profile;
            winner_score = score;
        }
    }
    winner
}

/// Annotate a semantic element sequence (spec §4.13). When `requested` is
/// `Auto`, scoring runs once over the whole document and every element
/// shares the resolved profile; otherwise scoring is skipped entirely.
pub fn classify(elements: Vec<SemanticElement>, requested: EmotionProfile) -> Vec<AnnotatedElement> {
    let resolved = match requested {
        EmotionProfile::Auto => resolve_auto_profile(&elements),
        explicit => explicit,
    };
    let defaults = defaults_for(resolved);

    elements
        .into_iter()
        .map(|element| annotate_one(element, resolved, &defaults))
        .collect()
}

fn annotate_one(element: SemanticElement, profile: EmotionProfile, d: &ProfileDefaults) -> AnnotatedElement {
    match &element {
        SemanticElement::Heading { .. } => AnnotatedElement {
            element,
            profile,
            emphasis: d.heading_emphasis,
            pause_before_ms: d.default_pause_ms,
            pause_after_ms: d.heading_pause_after_ms,
        },
        SemanticElement::CodeBlock(_) | SemanticElement::Code(_) => AnnotatedElement {
            element,
            profile,
            emphasis: 0.0,
            pause_before_ms: d.code_pause_ms,
            pause_after_ms: d.code_pause_ms,
        },
        SemanticElement::ListItem(_) => AnnotatedElement {
            element,
            profile,
            emphasis: d.base_emphasis,
            pause_before_ms: d.list_pause_before_ms,
            pause_after_ms: d.default_pause_ms,
        },
        SemanticElement::Bold(_) => AnnotatedElement {
            element,
            profile,
            emphasis: (d.base_emphasis + 0.2).min(1.0),
            pause_before_ms: 0,
            pause_after_ms: 0,
        },
        _ => AnnotatedElement {
            element,
            profile,
            emphasis: d.base_emphasis,
            pause_before_ms: d.default_pause_ms,
            pause_after_ms: d.default_pause_ms,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_profile_skips_scoring() {
        let elements = vec![SemanticElement::Paragraph("Hello".into())];
        let annotated = classify(elements, EmotionProfile::Marketing);
        assert!(annotated.iter().all(|a| a.profile == EmotionProfile::Marketing));
    }

    #[test]
    fn code_heavy_document_classifies_technical() {
        let elements = vec![
            SemanticElement::CodeBlock("fn main() {}".into()),
            SemanticElement::Paragraph("This algorithm compiles the server code via the API.".into()),
        ];
        let annotated = classify(elements, EmotionProfile::Auto);
        assert_eq!(annotated[0].profile, EmotionProfile::Technical);
    }

    #[test]
    fn exclamation_heavy_document_classifies_marketing() {
        let elements = vec![SemanticElement::Paragraph(
            "Buy now! The best, most amazing, most incredible deal ever! Act now!".into(),
        )];
        let annotated = classify(elements, EmotionProfile::Auto);
        assert_eq!(annotated[0].profile, EmotionProfile::Marketing);
    }

    #[test]
    fn code_blocks_get_zero_emphasis() {
        let elements = vec![SemanticElement::CodeBlock("x = 1".into())];
        let annotated = classify(elements, EmotionProfile::Technical);
        assert_eq!(annotated[0].emphasis, 0.0);
    }

    #[test]
    fn headings_get_longer_pause_after_than_default() {
        let elements = vec![
            SemanticElement::Heading { level: 1, text: "Intro".into() },
            SemanticElement::Paragraph("body text".into()),
        ];
        let annotated = classify(elements, EmotionProfile::Narrative);
        assert!(annotated[0].pause_after_ms > annotated[1].pause_after_ms);
    }

    #[test]
    fn tie_break_prefers_fixed_order() {
        // No signals at all for any profile: all scores are 0, tie broken
        // by `SCORED_PROFILES` order (technical first).
        let elements = vec![SemanticElement::Paragraph("plain unremarkable text".into())];
        assert_eq!(resolve_auto_profile(&elements), EmotionProfile::Technical);
    }
}
