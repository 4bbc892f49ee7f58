//! SSML Emitter (C14, spec §4.14).
//!
//! No in-repo precedent — the teacher never emits markup, only plain
//! strings to a provider. Grounded on the same fixed-table approach as
//! `emotion.rs`/`emotion_tts.rs`: one small `match` per platform maps an
//! annotated element's emphasis/pause numbers onto that platform's SSML
//! dialect (spec §4.14: "platform differences... are encapsulated here").

use crate::document::emotion::AnnotatedElement;
use crate::document::semantic::SemanticElement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsmlPlatform {
    Azure,
    Google,
    Amazon,
    Generic,
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Plain concatenated text with no markup (spec §4.14 "emits either plain
/// concatenated text... or platform-specific SSML").
pub fn emit_plain(elements: &[AnnotatedElement]) -> String {
    elements
        .iter()
        .map(|a| a.element.text_content())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Coarse emphasis bucket shared by every platform's `<emphasis>`-shaped tag.
fn emphasis_level(emphasis: f32) -> &'static str {
    match emphasis {
        e if e <= 0.0 => "reduced",
        e if e < 0.4 => "none",
        e if e < 0.7 => "moderate",
        _ => "strong",
    }
}

fn break_tag(ms: u32) -> String {
    if ms == 0 {
        String::new()
    } else {
        format!("<break time=\"{ms}ms\"/>")
    }
}

fn say_as_wrap(interpret_as: &str, body: String) -> String {
    format!("<say-as interpret-as=\"{interpret_as}\">{body}</say-as>")
}

/// Render one annotated element's inner markup for `platform` (spec §4.14:
/// prosody rate/pitch, emphasis, break, say-as per element).
fn render_element(annotated: &AnnotatedElement, platform: SsmlPlatform) -> String {
    if matches!(annotated.element, SemanticElement::Break) {
        return format!("{}{}", break_tag(annotated.pause_before_ms), break_tag(annotated.pause_after_ms));
    }
    let text = xml_escape(annotated.element.text_content());
    if text.is_empty() {
        return String::new();
    }

    let body = match &annotated.element {
        SemanticElement::CodeBlock(_) | SemanticElement::Code(_) => say_as_wrap("characters", text),
        _ => text,
    };

    let emphasised = match platform {
        // Azure's dedicated styling namespace (spec §4.14).
        SsmlPlatform::Azure => {
            format!("<mstts:express-as style=\"{}\">{}</mstts:express-as>", azure_style(annotated), body)
        }
        // Google lacks a first-class <emphasis> in its voices' common path;
        // approximate via <prosody> volume/rate the way Google's own docs
        // recommend (spec §4.14).
        SsmlPlatform::Google => {
            let rate = google_rate(annotated.emphasis);
            format!("<prosody rate=\"{rate}\">{body}</prosody>")
        }
        SsmlPlatform::Amazon | SsmlPlatform::Generic => {
            format!("<emphasis level=\"{}\">{}</emphasis>", emphasis_level(annotated.emphasis), body)
        }
    };

    let mut out = String::new();
    out.push_str(&break_tag(annotated.pause_before_ms));
    out.push_str(&emphasised);
    out.push_str(&break_tag(annotated.pause_after_ms));
    out
}

fn azure_style(annotated: &AnnotatedElement) -> &'static str {
    use crate::document::emotion::EmotionProfile;
    match (annotated.profile, annotated.emphasis) {
        (_, e) if e <= 0.0 => "narration-professional",
        (EmotionProfile::Marketing, _) => "excited",
        (EmotionProfile::Narrative, _) => "narration-relaxed",
        (EmotionProfile::Tutorial, _) => "friendly",
        (EmotionProfile::Technical, _) | (EmotionProfile::Auto, _) => "narration-professional",
    }
}

fn google_rate(emphasis: f32) -> &'static str {
    match emphasis {
        e if e <= 0.0 => "slow",
        e if e < 0.7 => "medium",
        _ => "fast",
    }
}

/// Emit a single well-formed `<speak>` document for `platform` (spec
/// §4.14). Invariant: the concatenation of element text contents, in
/// order, equals the `<speak>`-stripped text content of this output up to
/// whitespace normalisation (spec §8 property 3).
pub fn emit_ssml(elements: &[AnnotatedElement], platform: SsmlPlatform) -> String {
    // Joined with a space between fragments so the stripped text content
    // matches `emit_plain`'s word-boundary-preserving join (spec invariant).
    let body = elements
        .iter()
        .map(|a| render_element(a, platform))
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    match platform {
        SsmlPlatform::Azure => format!(
            "<speak version=\"1.0\" xml:lang=\"en-US\" xmlns:mstts=\"https://www.w3.org/2001/mstts\">{body}</speak>"
        ),
        _ => format!("<speak version=\"1.0\" xml:lang=\"en-US\">{body}</speak>"),
    }
}

/// Strip SSML markup down to its text content, for the round-trip
/// invariant (spec §8 property 3). Not part of the production emitter
/// contract; used by callers (tests, and the orchestrator's optional
/// self-check) that need to verify the invariant holds.
pub fn strip_to_text(ssml: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in ssml.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&").replace("&lt;", "<").replace("&gt;", ">").replace("&quot;", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::emotion::{classify, EmotionProfile};
    use crate::document::semantic::parse_markdown;

    fn normalise_whitespace(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn plain_emission_has_no_markup() {
        let elements = classify(parse_markdown("Hello **world**"), EmotionProfile::Narrative);
        let plain = emit_plain(&elements);
        assert!(!plain.contains('<'));
        assert!(plain.contains("Hello"));
        assert!(plain.contains("world"));
    }

    #[test]
    fn ssml_is_one_well_formed_speak_root() {
        let elements = classify(parse_markdown("# Intro\n\nHello **world**"), EmotionProfile::Technical);
        let ssml = emit_ssml(&elements, SsmlPlatform::Azure);
        assert!(ssml.starts_with("<speak"));
        assert!(ssml.trim_end().ends_with("</speak>"));
        assert_eq!(ssml.matches("<speak").count(), 1);
        assert!(ssml.contains("mstts:express-as"));
    }

    #[test]
    fn round_trip_text_content_matches_up_to_whitespace() {
        let elements = classify(parse_markdown("# Intro\n\nHello **world**"), EmotionProfile::Technical);
        let expected: String = elements.iter().map(|a| a.element.text_content()).collect::<Vec<_>>().join(" ");
        for platform in [SsmlPlatform::Azure, SsmlPlatform::Google, SsmlPlatform::Amazon, SsmlPlatform::Generic] {
            let ssml = emit_ssml(&elements, platform);
            let stripped = strip_to_text(&ssml);
            assert_eq!(normalise_whitespace(&stripped), normalise_whitespace(&expected), "platform {platform:?}");
        }
    }

    #[test]
    fn code_blocks_render_as_say_as_characters() {
        let elements = classify(parse_markdown("```\nlet x = 1;\n```"), EmotionProfile::Technical);
        let ssml = emit_ssml(&elements, SsmlPlatform::Generic);
        assert!(ssml.contains("say-as interpret-as=\"characters\""));
    }
}
