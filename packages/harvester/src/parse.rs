//! Parsing of the portal's question markup.
//!
//! The alternatives block is a mixed-markup region with one element per
//! labeled alternative. The official answer and the student's pick are
//! signalled only by inline visual cues: a green style (or check glyph) on
//! the correct alternative and a red style (or cross glyph) on a wrongly
//! picked one. Reading the student's pick from those cues is a best-effort
//! heuristic; a blank submission carries no wrong cue and is reported as if
//! the student had picked the official answer.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};

use crate::error::{HarvestError, HarvestResult};
use crate::site::RawQuestion;
use crate::types::{Alternative, Question, QuestionMeta};

/// Inline style fragments the portal uses for the official answer.
const CORRECT_STYLE_CUES: &[&str] = &["#1e7e34", "color: green", "color:green"];
/// Inline style fragments marking a wrongly picked alternative.
const WRONG_STYLE_CUES: &[&str] = &["#dc3545", "color: red", "color:red"];

const CORRECT_GLYPH: char = '✔';
const WRONG_GLYPH: char = '✘';

/// Boilerplate prefix the portal prepends to every commentary block.
const COMMENTARY_BOILERPLATE: &str = "Answer key commentary:";

static ALTERNATIVE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-E])\s*[\)\.\-]\s*").unwrap());

// Metadata markers, in the order they appear in the trailing text.
static WEEK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bweek\s*:?\s*(\d+)").unwrap());
static DIFFICULTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdifficulty\s*:?\s*([A-Za-z]+)").unwrap());
static OBJECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\blearning\s+objective\s*:?\s*([^\n]+)").unwrap());

/// The alternatives region after structure has been recovered from markup.
#[derive(Debug, Clone, Default)]
pub struct ParsedAlternatives {
    pub alternatives: Vec<Alternative>,
    pub correct_letter: Option<char>,
    pub selected_letter: Option<char>,
    /// Free text that followed the last alternative (metadata lives here).
    pub trailing: String,
}

/// Assemble a [`Question`] from one captured raw page region.
pub fn parse_question(raw: &RawQuestion) -> HarvestResult<Question> {
    let parsed = parse_alternatives(&raw.alternatives_html);
    if parsed.alternatives.is_empty() {
        return Err(HarvestError::step(
            "question",
            "no labeled alternatives found in markup",
        ));
    }
    let meta = parse_metadata(&parsed.trailing);
    let commentary = raw
        .commentary
        .as_deref()
        .map(strip_commentary_boilerplate)
        .filter(|c| !c.is_empty());

    Ok(Question {
        subject: raw.subject.trim().to_string(),
        statement: raw.statement.trim().to_string(),
        alternatives: parsed.alternatives,
        correct_letter: parsed.correct_letter,
        selected_letter: parsed.selected_letter,
        commentary,
        meta,
        image_urls: raw.image_urls.clone(),
    })
}

/// Recover the labeled alternatives and the answer cues from mixed markup.
pub fn parse_alternatives(html: &str) -> ParsedAlternatives {
    let fragment = Html::parse_fragment(html);
    let mut alternatives: Vec<Alternative> = Vec::new();
    let mut correct = None;
    let mut wrong = None;

    for node in fragment.root_element().children() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let text = el.text().collect::<String>();
        let Some(caps) = ALTERNATIVE_LABEL.captures(&text) else {
            continue;
        };
        let letter = caps[1].chars().next().unwrap_or('?');
        let content = ALTERNATIVE_LABEL.replace(&text, "").trim().to_string();

        let is_correct = has_style_cue(el, CORRECT_STYLE_CUES) || text.contains(CORRECT_GLYPH);
        let is_wrong_pick = has_style_cue(el, WRONG_STYLE_CUES) || text.contains(WRONG_GLYPH);
        if is_correct {
            correct = Some(letter);
        }
        if is_wrong_pick {
            wrong = Some(letter);
        }

        alternatives.push(Alternative {
            letter,
            content,
            is_correct,
        });
    }

    // Metadata bleeds into the last alternative's text; cut it off there.
    let mut trailing = String::new();
    if let Some(last) = alternatives.last_mut() {
        if let Some(pos) = first_marker_position(&last.content) {
            trailing = last.content[pos..].to_string();
            last.content.truncate(pos);
            let trimmed = last.content.trim_end().len();
            last.content.truncate(trimmed);
        }
    }

    // With no wrong cue present the pick defaults to the official answer.
    let selected_letter = wrong.or(correct);

    ParsedAlternatives {
        alternatives,
        correct_letter: correct,
        selected_letter,
        trailing,
    }
}

/// Ordered pattern extraction over the trailing free text.
pub fn parse_metadata(trailing: &str) -> QuestionMeta {
    QuestionMeta {
        week: WEEK
            .captures(trailing)
            .and_then(|c| c[1].parse().ok()),
        difficulty: DIFFICULTY
            .captures(trailing)
            .map(|c| c[1].to_string()),
        learning_objective: OBJECTIVE
            .captures(trailing)
            .map(|c| c[1].trim().to_string()),
    }
}

fn strip_commentary_boilerplate(commentary: &str) -> String {
    let trimmed = commentary.trim();
    trimmed
        .strip_prefix(COMMENTARY_BOILERPLATE)
        .map(str::trim)
        .unwrap_or(trimmed)
        .to_string()
}

/// Byte offset of the earliest metadata marker in `text`, if any.
fn first_marker_position(text: &str) -> Option<usize> {
    [&*WEEK, &*DIFFICULTY, &*OBJECTIVE]
        .iter()
        .filter_map(|marker| marker.find(text).map(|m| m.start()))
        .min()
}

/// Whether the element or any descendant carries one of the style cues.
fn has_style_cue(el: ElementRef<'_>, cues: &[&str]) -> bool {
    std::iter::once(el.value().attr("style"))
        .chain(
            el.descendants()
                .filter_map(ElementRef::wrap)
                .map(|child| child.value().attr("style")),
        )
        .flatten()
        .any(|style| cues.iter().any(|cue| style.contains(cue)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUED_BLOCK: &str = r#"
        <p>A) The mitochondria stores the cell's genetic material.</p>
        <p>B) Ribosomes are the site of lipid synthesis.</p>
        <p style="color: red">C) The nucleus produces most of the cell's ATP.</p>
        <p style="color: green">D) Ribosomes are the site of protein synthesis.</p>
    "#;

    #[test]
    fn reads_correct_and_selected_letters_from_cues() {
        let parsed = parse_alternatives(CUED_BLOCK);
        assert_eq!(parsed.correct_letter, Some('D'));
        assert_eq!(parsed.selected_letter, Some('C'));

        let d = parsed.alternatives.iter().find(|a| a.letter == 'D').unwrap();
        assert!(d.is_correct);
        let c = parsed.alternatives.iter().find(|a| a.letter == 'C').unwrap();
        assert!(!c.is_correct);
    }

    #[test]
    fn selected_defaults_to_correct_without_a_wrong_cue() {
        let block = r#"
            <p>A) First option.</p>
            <p style="color: green">B) Second option.</p>
        "#;
        let parsed = parse_alternatives(block);
        assert_eq!(parsed.correct_letter, Some('B'));
        assert_eq!(parsed.selected_letter, Some('B'));
    }

    #[test]
    fn glyph_cues_work_like_style_cues() {
        let block = r#"
            <p>A) First option ✘</p>
            <p>B) Second option ✔</p>
        "#;
        let parsed = parse_alternatives(block);
        assert_eq!(parsed.correct_letter, Some('B'));
        assert_eq!(parsed.selected_letter, Some('A'));
    }

    #[test]
    fn nested_style_cues_are_seen() {
        let block = r#"<p>A) Wrong.</p><p><span style="color: #1e7e34">B) Right.</span></p>"#;
        let parsed = parse_alternatives(block);
        assert_eq!(parsed.correct_letter, Some('B'));
    }

    #[test]
    fn accepts_dot_and_dash_labels() {
        let block = "<p>A. First</p><p>B- Second</p>";
        let parsed = parse_alternatives(block);
        let letters: Vec<char> = parsed.alternatives.iter().map(|a| a.letter).collect();
        assert_eq!(letters, vec!['A', 'B']);
        assert_eq!(parsed.alternatives[0].content, "First");
    }

    #[test]
    fn unlabeled_elements_are_ignored() {
        let block = "<h4>Pick one:</h4><p>A) Only real option</p>";
        let parsed = parse_alternatives(block);
        assert_eq!(parsed.alternatives.len(), 1);
    }

    #[test]
    fn metadata_is_cut_from_the_last_alternative() {
        let block = r#"
            <p>A) Femur</p>
            <p>B) Tibia Week 3 Difficulty: Easy Learning objective: Identify long bones</p>
        "#;
        let parsed = parse_alternatives(block);
        assert_eq!(parsed.alternatives[1].content, "Tibia");

        let meta = parse_metadata(&parsed.trailing);
        assert_eq!(meta.week, Some(3));
        assert_eq!(meta.difficulty.as_deref(), Some("Easy"));
        assert_eq!(meta.learning_objective.as_deref(), Some("Identify long bones"));
    }

    #[test]
    fn metadata_fields_are_optional() {
        let meta = parse_metadata("Difficulty: Hard");
        assert_eq!(meta.week, None);
        assert_eq!(meta.difficulty.as_deref(), Some("Hard"));
        assert_eq!(meta.learning_objective, None);
    }

    #[test]
    fn commentary_boilerplate_is_stripped() {
        let raw = RawQuestion {
            subject: "Biology".into(),
            statement: "Which organelle synthesizes proteins?".into(),
            alternatives_html: CUED_BLOCK.into(),
            commentary: Some("Answer key commentary: Ribosomes do.".into()),
            image_urls: vec![],
        };
        let question = parse_question(&raw).unwrap();
        assert_eq!(question.commentary.as_deref(), Some("Ribosomes do."));
    }

    #[test]
    fn empty_alternatives_region_is_a_step_error() {
        let raw = RawQuestion {
            alternatives_html: "<p>no labels here</p>".into(),
            ..Default::default()
        };
        assert!(matches!(
            parse_question(&raw),
            Err(HarvestError::Step { step: "question", .. })
        ));
    }
}
