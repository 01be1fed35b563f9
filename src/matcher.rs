//! Resolves names read off a sign-in sheet to roster identities.
//!
//! A candidate matches when every whitespace token of the extracted name
//! (case-folded) is a substring of the candidate's "first last" name. Only a
//! single candidate resolves; anything else is left for manual selection.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ExtractedItem, Student};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "students", rename_all = "snake_case")]
pub enum MatchOutcome {
    Resolved(Uuid),
    /// Several roster entries satisfied every token.
    Ambiguous(Vec<Uuid>),
    NoMatch,
}

impl MatchOutcome {
    pub fn student_id(&self) -> Option<Uuid> {
        match self {
            MatchOutcome::Resolved(id) => Some(*id),
            MatchOutcome::Ambiguous(_) | MatchOutcome::NoMatch => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, MatchOutcome::Resolved(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedItem {
    pub item: ExtractedItem,
    pub outcome: MatchOutcome,
}

fn name_tokens(name: &str) -> Vec<String> {
    name.split_whitespace()
        .map(|token| token.to_lowercase())
        .collect()
}

fn is_candidate(tokens: &[String], student: &Student) -> bool {
    let full_name = student.full_name().to_lowercase();
    tokens.iter().all(|token| full_name.contains(token.as_str()))
}

pub fn match_identity(extracted_name: &str, students: &[Student]) -> MatchOutcome {
    let tokens = name_tokens(extracted_name);
    if tokens.is_empty() {
        return MatchOutcome::NoMatch;
    }

    let candidates: Vec<Uuid> = students
        .iter()
        .filter(|student| is_candidate(&tokens, student))
        .map(|student| student.id)
        .collect();

    match candidates.as_slice() {
        [] => MatchOutcome::NoMatch,
        [single] => MatchOutcome::Resolved(*single),
        _ => {
            debug!(
                name = extracted_name,
                candidates = candidates.len(),
                "extracted name is ambiguous"
            );
            MatchOutcome::Ambiguous(candidates)
        }
    }
}

pub fn match_identities(items: Vec<ExtractedItem>, students: &[Student]) -> Vec<MatchedItem> {
    items
        .into_iter()
        .map(|item| {
            let outcome = match_identity(&item.student_name, students);
            MatchedItem { item, outcome }
        })
        .collect()
}
