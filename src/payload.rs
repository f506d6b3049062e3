//! Instruction-payload compilation for the reasoning boundary.
//!
//! The payload is built as a structured document — an ordered list of typed
//! sections — and only serialized to text at the end, so the sizing and
//! truncation rules stay unit-testable independently of formatting. The
//! document always carries four sections in order: the objective, the
//! scoped attempt history, the candidate enumeration, and the output-format
//! instructions. The required item count appears in both the objective and
//! the output-format section; the reasoning boundary has no other hard
//! constraint enforcement.

use crate::models::{AttemptRecord, CandidateItem, GenerationRequest, ScopeFilter};

/// Candidate contents are cut to 60 characters once the list grows past
/// this many items, else 100. A token-budget control, not cosmetic.
const TRUNCATE_THRESHOLD: usize = 30;
const TRUNCATE_SHORT: usize = 60;
const TRUNCATE_LONG: usize = 100;

/// One section of the instruction document.
#[derive(Debug, Clone)]
pub enum Section {
    Objective {
        required_count: usize,
        mode: String,
    },
    History {
        attempts: Vec<AttemptRecord>,
    },
    Candidates {
        items: Vec<CandidateItem>,
        truncate_len: usize,
    },
    OutputFormat {
        required_count: usize,
    },
}

/// The compiled instruction document, ordered sections serialized to text
/// only by [`InstructionDocument::render`].
#[derive(Debug, Clone)]
pub struct InstructionDocument {
    sections: Vec<Section>,
}

/// Content truncation length for a candidate list of the given size.
pub fn truncation_len(candidate_count: usize) -> usize {
    if candidate_count > TRUNCATE_THRESHOLD {
        TRUNCATE_SHORT
    } else {
        TRUNCATE_LONG
    }
}

/// Cut a string to at most `max_chars` characters, on a char boundary.
/// The ellipsis counts against the budget so a truncated candidate line
/// never exceeds it.
fn truncate_content(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let mut cut: String = trimmed.chars().take(max_chars.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

/// Drop attempt records outside the resolved scope so the reasoning step
/// never sees irrelevant history. A record missing a value for a
/// constrained dimension is outside that scope.
pub fn filter_history(scope: &ScopeFilter, attempts: &[AttemptRecord]) -> Vec<AttemptRecord> {
    attempts
        .iter()
        .filter(|a| {
            in_dimension(&scope.subject_ids, a.subject_id)
                && in_dimension(&scope.grade_ids, a.grade_id)
                && in_dimension(&scope.chapter_ids, a.chapter_id)
                && in_dimension(&scope.lesson_ids, a.lesson_id)
        })
        .cloned()
        .collect()
}

fn in_dimension(scope_ids: &[i64], value: Option<i64>) -> bool {
    if scope_ids.is_empty() {
        return true;
    }
    match value {
        Some(id) => scope_ids.contains(&id),
        None => false,
    }
}

/// Compile the instruction document for one request.
///
/// `attempts` must already be filtered to the resolved scope via
/// [`filter_history`].
pub fn compile(
    request: &GenerationRequest,
    attempts: Vec<AttemptRecord>,
    candidates: Vec<CandidateItem>,
) -> InstructionDocument {
    let truncate_len = truncation_len(candidates.len());
    InstructionDocument {
        sections: vec![
            Section::Objective {
                required_count: request.desired_count,
                mode: request.mode.to_string(),
            },
            Section::History { attempts },
            Section::Candidates {
                items: candidates,
                truncate_len,
            },
            Section::OutputFormat {
                required_count: request.desired_count,
            },
        ],
    }
}

impl InstructionDocument {
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Serialize the ordered sections into the final text document.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            match section {
                Section::Objective {
                    required_count,
                    mode,
                } => {
                    out.push_str("OBJECTIVE\n");
                    out.push_str(&format!(
                        "Select exactly {} practice questions for a {} assessment, \
                         matched to the learner's recent performance below.\n",
                        required_count, mode
                    ));
                }
                Section::History { attempts } => {
                    out.push('\n');
                    if attempts.is_empty() {
                        out.push_str("RECENT PERFORMANCE\nNo attempts in scope.\n");
                    } else {
                        out.push_str(&format!(
                            "RECENT PERFORMANCE ({} attempts in scope)\n",
                            attempts.len()
                        ));
                        for attempt in attempts {
                            out.push_str(&render_attempt(attempt));
                            out.push('\n');
                        }
                    }
                }
                Section::Candidates {
                    items,
                    truncate_len,
                } => {
                    out.push('\n');
                    out.push_str(&format!("CANDIDATE QUESTIONS ({})\n", items.len()));
                    for item in items {
                        out.push_str(&format!(
                            "{} | {} | {}\n",
                            item.id,
                            truncate_content(&item.content, *truncate_len),
                            item.difficulty
                        ));
                    }
                }
                Section::OutputFormat { required_count } => {
                    out.push('\n');
                    out.push_str("OUTPUT FORMAT\n");
                    out.push_str(
                        "Respond with a single JSON object and nothing else: \
                         {\"selections\":[{\"id\":<question id>,\"rationale\":\"<why this question>\"}],\
                         \"analysis\":\"<overall analysis of the learner>\"}\n",
                    );
                    out.push_str(&format!(
                        "The selections array must contain exactly {} ids drawn from the candidate list above.\n",
                        required_count
                    ));
                }
            }
        }
        out
    }
}

fn render_attempt(attempt: &AttemptRecord) -> String {
    let accuracy = match attempt.accuracy() {
        Some(acc) => format!(
            "{:.0}% ({}/{})",
            acc,
            attempt.correct_count,
            attempt.correct_count + attempt.incorrect_count
        ),
        None => "n/a".to_string(),
    };

    let mut scope_labels = Vec::new();
    if let Some(subject) = attempt.subject_id {
        scope_labels.push(format!("subject {}", subject));
    }
    if let Some(grade) = attempt.grade_id {
        scope_labels.push(format!("grade {}", grade));
    }
    if let Some(chapter) = attempt.chapter_id {
        scope_labels.push(format!("chapter {}", chapter));
    }
    if let Some(lesson) = attempt.lesson_id {
        scope_labels.push(format!("lesson {}", lesson));
    }

    format!(
        "score {:.0}/100, accuracy {}, {}s, {}, {}",
        attempt.score,
        accuracy,
        attempt.time_taken_secs,
        attempt.completed_at.format("%Y-%m-%d"),
        scope_labels.join(" / ")
    )
}
