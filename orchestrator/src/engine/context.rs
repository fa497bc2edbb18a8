//! Context accumulator (§4.5): a token-budgeted prompt preamble built from
//! the state store alone, so a freshly spawned agent inherits prior-phase
//! decisions, outstanding blockers, and — if its phase was rejected — the
//! reviewer's reasons.
//!
//! Rendering is a pure function over [`ContextInput`]; [`accumulate`] is the
//! thin async wrapper that gathers that input from the state store.

use crate::domain::{Finding, FindingType, Phase, PhaseStatus, Task};
use crate::state::{StateManager, StateResult};

/// Everything [`render`] needs, already fetched and selected.
#[derive(Debug, Clone, Default)]
pub struct ContextInput {
    pub task_description: String,
    pub current_phase_name: String,
    pub current_phase_deliverables: Vec<String>,
    pub current_phase_criteria: Vec<String>,
    pub prior_phase_summaries: Vec<(i64, String)>,
    pub top_findings: Vec<Finding>,
    pub active_blockers: Vec<String>,
    pub project_context: Vec<String>,
    /// Non-empty only when the phase is REVISING; never truncated.
    pub rejection_findings: Vec<Finding>,
}

/// Render the Markdown preamble, dropping optional sections (in the order
/// blockers → project context → phase summaries → generic findings) until
/// the output fits `max_tokens * 4` chars. The task description, current
/// phase requirements, and rejection-findings block are never truncated.
pub fn render(input: &ContextInput, max_tokens: u32) -> String {
    let budget_chars = max_tokens as usize * 4;

    let mut required = String::new();
    required.push_str("## Task\n\n");
    required.push_str(&input.task_description);
    required.push_str("\n\n## Current phase\n\n");
    required.push_str(&format!("**{}**\n\n", input.current_phase_name));

    if !input.current_phase_deliverables.is_empty() {
        required.push_str("Deliverables:\n");
        for d in &input.current_phase_deliverables {
            required.push_str(&format!("- {d}\n"));
        }
        required.push('\n');
    }
    if !input.current_phase_criteria.is_empty() {
        required.push_str("Success criteria:\n");
        for c in &input.current_phase_criteria {
            required.push_str(&format!("- {c}\n"));
        }
        required.push('\n');
    }
    if !input.rejection_findings.is_empty() {
        required.push_str("## PHASE WAS REJECTED\n\n");
        for f in &input.rejection_findings {
            required.push_str(&format!("- [{:?}/{:?}] {}\n", f.severity, f.finding_type, f.message));
        }
        required.push('\n');
    }

    let blockers = bullet_section("## Active blockers", &input.active_blockers);
    let project = bullet_section("## Project context", &input.project_context);
    let summaries = phase_summaries_section(&input.prior_phase_summaries);
    let findings = findings_section(&input.top_findings);

    // Drop order matches §4.5: blockers first, generic findings last.
    let mut optional = vec![blockers, project, summaries, findings];

    while !optional.is_empty() && required.len() + optional.iter().map(String::len).sum::<usize>() > budget_chars {
        optional.remove(0);
    }

    let mut out = required;
    for section in optional {
        out.push_str(&section);
    }
    out
}

fn bullet_section(header: &str, items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut s = format!("{header}\n\n");
    for item in items {
        s.push_str(&format!("- {item}\n"));
    }
    s.push('\n');
    s
}

fn phase_summaries_section(summaries: &[(i64, String)]) -> String {
    if summaries.is_empty() {
        return String::new();
    }
    let mut s = String::from("## Prior phase summaries\n\n");
    for (index, summary) in summaries {
        s.push_str(&format!("Phase {index}: {summary}\n"));
    }
    s.push('\n');
    s
}

fn findings_section(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return String::new();
    }
    let mut s = String::from("## Notable findings from prior phases\n\n");
    for f in findings {
        s.push_str(&format!("- [{:?}] (phase {}) {}\n", f.severity, f.phase_index, f.message));
    }
    s.push('\n');
    s
}

/// Gather [`ContextInput`] from the state store and render it.
pub async fn accumulate(
    state: &StateManager,
    task: &Task,
    current_phase: &Phase,
    max_tokens: u32,
    max_findings: usize,
) -> StateResult<String> {
    let phases = state.list_phases(&task.id).await?;
    let mut prior_phase_summaries = Vec::new();
    for phase in &phases {
        if phase.phase_index < current_phase.phase_index {
            if let Some(handover) = state.get_handover(&task.id, phase.phase_index).await? {
                prior_phase_summaries.push((phase.phase_index, handover.summary));
            }
        }
    }

    let all_findings = state.list_findings_by_task(&task.id).await?;

    let mut top_findings: Vec<Finding> = all_findings
        .iter()
        .filter(|f| f.phase_index < current_phase.phase_index && f.severity.is_priority())
        .cloned()
        .collect();
    top_findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(b.phase_index.cmp(&a.phase_index)));
    top_findings.truncate(max_findings);

    let active_blockers: Vec<String> = all_findings
        .iter()
        .filter(|f| f.finding_type == FindingType::Blocker && f.phase_index < current_phase.phase_index)
        .map(|f| f.message.clone())
        .collect();

    let rejection_findings = if current_phase.status == PhaseStatus::Revising {
        let reviews = state.list_reviews_by_task(&task.id).await?;
        reviews
            .into_iter()
            .filter(|r| r.phase_index == current_phase.phase_index)
            .flat_map(|r| r.rejection_findings().into_iter().cloned().collect::<Vec<_>>())
            .collect()
    } else {
        Vec::new()
    };

    let input = ContextInput {
        task_description: task.description.clone(),
        current_phase_name: current_phase.name.clone(),
        current_phase_deliverables: current_phase.deliverables.clone(),
        current_phase_criteria: current_phase.success_criteria.clone(),
        prior_phase_summaries,
        top_findings,
        active_blockers,
        project_context: Vec::new(),
        rejection_findings,
    };

    Ok(render(&input, max_tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn finding(phase_index: i64, severity: Severity, message: &str) -> Finding {
        Finding::new(
            "TASK-1".into(),
            "agent-1".into(),
            phase_index,
            FindingType::Issue,
            severity,
            message.into(),
            None,
        )
    }

    #[test]
    fn required_sections_survive_a_tiny_budget() {
        let input = ContextInput {
            task_description: "Build the thing".into(),
            current_phase_name: "Build".into(),
            current_phase_deliverables: vec!["binary".into()],
            current_phase_criteria: vec!["compiles".into()],
            active_blockers: vec!["blocker one".into()],
            project_context: vec!["rust project".into()],
            prior_phase_summaries: vec![(0, "investigated".into())],
            top_findings: vec![finding(0, Severity::Critical, "found a bug")],
            rejection_findings: Vec::new(),
        };

        let rendered = render(&input, 1);
        assert!(rendered.contains("Build the thing"));
        assert!(rendered.contains("compiles"));
        assert!(!rendered.contains("blocker one"));
        assert!(!rendered.contains("rust project"));
    }

    #[test]
    fn rejection_findings_are_never_dropped() {
        let input = ContextInput {
            task_description: "Build the thing".into(),
            current_phase_name: "Build".into(),
            current_phase_deliverables: Vec::new(),
            current_phase_criteria: Vec::new(),
            active_blockers: vec!["x".repeat(10_000)],
            project_context: Vec::new(),
            prior_phase_summaries: Vec::new(),
            top_findings: Vec::new(),
            rejection_findings: vec![finding(0, Severity::Critical, "tests fail")],
        };

        let rendered = render(&input, 1);
        assert!(rendered.contains("PHASE WAS REJECTED"));
        assert!(rendered.contains("tests fail"));
    }

    #[test]
    fn generous_budget_keeps_every_optional_section() {
        let input = ContextInput {
            task_description: "Build the thing".into(),
            current_phase_name: "Build".into(),
            current_phase_deliverables: Vec::new(),
            current_phase_criteria: Vec::new(),
            active_blockers: vec!["blocker one".into()],
            project_context: vec!["rust project".into()],
            prior_phase_summaries: vec![(0, "investigated".into())],
            top_findings: vec![finding(0, Severity::High, "minor issue")],
            rejection_findings: Vec::new(),
        };

        let rendered = render(&input, 10_000);
        assert!(rendered.contains("blocker one"));
        assert!(rendered.contains("rust project"));
        assert!(rendered.contains("investigated"));
        assert!(rendered.contains("minor issue"));
    }
}
