//! Handover generation (§4.6): on phase approval, assemble a token-budgeted
//! summary from that phase's findings, its review's verdicts, and the last
//! progress message of every agent bound to it. Persisted in the state
//! store and mirrored to a Markdown file under the task workspace.

use std::io::Write;

use crate::domain::{FindingType, Handover, HandoverMetrics, Phase, Severity, Task};
use crate::events::Event;

use super::{EngineContext, EngineResult};

/// Build and persist the handover for a just-approved phase. A no-op
/// re-approval (the handover already exists) simply returns the existing
/// row rather than duplicating work, since `Handover::id_for` is stable per
/// `(task_id, phase_index)`.
pub async fn generate_handover(ctx: EngineContext<'_>, task: &Task, phase: &Phase) -> EngineResult<Handover> {
    if let Some(existing) = ctx.state.get_handover(&task.id, phase.phase_index).await? {
        return Ok(existing);
    }

    let agents = ctx.state.list_agents_by_phase(&task.id, phase.phase_index).await?;
    let findings = ctx.state.list_findings_by_task(&task.id).await?;
    let phase_findings: Vec<_> = findings.iter().filter(|f| f.phase_index == phase.phase_index).collect();

    let reviews = ctx.state.list_reviews_by_task(&task.id).await?;
    let review = reviews.into_iter().find(|r| r.phase_index == phase.phase_index);

    let mut key_findings: Vec<String> = phase_findings
        .iter()
        .filter(|f| matches!(f.severity, Severity::Critical | Severity::High) || f.finding_type == FindingType::Insight)
        .map(|f| f.message.clone())
        .collect();
    key_findings.truncate(ctx.config.handover.max_key_findings);

    let blockers_resolved: Vec<String> = phase_findings
        .iter()
        .filter(|f| f.finding_type == FindingType::Blocker)
        .map(|f| f.message.clone())
        .collect();

    let mut recommendations: Vec<String> = phase_findings
        .iter()
        .filter(|f| f.finding_type == FindingType::Recommendation)
        .map(|f| f.message.clone())
        .collect();
    if let Some(review) = &review {
        for critique in &review.critiques {
            recommendations.push(critique.text.clone());
        }
    }
    recommendations.truncate(ctx.config.handover.max_recommendations);

    let artifacts: Vec<String> = phase_findings
        .iter()
        .filter(|f| f.finding_type == FindingType::Solution)
        .map(|f| f.message.clone())
        .collect();

    let mut last_messages = Vec::new();
    for agent in &agents {
        if let Some(latest) = ctx.state.get_agent_progress_latest(&agent.id).await? {
            if !latest.message.is_empty() {
                last_messages.push(format!("{}: {}", agent.agent_type, latest.message));
            }
        }
    }

    let summary = build_summary(phase, &last_messages, ctx.config.handover.max_tokens);

    let metrics = HandoverMetrics {
        agent_count: agents.len() as u32,
        finding_count: phase_findings.len() as u32,
        duration_ms: phase.updated_at - phase.created_at,
    };

    let handover = Handover::new(task.id.clone(), phase.phase_index, summary, key_findings, artifacts, blockers_resolved, recommendations, metrics);
    let created = ctx.state.create_handover(handover).await?;

    write_markdown(ctx, task, &created)?;

    ctx.events.emit(Event::HandoverCreated {
        task_id: task.id.clone(),
        from_phase_index: phase.phase_index,
    });

    Ok(created)
}

/// Truncate the free-text summary to the token budget (4 chars/token),
/// preferring to drop whole trailing agent messages over mid-sentence
/// character slicing.
fn build_summary(phase: &Phase, last_messages: &[String], max_tokens: u32) -> String {
    let budget = max_tokens as usize * 4;
    let mut lines = vec![format!("Phase {} ({}) completed.", phase.phase_index, phase.name)];
    lines.extend(last_messages.iter().cloned());

    let mut out = String::new();
    for line in &lines {
        let candidate_len = out.len() + line.len() + 1;
        if candidate_len > budget && !out.is_empty() {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn write_markdown(ctx: EngineContext<'_>, task: &Task, handover: &Handover) -> std::io::Result<()> {
    ctx.layout.ensure_task_dirs(&task.id)?;
    let path = ctx.layout.handover_md_path(&task.id, handover.from_phase_index);
    let mut file = std::fs::File::create(path)?;

    writeln!(file, "# Handover: phase {}", handover.from_phase_index)?;
    writeln!(file, "\n{}\n", handover.summary)?;
    write_bullet_section(&mut file, "Key findings", &handover.key_findings)?;
    write_bullet_section(&mut file, "Artifacts", &handover.artifacts)?;
    write_bullet_section(&mut file, "Blockers resolved", &handover.blockers_resolved)?;
    write_bullet_section(&mut file, "Recommendations", &handover.recommendations)?;
    writeln!(
        file,
        "\nMetrics: {} agents, {} findings, {} ms",
        handover.metrics.agent_count, handover.metrics.finding_count, handover.metrics.duration_ms
    )?;
    Ok(())
}

fn write_bullet_section(file: &mut std::fs::File, title: &str, items: &[String]) -> std::io::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(file, "## {title}\n")?;
    for item in items {
        writeln!(file, "- {item}")?;
    }
    writeln!(file)?;
    Ok(())
}
