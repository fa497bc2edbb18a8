//! Phase engine (§4.2): the phase state machine, version-guarded
//! transitions, and the automatic-advancement rule that moves a phase to
//! `AwaitingReview` once every agent bound to it has reached a terminal
//! status.

use tracing::{info, warn};

use crate::domain::{Phase, PhaseStatus, Task};
use crate::events::Event;

use super::{EngineContext, EngineError, EngineResult};

/// Activate `phase_index` (`Pending -> Active`). Used for phase 0 at task
/// creation and for the next phase once its predecessor is `Approved`.
pub async fn activate_phase(ctx: EngineContext<'_>, task_id: &str, phase_index: i64) -> EngineResult<Phase> {
    let phase = ctx.state.get_phase(task_id, phase_index).await?;
    let updated = ctx
        .state
        .transition_phase(task_id, phase_index, PhaseStatus::Active, phase.version, None)
        .await?;
    ctx.events.emit(Event::PhaseTransitioned {
        task_id: task_id.to_string(),
        phase_index,
        status: updated.status,
    });
    Ok(updated)
}

/// Re-evaluate whether `phase_index` should auto-advance to
/// `AwaitingReview` (§4.2 step 1-3). Invoked after any event that transitions
/// an agent bound to the current phase to a terminal status: a self-report,
/// a kill, or the health daemon marking an agent dead.
///
/// No-ops unless: the phase is `Active`, it has at least one bound agent, and
/// every bound agent is terminal. The reviewer-spawn side effect (§4.3) is
/// triggered from here rather than left to the caller, since "all agents
/// terminal" and "spawn reviewers" must happen atomically from the caller's
/// perspective (spec §5 ordering guarantee: phase-completion check fires
/// after the triggering commit, and nothing else may observe `AwaitingReview`
/// without reviewers already in flight).
pub async fn check_phase_completion(ctx: EngineContext<'_>, task_id: &str, phase_index: i64) -> EngineResult<()> {
    if phase_index < 0 {
        // Reviewers are bound to the sentinel phase_index; they never drive
        // phase completion.
        return Ok(());
    }

    let phase = ctx.state.get_phase(task_id, phase_index).await?;
    if phase.status != PhaseStatus::Active {
        return Ok(());
    }

    let agents = ctx.state.list_agents_by_phase(task_id, phase_index).await?;
    if agents.is_empty() || !agents.iter().all(|a| a.status.is_terminal()) {
        return Ok(());
    }

    info!(task_id, phase_index, agent_count = agents.len(), "phase: all bound agents terminal, auto-submitting for review");

    let updated = ctx
        .state
        .transition_phase(
            task_id,
            phase_index,
            PhaseStatus::AwaitingReview,
            phase.version,
            Some("all bound agents reached a terminal status".to_string()),
        )
        .await?;
    ctx.events.emit(Event::PhaseTransitioned {
        task_id: task_id.to_string(),
        phase_index,
        status: updated.status,
    });

    let task = ctx.state.get_task(task_id).await?;
    super::review::trigger_auto_review(ctx, &task, &updated).await?;
    Ok(())
}

/// Apply a review's finalized verdict to its phase: `Approved` activates the
/// next phase (generating a handover first); rejection (including
/// needs-revision, per the aggregation rule) moves the phase to `Revising`.
pub async fn apply_review_outcome(
    ctx: EngineContext<'_>,
    task: &Task,
    phase_index: i64,
    verdict: crate::domain::VerdictValue,
) -> EngineResult<()> {
    use crate::domain::VerdictValue::*;

    let phase = ctx.state.get_phase(&task.id, phase_index).await?;
    // UNDER_REVIEW -> APPROVED|REJECTED is the only edge available here;
    // ESCALATED is reached via the dead-all-reviewers path in the review
    // module, not through a verdict.
    let to = match verdict {
        Approved => PhaseStatus::Approved,
        Rejected | NeedsRevision => PhaseStatus::Rejected,
    };
    let phase = ctx.state.transition_phase(&task.id, phase_index, to, phase.version, None).await?;
    ctx.events.emit(Event::PhaseTransitioned {
        task_id: task.id.clone(),
        phase_index,
        status: phase.status,
    });

    match phase.status {
        PhaseStatus::Approved => {
            super::handover::generate_handover(ctx, task, &phase).await?;

            let next_index = phase_index + 1;
            if ctx.state.get_phase(&task.id, next_index).await.is_ok() {
                activate_phase(ctx, &task.id, next_index).await?;
            } else {
                // Terminal phase approved: the task itself is done.
                let updated = ctx.state.mark_task_terminal(&task.id, crate::domain::TaskStatus::Completed).await?;
                ctx.events.emit(Event::TaskTransitioned {
                    task_id: updated.id.clone(),
                    status: updated.status.to_string(),
                });
            }
        }
        PhaseStatus::Rejected => {
            let phase = ctx.state.transition_phase(&task.id, phase_index, PhaseStatus::Revising, phase.version, None).await?;
            ctx.events.emit(Event::PhaseTransitioned {
                task_id: task.id.clone(),
                phase_index,
                status: phase.status,
            });
        }
        other => warn!(task_id = %task.id, phase_index, ?other, "apply_review_outcome: unexpected resulting phase status"),
    }
    Ok(())
}

/// Move an escalated phase: all reviewers died with no verdicts submitted.
/// Terminal for the phase; requires out-of-band resolution (spec §4.3).
pub async fn escalate_phase(ctx: EngineContext<'_>, task_id: &str, phase_index: i64) -> EngineResult<Phase> {
    let phase = ctx.state.get_phase(task_id, phase_index).await?;
    let updated = ctx.state.transition_phase(task_id, phase_index, PhaseStatus::Escalated, phase.version, None).await?;
    ctx.events.emit(Event::PhaseTransitioned {
        task_id: task_id.to_string(),
        phase_index,
        status: updated.status,
    });
    Ok(updated)
}

/// Manual `approve_phase`/`reject_phase` RPC entry points (§4.2, §6). Refused
/// with `ManualApprovalBlocked` whenever the phase is `UnderReview` with an
/// in-progress auto-spawned review already owning it; otherwise applies the
/// requested outcome directly (a manually-triggered, non-auto-spawned
/// review's path).
pub async fn manual_set_phase_outcome(
    ctx: EngineContext<'_>,
    task_id: &str,
    phase_index: i64,
    approve: bool,
) -> EngineResult<Phase> {
    let phase = ctx.state.get_phase(task_id, phase_index).await?;
    if phase.status == PhaseStatus::UnderReview {
        let reviews = ctx.state.list_reviews_by_task(task_id).await?;
        if let Some(active) = reviews
            .iter()
            .find(|r| r.phase_index == phase_index && r.auto_spawned && r.status == crate::domain::ReviewStatus::InProgress)
        {
            return Err(EngineError::ManualApprovalBlocked(format!(
                "phase {phase_index} is owned by in-progress auto-spawned review {}",
                active.id
            )));
        }
    }

    let to = if approve { PhaseStatus::Approved } else { PhaseStatus::Rejected };
    let updated = ctx.state.transition_phase(task_id, phase_index, to, phase.version, None).await?;
    ctx.events.emit(Event::PhaseTransitioned {
        task_id: task_id.to_string(),
        phase_index,
        status: updated.status,
    });

    let task = ctx.state.get_task(task_id).await?;
    if approve {
        super::handover::generate_handover(ctx, &task, &updated).await?;
        let next_index = phase_index + 1;
        if ctx.state.get_phase(task_id, next_index).await.is_ok() {
            activate_phase(ctx, task_id, next_index).await?;
        }
    } else {
        let phase = ctx.state.transition_phase(task_id, phase_index, PhaseStatus::Revising, updated.version, None).await?;
        ctx.events.emit(Event::PhaseTransitioned {
            task_id: task_id.to_string(),
            phase_index,
            status: phase.status,
        });
    }

    ctx.state.get_phase(task_id, phase_index).await.map_err(EngineError::from)
}
