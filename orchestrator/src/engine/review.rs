//! Review subsystem (§4.3): auto-spawns reviewer agents when a phase's work
//! is done, collects verdicts, aggregates to a final outcome, and handles
//! partial finalization when reviewers die mid-review.

use tracing::info;

use crate::domain::{Phase, Review, ReviewStatus, Task, Verdict, VerdictValue};
use crate::events::Event;

use super::lifecycle::SpawnRequest;
use super::{EngineContext, EngineResult};

/// Spawn `config.review.num_reviewers` reviewer agents bound to
/// `phase_index = -1` and create the in-progress review record. Also moves
/// the phase AWAITING_REVIEW -> UNDER_REVIEW, since a review now owns it.
pub async fn trigger_auto_review(ctx: EngineContext<'_>, task: &Task, phase: &Phase) -> EngineResult<Review> {
    let num_reviewers = ctx.config.review.num_reviewers;
    let mut reviewer_ids = Vec::with_capacity(num_reviewers as usize);
    for _ in 0..num_reviewers {
        let reviewer = super::lifecycle::spawn_agent(ctx, task, SpawnRequest::reviewer("orchestrator", phase.phase_index)).await?;
        reviewer_ids.push(reviewer.id);
    }

    let review = Review::new(task.id.clone(), phase.phase_index, num_reviewers, true, reviewer_ids);
    let created = ctx.state.create_review(review).await?;
    ctx.events.emit(Event::ReviewTriggered {
        task_id: task.id.clone(),
        phase_index: phase.phase_index,
        review_id: created.id.clone(),
        num_reviewers,
    });

    let updated_phase = ctx
        .state
        .transition_phase(&task.id, phase.phase_index, crate::domain::PhaseStatus::UnderReview, phase.version, None)
        .await?;
    ctx.events.emit(Event::PhaseTransitioned {
        task_id: task.id.clone(),
        phase_index: phase.phase_index,
        status: updated_phase.status,
    });

    info!(task_id = %task.id, phase_index = phase.phase_index, review_id = %created.id, num_reviewers, "review: auto-spawned reviewers");
    Ok(created)
}

/// `submit_review` (§6): append one reviewer's verdict; finalize
/// immediately once every expected reviewer has submitted.
pub async fn submit_verdict(ctx: EngineContext<'_>, review_id: &str, verdict: Verdict) -> EngineResult<Review> {
    let reviewer_agent_id = verdict.reviewer_agent_id.clone();
    let review = ctx.state.submit_verdict(review_id, verdict).await?;
    ctx.events.emit(Event::VerdictSubmitted {
        task_id: review.task_id.clone(),
        review_id: review.id.clone(),
        reviewer_agent_id,
        verdict: review.verdicts.last().map(|v| v.verdict).unwrap_or(VerdictValue::Approved),
    });

    if review.all_submitted() {
        return finalize(ctx, &review).await;
    }
    Ok(review)
}

/// Aggregate a review's submitted verdicts and apply the outcome to its
/// phase (§4.3, §4.2). Safe to call on an already-finalized review: the
/// state layer's `finalize_review` is a no-op past the first call.
pub async fn finalize(ctx: EngineContext<'_>, review: &Review) -> EngineResult<Review> {
    let final_verdict = review.aggregate();
    let finalized = ctx.state.finalize_review(&review.id, ReviewStatus::Completed, Some(final_verdict)).await?;

    ctx.events.emit(Event::ReviewFinalized {
        task_id: finalized.task_id.clone(),
        review_id: finalized.id.clone(),
        verdict: final_verdict,
    });

    let task = ctx.state.get_task(&finalized.task_id).await?;
    super::phase::apply_review_outcome(ctx, &task, finalized.phase_index, final_verdict).await?;
    Ok(finalized)
}

/// Invoked when the health daemon (or the agent-terminal path) discovers a
/// reviewer bound to `review` died without submitting. Applies the
/// partial-finalization rule (§4.3): finalize using whatever verdicts
/// already landed if at least one did; escalate the phase if every
/// reviewer is now accounted for and none submitted.
pub async fn handle_reviewer_dead(ctx: EngineContext<'_>, task: &Task, review: &Review) -> EngineResult<()> {
    if review.status != ReviewStatus::InProgress {
        return Ok(());
    }

    let mut dead = 0usize;
    for reviewer_id in &review.reviewer_agent_ids {
        let agent = ctx.state.get_agent(reviewer_id).await?;
        if agent.status.is_terminal() {
            dead += 1;
        }
    }

    if !review.verdicts.is_empty() {
        // At least one verdict landed: finalize with what we have,
        // regardless of how many reviewers are still alive, as soon as
        // every remaining reviewer is either submitted or dead.
        if review.verdicts.len() + (dead - review_submitters_that_died(ctx, review).await?) >= review.reviewer_agent_ids.len() {
            finalize(ctx, review).await?;
        }
        return Ok(());
    }

    if dead >= review.reviewer_agent_ids.len() {
        let failed = ctx.state.finalize_review(&review.id, ReviewStatus::Failed, None).await?;
        ctx.events.emit(Event::ReviewFinalized {
            task_id: failed.task_id.clone(),
            review_id: failed.id.clone(),
            verdict: VerdictValue::Rejected,
        });
        super::phase::escalate_phase(ctx, &task.id, review.phase_index).await?;
    }
    Ok(())
}

/// Count, among reviewers who already submitted a verdict, how many are
/// *also* terminal — so a dead reviewer who submitted before dying is not
/// double-counted against the "still waiting" tally.
async fn review_submitters_that_died(ctx: EngineContext<'_>, review: &Review) -> EngineResult<usize> {
    let mut count = 0;
    for verdict in &review.verdicts {
        let agent = ctx.state.get_agent(&verdict.reviewer_agent_id).await?;
        if agent.status.is_terminal() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::{Priority, TaskContext, TaskLimits};
    use crate::engine::multiplexer::MockMultiplexer;
    use crate::events::EventBus;
    use crate::prompts::PromptLoader;
    use crate::state::StateManager;

    async fn harness() -> (StateManager, EventBus, MockMultiplexer, PromptLoader, crate::workspace::WorkspaceLayout, Config, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = StateManager::spawn(dir.path().join("state.sqlite3")).unwrap();
        let events = EventBus::new(64);
        let mux = MockMultiplexer::new();
        let prompts = PromptLoader::embedded_only();
        let layout = crate::workspace::WorkspaceLayout::new(dir.path());
        let mut config = Config::default();
        config.review.num_reviewers = 2;
        (state, events, mux, prompts, layout, config, dir)
    }

    async fn active_phase(ctx: EngineContext<'_>, task: &Task) -> Phase {
        let phase = crate::domain::Phase::new(task.id.clone(), 0, "Investigation".into(), "desc".into());
        ctx.state.create_phase(phase).await.unwrap();
        ctx.state.transition_phase(&task.id, 0, crate::domain::PhaseStatus::Active, 0, None).await.unwrap()
    }

    fn verdict(review_id: &str, reviewer: &str, v: VerdictValue) -> Verdict {
        Verdict {
            review_id: review_id.to_string(),
            reviewer_agent_id: reviewer.to_string(),
            verdict: v,
            findings: Vec::new(),
            notes: String::new(),
            submitted_at: store::now_ms(),
        }
    }

    #[tokio::test]
    async fn trigger_auto_review_spawns_reviewers_and_moves_phase_under_review() {
        let (state, events, mux, prompts, layout, config, dir) = harness().await;
        let ctx = EngineContext { state: &state, events: &events, multiplexer: &mux, prompts: &prompts, layout: &layout, config: &config };

        let task = state
            .create_task(Task::new("desc".into(), Priority::P1, dir.path().to_string_lossy().into(), "/cwd".into(), TaskLimits::default(), TaskContext::default()))
            .await
            .unwrap();
        let phase = active_phase(ctx, &task).await;

        let review = trigger_auto_review(ctx, &task, &phase).await.unwrap();
        assert_eq!(review.reviewer_agent_ids.len(), 2);
        assert!(review.auto_spawned);

        let reloaded_phase = state.get_phase(&task.id, 0).await.unwrap();
        assert_eq!(reloaded_phase.status, crate::domain::PhaseStatus::UnderReview);
    }

    #[tokio::test]
    async fn unanimous_approval_advances_phase_and_creates_handover() {
        let (state, events, mux, prompts, layout, config, dir) = harness().await;
        let ctx = EngineContext { state: &state, events: &events, multiplexer: &mux, prompts: &prompts, layout: &layout, config: &config };

        let task = state
            .create_task(Task::new("desc".into(), Priority::P1, dir.path().to_string_lossy().into(), "/cwd".into(), TaskLimits::default(), TaskContext::default()))
            .await
            .unwrap();
        let phase0 = active_phase(ctx, &task).await;
        let phase1 = crate::domain::Phase::new(task.id.clone(), 1, "Build".into(), "desc".into());
        state.create_phase(phase1).await.unwrap();

        let review = trigger_auto_review(ctx, &task, &phase0).await.unwrap();
        let r0 = review.reviewer_agent_ids[0].clone();
        let r1 = review.reviewer_agent_ids[1].clone();

        submit_verdict(ctx, &review.id, verdict(&review.id, &r0, VerdictValue::Approved)).await.unwrap();
        let finalized = submit_verdict(ctx, &review.id, verdict(&review.id, &r1, VerdictValue::Approved)).await.unwrap();
        assert_eq!(finalized.final_verdict, Some(VerdictValue::Approved));

        let phase0_after = state.get_phase(&task.id, 0).await.unwrap();
        assert_eq!(phase0_after.status, crate::domain::PhaseStatus::Approved);
        let phase1_after = state.get_phase(&task.id, 1).await.unwrap();
        assert_eq!(phase1_after.status, crate::domain::PhaseStatus::Active);

        let handover = state.get_handover(&task.id, 0).await.unwrap();
        assert!(handover.is_some());
    }

    #[tokio::test]
    async fn handle_reviewer_dead_escalates_when_all_reviewers_die_with_no_verdicts() {
        let (state, events, mux, prompts, layout, config, dir) = harness().await;
        let ctx = EngineContext { state: &state, events: &events, multiplexer: &mux, prompts: &prompts, layout: &layout, config: &config };

        let task = state
            .create_task(Task::new("desc".into(), Priority::P1, dir.path().to_string_lossy().into(), "/cwd".into(), TaskLimits::default(), TaskContext::default()))
            .await
            .unwrap();
        let phase0 = active_phase(ctx, &task).await;
        let review = trigger_auto_review(ctx, &task, &phase0).await.unwrap();

        for reviewer_id in &review.reviewer_agent_ids {
            state.mark_agent_terminal(reviewer_id, crate::domain::AgentStatus::Failed).await.unwrap();
        }

        handle_reviewer_dead(ctx, &task, &review).await.unwrap();

        let phase_after = state.get_phase(&task.id, 0).await.unwrap();
        assert_eq!(phase_after.status, crate::domain::PhaseStatus::Escalated);
    }

    #[tokio::test]
    async fn handle_reviewer_dead_finalizes_with_partial_verdicts() {
        let (state, events, mux, prompts, layout, config, dir) = harness().await;
        let ctx = EngineContext { state: &state, events: &events, multiplexer: &mux, prompts: &prompts, layout: &layout, config: &config };

        let task = state
            .create_task(Task::new("desc".into(), Priority::P1, dir.path().to_string_lossy().into(), "/cwd".into(), TaskLimits::default(), TaskContext::default()))
            .await
            .unwrap();
        let phase0 = active_phase(ctx, &task).await;
        let phase1 = crate::domain::Phase::new(task.id.clone(), 1, "Build".into(), "desc".into());
        state.create_phase(phase1).await.unwrap();
        let review = trigger_auto_review(ctx, &task, &phase0).await.unwrap();

        let r0 = review.reviewer_agent_ids[0].clone();
        let r1 = review.reviewer_agent_ids[1].clone();
        let review = submit_verdict(ctx, &review.id, verdict(&review.id, &r0, VerdictValue::Approved)).await.unwrap();

        state.mark_agent_terminal(&r1, crate::domain::AgentStatus::Failed).await.unwrap();
        handle_reviewer_dead(ctx, &task, &review).await.unwrap();

        let finalized = state.get_review(&review.id).await.unwrap();
        assert_eq!(finalized.status, ReviewStatus::Completed);
        assert_eq!(finalized.final_verdict, Some(VerdictValue::Approved));
    }
}
