//! Prompt assembly.
//!
//! An agent's prompt file is built once, by [`PromptLoader::render`], from a
//! structured [`PromptSpec`] rather than ad-hoc string interpolation at the
//! call site: the universal protocol, the agent type's specific
//! requirements, the accumulated prior-phase context, and the handover tail
//! are each rendered independently and joined in a fixed order.
//!
//! Template loading chain, per section name:
//! 1. `.orchestrator/prompts/{name}.pmt` (user override)
//! 2. `prompts/{name}.pmt` (repo default)
//! 3. Embedded fallback compiled into the binary

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Everything needed to materialize one agent's prompt file.
///
/// `accumulated_context` and `handover_tail` are pre-rendered Markdown
/// blocks produced by the context accumulator (§4.5) and the handover
/// module (§4.6) respectively; they are appended verbatim rather than
/// passed through Handlebars.
#[derive(Debug, Clone, Serialize)]
pub struct PromptSpec {
    pub agent_id: String,
    pub agent_type: String,
    pub task_id: String,
    pub task_description: String,
    pub phase_index: i64,
    pub is_reviewer: bool,
    pub parent_agent_id: Option<String>,
    pub depth: u32,
    #[serde(skip)]
    pub accumulated_context: Option<String>,
    #[serde(skip)]
    pub handover_tail: Option<String>,
}

impl PromptSpec {
    /// Spec for a normal phase-bound agent.
    pub fn for_agent(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        task_id: impl Into<String>,
        task_description: impl Into<String>,
        phase_index: i64,
        parent_agent_id: Option<String>,
        depth: u32,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            task_id: task_id.into(),
            task_description: task_description.into(),
            phase_index,
            is_reviewer: false,
            parent_agent_id,
            depth,
            accumulated_context: None,
            handover_tail: None,
        }
    }

    /// Spec for a reviewer, bound to the sentinel phase_index of -1.
    pub fn for_reviewer(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        task_description: impl Into<String>,
        reviewed_phase_index: i64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: "reviewer".to_string(),
            task_id: task_id.into(),
            task_description: task_description.into(),
            phase_index: reviewed_phase_index,
            is_reviewer: true,
            parent_agent_id: None,
            depth: 1,
            accumulated_context: None,
            handover_tail: None,
        }
    }

    pub fn with_accumulated_context(mut self, context: impl Into<String>) -> Self {
        self.accumulated_context = Some(context.into());
        self
    }

    pub fn with_handover_tail(mut self, tail: impl Into<String>) -> Self {
        self.handover_tail = Some(tail.into());
        self
    }
}

/// Loads and renders prompt sections, checking overrides before falling
/// back to the embedded defaults.
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    user_dir: Option<PathBuf>,
    repo_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a loader rooted at the given workspace directory.
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        let workspace = workspace.as_ref();
        let user_dir = workspace.join(".orchestrator/prompts");
        let repo_dir = workspace.join("prompts");

        let user_dir = user_dir.exists().then_some(user_dir);
        let repo_dir = repo_dir.exists().then_some(repo_dir);

        debug!(?user_dir, ?repo_dir, "PromptLoader::new");

        Self {
            hbs: Handlebars::new(),
            user_dir,
            repo_dir,
        }
    }

    /// A loader that only ever resolves embedded defaults (tests, or a
    /// workspace with no prompt overrides on disk).
    pub fn embedded_only() -> Self {
        Self {
            hbs: Handlebars::new(),
            user_dir: None,
            repo_dir: None,
        }
    }

    fn load_template(&self, name: &str) -> Result<String> {
        if let Some(ref dir) = self.user_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("failed to read user prompt {}: {}", path.display(), e));
            }
        }

        if let Some(ref dir) = self.repo_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("failed to read repo prompt {}: {}", path.display(), e));
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("prompt section not found: {}", name))
    }

    fn render_section(&self, name: &str, spec: &PromptSpec) -> Result<String> {
        let template = self.load_template(name)?;
        self.hbs
            .render_template(&template, spec)
            .map_err(|e| eyre!("failed to render prompt section {}: {}", name, e))
    }

    /// Render the full prompt file for an agent in one pass: protocol,
    /// type-specific requirements, accumulated context, handover tail.
    pub fn render(&self, spec: &PromptSpec) -> Result<String> {
        let protocol = self.render_section("protocol", spec)?;

        let type_section_name = format!("type-{}", spec.agent_type);
        let type_section = self
            .render_section(&type_section_name, spec)
            .or_else(|_| self.render_section("type-default", spec))?;

        let mut sections = vec![protocol, type_section];

        if let Some(ref context) = spec.accumulated_context {
            sections.push(context.clone());
        }
        if let Some(ref tail) = spec.handover_tail {
            sections.push(tail.clone());
        }

        Ok(sections.join("\n\n---\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_agent_with_embedded_defaults() {
        let loader = PromptLoader::embedded_only();
        let spec = PromptSpec::for_agent("agent-1", "builder", "task-1", "Build the thing", 0, None, 1);

        let prompt = loader.render(&spec).unwrap();
        assert!(prompt.contains("builder"));
        assert!(prompt.contains("task-1"));
        assert!(prompt.contains("Build the thing"));
        assert!(!prompt.contains("reviewer bound"));
    }

    #[test]
    fn reviewer_spec_includes_reviewer_clause() {
        let loader = PromptLoader::embedded_only();
        let spec = PromptSpec::for_reviewer("rev-1", "task-1", "Build the thing", 0);

        let prompt = loader.render(&spec).unwrap();
        assert!(prompt.contains("reviewer bound to phase 0"));
    }

    #[test]
    fn unknown_agent_type_falls_back_to_type_default() {
        let loader = PromptLoader::embedded_only();
        let spec = PromptSpec::for_agent("agent-1", "xenobiologist", "task-1", "desc", 0, None, 1);

        let prompt = loader.render(&spec).unwrap();
        assert!(prompt.contains("general-purpose `xenobiologist` agent"));
    }

    #[test]
    fn accumulated_context_and_handover_tail_are_appended() {
        let loader = PromptLoader::embedded_only();
        let spec = PromptSpec::for_agent("agent-1", "builder", "task-1", "desc", 1, None, 1)
            .with_accumulated_context("## Prior findings\n- one critical finding")
            .with_handover_tail("## Handover\n- phase 0 approved");

        let prompt = loader.render(&spec).unwrap();
        assert!(prompt.contains("Prior findings"));
        assert!(prompt.contains("phase 0 approved"));

        let findings_pos = prompt.find("Prior findings").unwrap();
        let handover_pos = prompt.find("phase 0 approved").unwrap();
        assert!(findings_pos < handover_pos);
    }

    #[test]
    fn child_agent_spec_records_parent_and_depth() {
        let loader = PromptLoader::embedded_only();
        let spec = PromptSpec::for_agent(
            "child-1",
            "fixer",
            "task-1",
            "desc",
            0,
            Some("agent-1".to_string()),
            2,
        );

        let prompt = loader.render(&spec).unwrap();
        assert!(prompt.contains("spawned by `agent-1` at depth 2"));
    }

    #[test]
    fn user_override_takes_precedence_over_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let override_dir = dir.path().join(".orchestrator/prompts");
        std::fs::create_dir_all(&override_dir).unwrap();
        std::fs::write(override_dir.join("protocol.pmt"), "CUSTOM PROTOCOL for {{agent_type}}").unwrap();

        let loader = PromptLoader::new(dir.path());
        let spec = PromptSpec::for_agent("agent-1", "builder", "task-1", "desc", 0, None, 1);

        let prompt = loader.render(&spec).unwrap();
        assert!(prompt.contains("CUSTOM PROTOCOL for builder"));
    }
}
