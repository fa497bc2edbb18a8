//! Prompt assembly.
//!
//! Builds an agent's prompt file from a structured [`PromptSpec`] in one
//! pass, rather than ad-hoc string interpolation scattered across the
//! agent-spawn call path: universal protocol, type-specific requirements,
//! accumulated prior-phase context, and the handover tail.
//!
//! Template loading chain, per section name:
//! 1. `.orchestrator/prompts/{name}.pmt` (user override)
//! 2. `prompts/{name}.pmt` (repo default)
//! 3. Embedded fallback in code
//!
//! Templates use Handlebars syntax for variable substitution.

pub mod embedded;
mod loader;

pub use loader::{PromptLoader, PromptSpec};
