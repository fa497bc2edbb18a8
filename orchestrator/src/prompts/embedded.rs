//! Embedded fallback prompt sections, compiled into the binary from `.pmt`
//! files shipped alongside the crate. The exact wording is outside this
//! system's scope; what matters structurally is that every section has a
//! fallback even with no project-local override present.

use tracing::debug;

/// Universal protocol section, present in every agent's prompt.
pub const PROTOCOL: &str = include_str!("../../prompts/protocol.pmt");

/// Generic type-requirements section used when no `type-{agent_type}.pmt`
/// override exists for a given agent type.
pub const TYPE_DEFAULT: &str = include_str!("../../prompts/type-default.pmt");

/// Get the embedded prompt section by name.
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "protocol" => Some(PROTOCOL),
        "type-default" => Some(TYPE_DEFAULT),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_template_has_expected_placeholders() {
        let tpl = get_embedded("protocol").unwrap();
        assert!(tpl.contains("{{agent_type}}"));
        assert!(tpl.contains("{{task_id}}"));
        assert!(tpl.contains("is_reviewer"));
    }

    #[test]
    fn type_default_template_is_present() {
        assert!(get_embedded("type-default").is_some());
    }

    #[test]
    fn unknown_name_returns_none() {
        assert!(get_embedded("nonexistent").is_none());
    }
}
