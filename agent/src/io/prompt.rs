//! Prompt rendering for the controller and the Dockerfile synthesizer.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::ActionKind;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const DOCKERFILE_TEMPLATE: &str = include_str!("prompts/dockerfile.md");

/// Instruction sent ahead of the file listing when synthesizing a Dockerfile.
pub const DOCKERFILE_INSTRUCTION: &str = "You are an expert DevOps engineer. \
Given a list of project files, output ONLY the Dockerfile content.";

fn param_hint(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::CloneRepo => "{url}",
        ActionKind::IngestFiletree => "{repo_path}",
        ActionKind::IngestFile => "{file}",
        ActionKind::QueryQdrant => "{query}",
        ActionKind::GenerateDockerfile => "{repo_path} or {dockerfile}",
        ActionKind::Build => "{dockerfile, tag?}",
        ActionKind::FixDockerfile => "{dockerfile, error}",
        ActionKind::AskHuman => "{prompt}",
        ActionKind::Exit => "{}",
    }
}

pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("dockerfile", DOCKERFILE_TEMPLATE)
            .expect("dockerfile template should be valid");
        Self { env }
    }

    /// Controller instructions seeded as the first history entry.
    pub fn render_system(&self, max_build_failures: u32, token_quota: u64) -> Result<String> {
        let action_table = ActionKind::ALL
            .iter()
            .map(|kind| format!("  {:<20}{}", kind.as_str(), param_hint(*kind)))
            .collect::<Vec<_>>()
            .join("\n");
        let template = self.env.get_template("system")?;
        Ok(template.render(context! {
            max_build_failures => max_build_failures,
            token_quota => token_quota,
            action_table => action_table,
        })?)
    }

    pub fn render_dockerfile_request(&self, file_list: &str) -> Result<String> {
        let template = self.env.get_template("dockerfile")?;
        Ok(template.render(context! { file_list => file_list })?)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_limits_and_every_action() {
        let prompt = PromptEngine::new()
            .render_system(4, 25_000)
            .expect("render");
        assert!(prompt.contains("After 4 consecutive build errors"));
        assert!(prompt.contains("25000 tokens"));
        for kind in ActionKind::ALL {
            assert!(prompt.contains(kind.as_str()), "missing {kind}");
        }
        assert!(prompt.contains("fix_dockerfile      {dockerfile, error}"));
    }

    #[test]
    fn dockerfile_request_embeds_listing() {
        let prompt = PromptEngine::new()
            .render_dockerfile_request("Cargo.toml\nsrc/main.rs")
            .expect("render");
        assert!(prompt.starts_with("Project files:\nCargo.toml\nsrc/main.rs\n"));
        assert!(prompt.trim_end().ends_with("Generate Dockerfile:"));
    }
}
