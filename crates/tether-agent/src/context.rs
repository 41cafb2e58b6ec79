/// Produces the system prompt for each backend call.
///
/// Called before every backend call with the names of the skills loaded so
/// far, so newly loaded skills show up on the very next call.
pub trait ContextBuilder: Send + Sync {
    /// Build the system prompt.
    fn build_system_prompt(&self, loaded_skills: &[String]) -> String;
}

/// A skill the backend can ask to load through the `use_skill` tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillEntry {
    /// Skill name, as passed to `use_skill`.
    pub name: String,
    /// One-line summary listed while the skill is not loaded.
    pub description: String,
    /// Full instructions injected once the skill is loaded.
    pub content: String,
}

/// [`ContextBuilder`] over a fixed skill catalog.
///
/// Loaded skills contribute their full content; the rest are listed by name
/// and description so the model knows what it can load.
#[derive(Debug, Clone, Default)]
pub struct SkillContextBuilder {
    base_prompt: String,
    skills: Vec<SkillEntry>,
}

impl SkillContextBuilder {
    /// Builder with no skills.
    pub fn new(base_prompt: impl Into<String>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            skills: Vec::new(),
        }
    }

    /// Add a skill to the catalog.
    pub fn with_skill(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.skills.push(SkillEntry {
            name: name.into(),
            description: description.into(),
            content: content.into(),
        });
        self
    }

    /// The catalog.
    pub fn skills(&self) -> &[SkillEntry] {
        &self.skills
    }
}

impl ContextBuilder for SkillContextBuilder {
    fn build_system_prompt(&self, loaded_skills: &[String]) -> String {
        let mut prompt = self.base_prompt.clone();
        let is_loaded = |s: &SkillEntry| loaded_skills.iter().any(|n| *n == s.name);

        for skill in self.skills.iter().filter(|s| is_loaded(s)) {
            prompt.push_str(&format!("\n\n## Skill: {}\n{}", skill.name, skill.content));
        }

        let available: Vec<&SkillEntry> = self.skills.iter().filter(|s| !is_loaded(s)).collect();
        if !available.is_empty() {
            prompt.push_str("\n\nAvailable skills (load one with the use_skill tool):");
            for skill in available {
                prompt.push_str(&format!("\n- {}: {}", skill.name, skill.description));
            }
        }
        prompt
    }
}
