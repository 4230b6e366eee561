//! Prompt Builder System
//!
//! Composes the request sent to a provider: an instruction template followed
//! by the source code in a fenced block tagged with its language.

use std::collections::BTreeMap;

use crate::analyzer::Language;
use crate::config::PromptsConfig;
use crate::types::{DebloatError, Result};

/// Prompt section types
#[derive(Debug, Clone)]
pub enum PromptSection {
    /// Raw text
    Text(String),
    /// Code block with language
    Code { language: String, content: String },
}

/// Prompt builder for consistent prompt construction
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add text section
    pub fn text(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Text(content.to_string()));
        self
    }

    /// Add code block
    pub fn code(mut self, language: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Code {
            language: language.to_string(),
            content: content.to_string(),
        });
        self
    }

    /// Build the final prompt string
    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Text(content) => {
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Code { language, content } => {
                    prompt.push_str(&format!("```{}\n", language));
                    prompt.push_str(&content);
                    prompt.push_str("\n```\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

/// Compose a prompt for Python source
pub fn build_prompt(template: &str, source_code: &str) -> String {
    build_prompt_for(template, source_code, Language::Python)
}

/// Compose a prompt: the template, a blank line, then the code fenced with
/// its language tag.
///
/// An empty template is valid and yields just the separator and the block.
/// Unrecognized sources are fenced as Python.
pub fn build_prompt_for(template: &str, source_code: &str, language: Language) -> String {
    PromptBuilder::new()
        .text(template)
        .code(language.prompt_language().fence_tag(), source_code)
        .build()
}

// =============================================================================
// Templates
// =============================================================================

const DEBLOAT_FULL: &str = "\
Goal*
You are an experienced software engineer. Please debloat the code in this file while maintaining its functional correctness. Simplify logic, remove redundancies, and optimize for readability and maintainability without introducing new bugs.

IMPORTANT
1. All rewritten code must remain within the file it originated from.
2. No new files or services may be introduced as part of the solution.
3. Adding helper methods within the file is allowed but must not break functional correctness.
4. Do not modify OR remove comments, as they do not count as code. Imports also do not count as code.

Context
Software bloat refers to unnecessary or inefficient CODE that increases a program's size or reduces its performance without contributing meaningful functionality.";

const DEBLOAT_SHORT: &str = "Debloat this file while maintaining functional correctness";

/// Named instruction templates
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: BTreeMap<String, String>,
    default_id: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptTemplates {
    /// Built-in templates `"1"` (full instructions) and `"2"` (short)
    pub fn builtin() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert("1".to_string(), DEBLOAT_FULL.to_string());
        templates.insert("2".to_string(), DEBLOAT_SHORT.to_string());
        Self {
            templates,
            default_id: "1".to_string(),
        }
    }

    /// Built-ins extended (or replaced by name) with configured templates
    pub fn from_config(config: &PromptsConfig) -> Result<Self> {
        let mut prompts = Self::builtin();
        prompts
            .templates
            .extend(config.templates.iter().map(|(k, v)| (k.clone(), v.clone())));

        if !prompts.templates.contains_key(&config.default) {
            return Err(DebloatError::Config(format!(
                "prompts.default '{}' is not a known template ({})",
                config.default,
                prompts.ids().join(", ")
            )));
        }
        prompts.default_id = config.default.clone();
        Ok(prompts)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn resolve(&self, id: &str) -> Result<&str> {
        self.templates.get(id).map(String::as_str).ok_or_else(|| {
            DebloatError::Config(format!(
                "Unknown prompt '{}'. Available: {}",
                id,
                self.ids().join(", ")
            ))
        })
    }

    /// Pick the instruction text: custom text wins over a template id,
    /// which wins over the configured default
    pub fn select(&self, id: Option<&str>, custom: Option<&str>) -> Result<String> {
        if let Some(text) = custom {
            return Ok(text.to_string());
        }
        self.resolve(id.unwrap_or(&self.default_id))
            .map(str::to_string)
    }
}
