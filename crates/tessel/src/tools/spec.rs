//! Structured tool descriptions.
//!
//! A [`ToolSpec`] renders purpose, usage guidance, examples and
//! disambiguation hints into the single description string the model sees.
//! Unset sections are left out of the rendered text.

use serde_json::{Value, json};

use crate::ToolDef;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    /// One imperative sentence, e.g. "Search file contents for a regex pattern".
    pub purpose: String,
    pub when_to_use: Option<String>,
    /// Steers the model away from a neighbouring tool.
    pub when_not_to_use: Option<String>,
    pub parameters: Value,
    pub examples: Vec<(String, String)>,
    pub output_format: Option<String>,
    pub disambiguation: Vec<Disambiguation>,
}

/// A situation where this tool is commonly confused with another one.
#[derive(Debug, Clone)]
pub struct Disambiguation {
    pub scenario: String,
    pub use_instead: String,
    pub reason: String,
}

impl ToolSpec {
    pub fn builder(name: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            spec: ToolSpec {
                name: name.into(),
                purpose: String::new(),
                when_to_use: None,
                when_not_to_use: None,
                parameters: json!({"type": "object", "properties": {}}),
                examples: Vec::new(),
                output_format: None,
                disambiguation: Vec::new(),
            },
        }
    }

    pub fn description(&self) -> String {
        let mut lines = Vec::new();
        if !self.purpose.is_empty() {
            lines.push(format!("{}.", self.purpose.trim_end_matches('.')));
        }
        if let Some(when) = &self.when_to_use {
            lines.push(format!("When to use: {when}"));
        }
        if let Some(when_not) = &self.when_not_to_use {
            lines.push(format!("When NOT to use: {when_not}"));
        }
        if !self.examples.is_empty() {
            lines.push("Examples:".to_string());
            for (input, output) in &self.examples {
                lines.push(format!("  - {input} -> {output}"));
            }
        }
        if let Some(format) = &self.output_format {
            lines.push(format!("Output format: {format}"));
        }
        if !self.disambiguation.is_empty() {
            lines.push("Disambiguation:".to_string());
            for d in &self.disambiguation {
                lines.push(format!(
                    "  - {}: use '{}' instead ({})",
                    d.scenario, d.use_instead, d.reason
                ));
            }
        }
        lines.join("\n")
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(self.name.clone(), self.description(), self.parameters.clone())
    }
}

pub struct ToolSpecBuilder {
    spec: ToolSpec,
}

impl ToolSpecBuilder {
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.spec.purpose = purpose.into();
        self
    }

    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.spec.when_to_use = Some(when.into());
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.spec.when_not_to_use = Some(when_not.into());
        self
    }

    pub fn parameters(mut self, params: Value) -> Self {
        self.spec.parameters = params;
        self
    }

    /// Parameters derived from the argument struct the tool deserializes into.
    pub fn parameters_for<T: schemars::JsonSchema>(self) -> Self {
        self.parameters(crate::json_schema_for::<T>())
    }

    pub fn example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.spec.examples.push((input.into(), output.into()));
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.spec.output_format = Some(format.into());
        self
    }

    pub fn disambiguate(
        mut self,
        scenario: impl Into<String>,
        use_instead: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.spec.disambiguation.push(Disambiguation {
            scenario: scenario.into(),
            use_instead: use_instead.into(),
            reason: reason.into(),
        });
        self
    }

    pub fn build(self) -> ToolSpec {
        self.spec
    }

    pub fn to_tool_def(self) -> ToolDef {
        self.spec.to_tool_def()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_description_lists_every_section() {
        let spec = ToolSpec::builder("grep")
            .purpose("Search file contents for a regex pattern.")
            .when_to_use("Finding text across files")
            .when_not_to_use("You know the file already, use read_file")
            .example("grep(pattern='TODO')", "matching lines")
            .output_format("file:line:text")
            .disambiguate("Reading a whole file", "read_file", "grep only shows matches")
            .build();

        let desc = spec.description();
        assert!(desc.starts_with("Search file contents for a regex pattern.\n"));
        assert!(desc.contains("When NOT to use: You know the file already"));
        assert!(desc.contains("  - grep(pattern='TODO') -> matching lines"));
        assert!(desc.contains("use 'read_file' instead (grep only shows matches)"));
    }

    #[test]
    fn unset_sections_are_omitted() {
        let def = ToolSpec::builder("noop").purpose("Do nothing").to_tool_def();
        assert_eq!(def.function.description, "Do nothing.");
        assert_eq!(def.function.parameters["type"], "object");
    }
}
