use crate::config::{ModelConfig, PromptTemplate};
use crate::llm_adapter::CompletionRequest;
use crate::types::{PipelineError, Result};
use std::collections::BTreeMap;

/// Turns named prompt templates into completion requests.
///
/// Rendering is a pure function of the template and the variables, so the
/// same inputs always produce byte-identical requests.
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    templates: BTreeMap<String, PromptTemplate>,
    max_tokens: u32,
    temperature_centi: u32,
}

impl PromptRenderer {
    pub fn new(templates: BTreeMap<String, PromptTemplate>, model: &ModelConfig) -> Self {
        Self {
            templates,
            max_tokens: model.max_tokens,
            temperature_centi: (model.temperature.clamp(0.0, 2.0) * 100.0).round() as u32,
        }
    }

    pub fn render(&self, name: &str, vars: &BTreeMap<&str, String>) -> Result<CompletionRequest> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| PipelineError::Config(format!("prompt template '{}' is not configured", name)))?;

        Ok(CompletionRequest {
            system: substitute(name, &template.system, vars)?,
            user: substitute(name, &template.user, vars)?,
            max_tokens: self.max_tokens,
            temperature_centi: self.temperature_centi,
        })
    }
}

/// Replace every `{{var}}` in `template`. A placeholder without a value is
/// an error rather than an empty string.
pub fn substitute(template_name: &str, template: &str, vars: &BTreeMap<&str, String>) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(PipelineError::Template {
                template: template_name.to_string(),
                variable: after.trim().to_string(),
            });
        };

        let var_name = after[..end].trim();
        let value = vars.get(var_name).ok_or_else(|| PipelineError::Template {
            template: template_name.to_string(),
            variable: var_name.to_string(),
        })?;
        result.push_str(value);
        rest = &after[end + 2..];
    }
    result.push_str(rest);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_placeholders() -> Result<()> {
        let mut vars = BTreeMap::new();
        vars.insert("topic", "technology".to_string());
        vars.insert("target_length", "750".to_string());

        let rendered = substitute("article", "Write {{ topic }} in {{target_length}} words on {{topic}}.", &vars)?;
        assert_eq!(rendered, "Write technology in 750 words on technology.");
        Ok(())
    }

    #[test]
    fn missing_variable_is_an_error() {
        let vars = BTreeMap::new();
        match substitute("post", "Hello {{platform}}", &vars) {
            Err(PipelineError::Template { template, variable }) => {
                assert_eq!(template, "post");
                assert_eq!(variable, "platform");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(substitute("post", "Hello {{platform", &vars).is_err());
    }

    #[test]
    fn renderer_is_deterministic() -> Result<()> {
        let mut templates = BTreeMap::new();
        templates.insert(
            "greeting".to_string(),
            PromptTemplate {
                system: "You greet {{name}}.".to_string(),
                user: "Say hi to {{name}}".to_string(),
            },
        );
        let renderer = PromptRenderer::new(templates, &ModelConfig::default());
        let mut vars = BTreeMap::new();
        vars.insert("name", "Ada".to_string());

        let first = renderer.render("greeting", &vars)?;
        let second = renderer.render("greeting", &vars)?;
        assert_eq!(first, second);
        assert_eq!(first.temperature_centi, 70);
        assert!(matches!(renderer.render("farewell", &vars), Err(PipelineError::Config(_))));
        Ok(())
    }
}
