//! Named prompt templates executed against a model preset.
//!
//! A template is `{templates_dir}/{name}.md`. It may open with TOML front
//! matter between `+++` lines:
//!
//! ```text
//! +++
//! system_message = "You are a careful reviewer."
//! preset = "default"
//! +++
//! Read the paper below.
//!
//! {{ paper }}
//! ```
//!
//! `{{ var }}` placeholders are filled from [`TemplateVars`]; a placeholder
//! without a value is an error, never an empty string.

use super::{LlmClient, Message};
use crate::models::{Config, ModelSpec, PipelineError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder regex")
});

/// Named values substituted into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars(BTreeMap<String, String>);

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Per-call settings that take precedence over the template's own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOverrides {
    pub preset: Option<String>,
}

impl TemplateOverrides {
    pub fn preset(preset: Option<String>) -> Self {
        Self { preset }
    }
}

/// Raw model output plus the preset that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateOutput {
    pub content: String,
    pub preset: String,
}

/// Executes a named template and returns the model's raw response.
#[async_trait]
pub trait TemplateRunner: Send + Sync {
    async fn run_template(
        &self,
        name: &str,
        vars: &TemplateVars,
        overrides: &TemplateOverrides,
    ) -> Result<TemplateOutput>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FrontMatter {
    system_message: Option<String>,
    preset: Option<String>,
}

/// A template file split into front matter and prompt body.
#[derive(Debug)]
struct Template {
    front: FrontMatter,
    body: String,
}

impl Template {
    fn parse(name: &str, text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let Some(rest) = text.strip_prefix("+++\n").or_else(|| text.strip_prefix("+++\r\n")) else {
            return Ok(Self {
                front: FrontMatter::default(),
                body: text.to_string(),
            });
        };

        let (front, body) = rest
            .split_once("\n+++")
            .ok_or_else(|| PipelineError::ParseError(format!("template {name}: unterminated front matter")))?;
        let front: FrontMatter = toml::from_str(front)
            .map_err(|e| PipelineError::ParseError(format!("template {name}: {e}")))?;
        let body = body
            .strip_prefix("\r\n")
            .or_else(|| body.strip_prefix('\n'))
            .unwrap_or(body);

        Ok(Self {
            front,
            body: body.to_string(),
        })
    }
}

/// Replace every `{{ var }}` in `body`.
pub fn render(name: &str, body: &str, vars: &TemplateVars) -> Result<String> {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(body) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let var = &caps[1];
        let value = vars.get(var).ok_or_else(|| {
            PipelineError::InvalidInput(format!("template {name}: no value for '{var}'"))
        })?;
        out.push_str(&body[last..whole.start]);
        out.push_str(value);
        last = whole.end;
    }
    out.push_str(&body[last..]);
    Ok(out)
}

/// [`TemplateRunner`] backed by template files and an [`LlmClient`].
pub struct LlmTemplateRunner {
    directory: PathBuf,
    default_preset: String,
    presets: HashMap<String, ModelSpec>,
    client: LlmClient,
}

impl LlmTemplateRunner {
    pub fn new(config: &Config, client: LlmClient) -> Self {
        Self {
            directory: config.templates.directory.clone(),
            default_preset: config.templates.default_preset.clone(),
            presets: config.presets.clone(),
            client,
        }
    }

    pub fn client(&self) -> &LlmClient {
        &self.client
    }

    fn template_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.md"))
    }

    async fn load(&self, name: &str) -> Result<Template> {
        let path = self.template_path(name);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PipelineError::io(format!("reading template {}", display(&path)), e))?;
        Template::parse(name, &text)
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl TemplateRunner for LlmTemplateRunner {
    async fn run_template(
        &self,
        name: &str,
        vars: &TemplateVars,
        overrides: &TemplateOverrides,
    ) -> Result<TemplateOutput> {
        let template = self.load(name).await?;
        let prompt = render(name, &template.body, vars)?;

        let preset = overrides
            .preset
            .clone()
            .or(template.front.preset)
            .unwrap_or_else(|| self.default_preset.clone());
        let model = self
            .presets
            .get(&preset)
            .ok_or_else(|| crate::models::ConfigError::UnknownPreset(preset.clone()))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = template.front.system_message.filter(|s| !s.trim().is_empty()) {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let completion = self.client.complete(model, &messages).await?;
        debug!(
            template = name,
            preset = %preset,
            model = %completion.model,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            duration_ms = completion.duration.as_millis() as u64,
            "Template completed"
        );

        Ok(TemplateOutput {
            content: completion.content,
            preset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RateLimiter;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_front_matter_split() {
        let template = Template::parse(
            "t",
            "+++\nsystem_message = \"be terse\"\npreset = \"fast\"\n+++\nHello {{ name }}\n",
        )
        .unwrap();
        assert_eq!(template.front.system_message.as_deref(), Some("be terse"));
        assert_eq!(template.front.preset.as_deref(), Some("fast"));
        assert_eq!(template.body, "Hello {{ name }}\n");

        let plain = Template::parse("t", "No front matter").unwrap();
        assert!(plain.front.preset.is_none());
        assert_eq!(plain.body, "No front matter");

        assert!(Template::parse("t", "+++\npreset = \"x\"\n").is_err());
    }

    #[test]
    fn test_render_requires_every_variable() {
        let vars = TemplateVars::new().with("paper", "TEXT");
        assert_eq!(
            render("t", "A {{paper}} B {{ paper }}", &vars).unwrap(),
            "A TEXT B TEXT"
        );

        let err = render("t", "{{ paper }} {{ critique }}", &vars).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(m) if m.contains("critique")));
    }

    #[tokio::test]
    async fn test_runner_resolves_preset_and_sends_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "model": "fast/model",
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "Profile: PAPER TEXT\n"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "<results></results>"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("profile.md"),
            "+++\nsystem_message = \"be terse\"\npreset = \"fast\"\n+++\nProfile: {{ paper }}\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.templates.directory = dir.path().to_path_buf();
        let mut fast = config.preset("default").unwrap().clone();
        fast.id = "fast/model".to_string();
        config.presets.insert("fast".to_string(), fast);

        let client = LlmClient::new(None, server.uri(), 5, 1, Arc::new(RateLimiter::new()))
            .unwrap()
            .with_retry_base(Duration::ZERO);
        let runner = LlmTemplateRunner::new(&config, client);

        let output = runner
            .run_template(
                "profile",
                &TemplateVars::new().with("paper", "PAPER TEXT"),
                &TemplateOverrides::default(),
            )
            .await
            .unwrap();
        assert_eq!(output.content, "<results></results>");
        assert_eq!(output.preset, "fast");

        let err = runner
            .run_template(
                "profile",
                &TemplateVars::new().with("paper", "x"),
                &TemplateOverrides::preset(Some("missing".to_string())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
