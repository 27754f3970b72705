use std::sync::Arc;

use crate::{wrap_with_feedback, ScriptContext, ScriptError, ScriptGenerator};

/// Renders a tera template and wraps the result with feedback reporting.
///
/// The template sees the [`ScriptContext`] fields (`key`, `listener_ip`,
/// `listener_port`, `socket_name`, `received_token`, `completed_token`) plus
/// any extra values given with [`TemplateScript::with_value`].
#[derive(Clone)]
pub struct TemplateScript {
    templates: Arc<tera::Tera>,
    template_name: String,
    extra: tera::Context,
    tcp: Option<[f64; 6]>,
}

impl TemplateScript {
    pub fn new(templates: Arc<tera::Tera>, template_name: &str) -> Self {
        Self {
            templates,
            template_name: template_name.to_string(),
            extra: tera::Context::new(),
            tcp: None,
        }
    }

    /// Loads every template matching `glob`, e.g. `"templates/*.script"`.
    pub fn load_dir(glob: &str) -> Result<Arc<tera::Tera>, ScriptError> {
        let templates = tera::Tera::new(glob).map_err(|e| {
            log::error!(target: "script_templates", "UR Script template parsing error(s): {}", e);
            e
        })?;
        let names = templates
            .get_template_names()
            .map(|x| x.to_string())
            .collect::<Vec<String>>();
        if names.is_empty() {
            log::warn!(target: "script_templates", "Couldn't find any Tera templates in {}.", glob);
        } else {
            log::info!(target: "script_templates", "Found templates: {}.", names.join(", "));
        }
        Ok(Arc::new(templates))
    }

    pub fn from_raw(template_name: &str, content: &str) -> Result<Self, ScriptError> {
        let mut templates = tera::Tera::default();
        templates.add_raw_template(template_name, content)?;
        Ok(Self::new(Arc::new(templates), template_name))
    }

    pub fn with_value<T: serde::Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        self.extra.insert(key, value);
        self
    }

    pub fn with_tcp(mut self, tcp: [f64; 6]) -> Self {
        self.tcp = Some(tcp);
        self
    }

    pub fn render(&self, context: &ScriptContext) -> Result<String, ScriptError> {
        let mut tera_context = tera::Context::from_serialize(context)?;
        tera_context.extend(self.extra.clone());
        self.templates
            .render(&self.template_name, &tera_context)
            .map_err(|e| {
                log::error!(target: "script_templates",
                    "Rendering the {} Tera Template failed with: {}.", self.template_name, e);
                ScriptError::Template(e)
            })
    }
}

impl ScriptGenerator for TemplateScript {
    fn generate(&self, context: &ScriptContext) -> Result<String, ScriptError> {
        let body = self.render(context)?;
        let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
        wrap_with_feedback(context, self.tcp, &lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeedbackEndpoint, Payload};
    use std::io::Write;

    fn context() -> ScriptContext {
        ScriptContext::new(
            4,
            Some(&FeedbackEndpoint {
                ip: "10.0.0.2".to_string(),
                port: 50010,
                socket_name: "fb".to_string(),
            }),
            &Payload::text("Task_4_received"),
            Some(&Payload::text("Task_4_complete")),
        )
    }

    #[test]
    fn raw_template_renders_context_and_extra_values() {
        let generator = TemplateScript::from_raw(
            "move_j.script",
            "movej({{ joints }}, a={{ acceleration }}, v=0.5)\ntextmsg(\"task {{ key }}\")",
        )
        .unwrap()
        .with_value("joints", "[0, -1.57, 0, -1.57, 0, 0]")
        .with_value("acceleration", &0.4);

        let script = generator.generate(&context()).unwrap();
        assert!(script.contains("  movej([0, -1.57, 0, -1.57, 0, 0], a=0.4, v=0.5)"));
        assert!(script.contains("textmsg(\"task 4\")"));
        assert!(script.contains("\"Task_4_complete\""));
    }

    #[test]
    fn templates_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("wait.script")).unwrap();
        writeln!(file, "sleep({{{{ seconds }}}})").unwrap();

        let glob = format!("{}/*.script", dir.path().display());
        let templates = TemplateScript::load_dir(&glob).unwrap();
        let script = TemplateScript::new(templates, "wait.script")
            .with_value("seconds", &2)
            .generate(&context())
            .unwrap();
        assert!(script.contains("  sleep(2)"));
    }

    #[test]
    fn missing_template_is_an_error() {
        let generator = TemplateScript::from_raw("a.script", "x").unwrap();
        let other = TemplateScript::new(generator.templates.clone(), "b.script");
        assert!(matches!(
            other.generate(&context()),
            Err(ScriptError::Template(_))
        ));
    }
}
