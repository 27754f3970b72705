use serde::Serialize;

use crate::{FeedbackEndpoint, Payload, ScriptError, UrScript};

/// Everything a generator may need to embed feedback reporting in a script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptContext {
    pub key: u64,
    pub listener_ip: String,
    pub listener_port: u16,
    pub socket_name: String,
    /// Line the script should send once it starts running.
    pub received_token: String,
    /// Line the script should send when it is done, if the task waits for one.
    pub completed_token: Option<String>,
}

impl ScriptContext {
    pub fn new(
        key: u64,
        endpoint: Option<&FeedbackEndpoint>,
        received: &Payload,
        completed: Option<&Payload>,
    ) -> Self {
        // Without a running listener the address fields stay empty.
        Self {
            key,
            listener_ip: endpoint.map(|e| e.ip.clone()).unwrap_or_default(),
            listener_port: endpoint.map(|e| e.port).unwrap_or(0),
            socket_name: endpoint.map(|e| e.socket_name.clone()).unwrap_or_default(),
            received_token: received.to_string(),
            completed_token: completed.map(|p| p.to_string()),
        }
    }
}

/// Produces the script text of a task. Called lazily, right before the
/// first transmission, when the listener address is known.
pub trait ScriptGenerator: Send + Sync {
    fn generate(&self, context: &ScriptContext) -> Result<String, ScriptError>;
}

/// A finished script, sent as is.
#[derive(Debug, Clone)]
pub struct RawScript(pub String);

impl ScriptGenerator for RawScript {
    fn generate(&self, _context: &ScriptContext) -> Result<String, ScriptError> {
        Ok(self.0.clone())
    }
}

/// Adapts a closure into a generator.
pub struct FnScript<F>(pub F);

impl<F> ScriptGenerator for FnScript<F>
where
    F: Fn(&ScriptContext) -> Result<String, ScriptError> + Send + Sync,
{
    fn generate(&self, context: &ScriptContext) -> Result<String, ScriptError> {
        (self.0)(context)
    }
}

/// Wraps body lines with the task header and footer: open the feedback
/// socket, report the received token, run the body, report the completed
/// token, close the socket.
#[derive(Debug, Clone, Default)]
pub struct FeedbackScript {
    pub tcp: Option<[f64; 6]>,
    pub body: Vec<String>,
}

impl FeedbackScript {
    pub fn new<I, S>(body: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tcp: None,
            body: body.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_tcp(mut self, tcp: [f64; 6]) -> Self {
        self.tcp = Some(tcp);
        self
    }

    pub fn from_text(body: &str) -> Self {
        Self::new(body.lines())
    }
}

impl ScriptGenerator for FeedbackScript {
    fn generate(&self, context: &ScriptContext) -> Result<String, ScriptError> {
        wrap_with_feedback(context, self.tcp, &self.body)
    }
}

pub fn wrap_with_feedback<S: AsRef<str>>(
    context: &ScriptContext,
    tcp: Option<[f64; 6]>,
    body: &[S],
) -> Result<String, ScriptError> {
    if context.listener_ip.is_empty() || context.listener_port == 0 {
        return Err(ScriptError::MissingListener);
    }
    let socket = context.socket_name.as_str();

    let mut script = UrScript::new();
    script.start();
    if let Some(tcp) = tcp {
        script.set_tcp(tcp);
    }
    script.textmsg(&format!(">> TASK{}", context.key), true);
    script
        .set_socket(socket, &context.listener_ip, context.listener_port)?
        .socket_open(socket)?
        .socket_send_line_string(&context.received_token, socket)?;
    script.add_lines(body.iter().map(|line| line.as_ref().trim_end()));
    if let Some(completed) = &context.completed_token {
        script.socket_send_line_string(completed, socket)?;
    }
    script.socket_close(socket)?;
    script.end();
    Ok(script.generate())
}
