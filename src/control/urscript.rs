use crate::{ScriptError, SocketRegistry};

const INDENT: &str = "  ";

/// Line-by-line builder for a URScript program.
///
/// ```rust,ignore
/// let mut script = UrScript::new();
/// script.start();
/// script.set_socket("feedback", "192.168.10.11", 50002)?;
/// script.socket_send_line_string("Task_0_received", "feedback")?;
/// script.add_line("movej([0, -1.57, 0, -1.57, 0, 0], a=0.5, v=0.5)");
/// script.end();
/// let text = script.generate();
/// ```
#[derive(Debug, Clone, Default)]
pub struct UrScript {
    lines: Vec<String>,
    sockets: SocketRegistry,
}

impl UrScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sockets(&self) -> &SocketRegistry {
        &self.sockets
    }

    pub fn start(&mut self) -> &mut Self {
        self.lines.push("def program():".to_string());
        self.textmsg(">> Entering program.", true)
    }

    /// Closes sockets left open and terminates the program.
    pub fn end(&mut self) -> &mut Self {
        for name in self.sockets.open_names() {
            log::warn!(target: "urscript",
                "Socket '{}' was not closed, closing it automatically.", name);
            if self.sockets.force_close(&name).is_ok() {
                self.push_socket_close(&name);
            }
        }
        self.textmsg("<< Exiting program.", true);
        self.lines.push("end".to_string());
        self.lines.push("program()".to_string());
        self
    }

    /// Adds one line inside the program body.
    pub fn add_line(&mut self, line: &str) -> &mut Self {
        self.lines.push(format!("{INDENT}{line}"));
        self
    }

    pub fn add_lines<I, S>(&mut self, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.add_line(line.as_ref());
        }
        self
    }

    /// `string` quotes the message, otherwise it is emitted as an expression.
    pub fn textmsg(&mut self, message: &str, string: bool) -> &mut Self {
        let line = if string {
            format!("textmsg({})", quoted(message))
        } else {
            format!("textmsg({})", message)
        };
        self.add_line(&line)
    }

    pub fn set_tcp(&mut self, pose: [f64; 6]) -> &mut Self {
        let line = format!("set_tcp({})", pose_literal(&pose));
        self.add_line(&line)
    }

    pub fn set_socket(
        &mut self,
        name: &str,
        ip: &str,
        port: u16,
    ) -> Result<&mut Self, ScriptError> {
        self.sockets.register(name, ip, port)?;
        Ok(self)
    }

    pub fn socket_open(&mut self, name: &str) -> Result<&mut Self, ScriptError> {
        if self.sockets.open(name)? {
            let entry = self.sockets.get(name)?.clone();
            self.textmsg("Opening socket connection...", true);
            self.add_line(&format!(
                "socket_open({}, {}, {})",
                quoted(&entry.ip),
                entry.port,
                quoted(name)
            ));
        }
        Ok(self)
    }

    pub fn socket_close(&mut self, name: &str) -> Result<&mut Self, ScriptError> {
        if self.sockets.close(name)? {
            self.push_socket_close(name);
        }
        Ok(self)
    }

    /// Sends the value of a script expression. Opens the socket first if needed.
    pub fn socket_send_line(
        &mut self,
        expression: &str,
        name: &str,
    ) -> Result<&mut Self, ScriptError> {
        self.ensure_open(name)?;
        self.add_line(&format!(
            "socket_send_line({}, socket_name={})",
            expression,
            quoted(name)
        ));
        Ok(self)
    }

    /// Sends a literal string. Opens the socket first if needed.
    pub fn socket_send_line_string(
        &mut self,
        line: &str,
        name: &str,
    ) -> Result<&mut Self, ScriptError> {
        self.ensure_open(name)?;
        self.add_line(&format!(
            "socket_send_line({}, socket_name={})",
            quoted(line),
            quoted(name)
        ));
        Ok(self)
    }

    pub fn generate(&self) -> String {
        let mut script = self.lines.join("\n");
        script.push('\n');
        script
    }

    fn ensure_open(&mut self, name: &str) -> Result<(), ScriptError> {
        if !self.sockets.is_open(name)? {
            self.socket_open(name)?;
        }
        Ok(())
    }

    fn push_socket_close(&mut self, name: &str) {
        self.textmsg(&format!("Closing socket connection with {}...", name), true);
        self.add_line(&format!("socket_close(socket_name={})", quoted(name)));
    }
}

/// Program that decelerates the arm to a halt.
pub fn stop_script(deceleration: f64) -> String {
    let mut script = UrScript::new();
    script
        .start()
        .add_line(&format!("stopl({})", deceleration))
        .end();
    script.generate()
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "'"))
}

fn pose_literal(pose: &[f64; 6]) -> String {
    let values = pose
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<String>>()
        .join(", ");
    format!("p[{}]", values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_with_feedback_socket() {
        let mut script = UrScript::new();
        script.start();
        script.set_socket("fb", "192.168.10.11", 50002).unwrap();
        script.socket_open("fb").unwrap();
        script.socket_send_line_string("Task_0_received", "fb").unwrap();
        script.add_line("sleep(0.1)");
        script.socket_close("fb").unwrap();
        script.end();

        let text = script.generate();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "def program():");
        assert!(lines.contains(&"  socket_open(\"192.168.10.11\", 50002, \"fb\")"));
        assert!(lines.contains(&"  socket_send_line(\"Task_0_received\", socket_name=\"fb\")"));
        assert!(lines.contains(&"  socket_close(socket_name=\"fb\")"));
        assert_eq!(lines[lines.len() - 2], "end");
        assert_eq!(lines[lines.len() - 1], "program()");
    }

    #[test]
    fn sending_on_closed_socket_opens_it_once() {
        let mut script = UrScript::new();
        script.start();
        script.set_socket("fb", "10.0.0.1", 1).unwrap();
        script.socket_send_line_string("a", "fb").unwrap();
        script.socket_send_line("pose", "fb").unwrap();
        script.end();
        let text = script.generate();
        assert_eq!(text.matches("socket_open(").count(), 1);
        // closed automatically by end()
        assert_eq!(text.matches("socket_close(").count(), 1);
        assert!(text.contains("socket_send_line(pose, socket_name=\"fb\")"));
    }

    #[test]
    fn unknown_socket_is_an_error() {
        let mut script = UrScript::new();
        assert!(matches!(
            script.socket_open("nope"),
            Err(ScriptError::Socket(_))
        ));
    }

    #[test]
    fn stop_program_decelerates() {
        let text = stop_script(0.5);
        assert!(text.starts_with("def program():"));
        assert!(text.contains("  stopl(0.5)"));
        assert!(text.trim_end().ends_with("program()"));
    }

    #[test]
    fn tcp_and_messages() {
        let mut script = UrScript::new();
        script.set_tcp([0.0, 0.0, 0.1, 0.0, 0.0, 3.14]);
        script.textmsg("say \"hi\"", true);
        script.textmsg("counter", false);
        let text = script.generate();
        assert!(text.contains("set_tcp(p[0, 0, 0.1, 0, 0, 3.14])"));
        assert!(text.contains("textmsg(\"say 'hi'\")"));
        assert!(text.contains("textmsg(counter)"));
    }
}
