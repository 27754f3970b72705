use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{stop_script, ControllerConfig, SendError};

/// Delivers whole scripts to the controller, one fresh connection per script.
#[derive(Debug, Clone)]
pub struct ScriptSender {
    config: ControllerConfig,
}

impl ScriptSender {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub async fn send(&self, script: &str) -> Result<(), SendError> {
        send_script(
            script,
            &self.config.ip,
            self.config.port,
            self.config.connect_timeout,
        )
        .await
    }

    /// Sends the `stopl` program that brings the arm to a halt.
    pub async fn send_stop(&self) -> Result<(), SendError> {
        log::warn!(target: "script_sender",
            "Sending stop command to {}.", self.config.connection_url());
        self.send(&stop_script(self.config.stop_deceleration)).await
    }
}

/// Connects to `ip:port`, writes the whole UTF-8 script and closes.
/// No retries, that is up to the caller.
pub async fn send_script(
    script: &str,
    ip: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<(), SendError> {
    let addr = format!("{}:{}", ip, port);
    let mut stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Err(_) => {
            log::warn!(target: "script_sender",
                "UR with ip {} not available on port {}.", ip, port);
            return Err(SendError::Unreachable {
                addr,
                timeout: connect_timeout,
            });
        }
        Ok(Err(e)) => return Err(SendError::Connect { addr, source: e }),
        Ok(Ok(stream)) => stream,
    };

    let written = async {
        stream.write_all(script.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await
    };
    if let Err(e) = written.await {
        return Err(SendError::Write { addr, source: e });
    }
    log::info!(target: "script_sender", "Script sent to {} on port {}.", ip, port);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn script_arrives_complete() {
        let controller = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = controller.local_addr().unwrap().port();
        let reader = tokio::spawn(async move {
            let (mut stream, _) = controller.accept().await.unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).await.unwrap();
            received
        });

        let script = "def program():\n  textmsg(\"hi\")\nend\nprogram()\n";
        send_script(script, "127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reader.await.unwrap(), script);
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        // Bind then drop to get a port with nobody listening.
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };
        let sender = ScriptSender::new(ControllerConfig::new("127.0.0.1", port));
        let result = sender.send("x").await;
        assert!(matches!(
            result,
            Err(SendError::Connect { .. }) | Err(SendError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn stop_command_is_a_stopl_program() {
        let controller = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = controller.local_addr().unwrap().port();
        let reader = tokio::spawn(async move {
            let (mut stream, _) = controller.accept().await.unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).await.unwrap();
            received
        });

        let mut config = ControllerConfig::new("127.0.0.1", port);
        config.stop_deceleration = 1.2;
        ScriptSender::new(config).send_stop().await.unwrap();
        assert!(reader.await.unwrap().contains("stopl(1.2)"));
    }
}
