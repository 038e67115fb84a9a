//! Proxy circuit backed by a Tor SOCKS port and, optionally, its control port.
//!
//! [`TorCircuit::proxy_url`] is what [`ReqwestFetcher::for_circuit`]
//! routes through. Changing the circuit sends `SIGNAL NEWNYM` over the
//! control port; without one configured the exit stays as it is.
//!
//! [`ReqwestFetcher::for_circuit`]: crate::ReqwestFetcher::for_circuit

use std::time::Duration;

use futures::future::BoxFuture;
use jobdork_core::error::AppError;
use jobdork_core::traits::CircuitControl;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TorCircuit {
    proxy_url: String,
    control_addr: Option<String>,
    control_password: Option<String>,
}

impl TorCircuit {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            control_addr: None,
            control_password: None,
        }
    }

    /// Control port address (`127.0.0.1:9051`) used to request new circuits.
    pub fn with_control(mut self, addr: impl Into<String>, password: Option<String>) -> Self {
        self.control_addr = Some(addr.into());
        self.control_password = password;
        self
    }

    async fn newnym(&self, addr: &str) -> Result<(), AppError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| AppError::NetworkError(format!("Tor control port {addr}: {e}")))?;
        let (read, mut write) = stream.into_split();
        let mut replies = BufReader::new(read).lines();

        let auth = match &self.control_password {
            Some(password) => format!("AUTHENTICATE \"{}\"\r\n", escape(password)),
            None => "AUTHENTICATE\r\n".to_string(),
        };
        for command in [auth.as_str(), "SIGNAL NEWNYM\r\n"] {
            write
                .write_all(command.as_bytes())
                .await
                .map_err(|e| AppError::NetworkError(format!("Tor control write: {e}")))?;
            let reply = replies
                .next_line()
                .await
                .map_err(|e| AppError::NetworkError(format!("Tor control read: {e}")))?
                .unwrap_or_default();
            if !reply.starts_with("250") {
                let verb = command.split_whitespace().next().unwrap_or_default();
                return Err(AppError::Generic(format!(
                    "Tor control refused {verb}: {reply}"
                )));
            }
        }

        // Best effort; Tor closes the connection on QUIT either way.
        let _ = write.write_all(b"QUIT\r\n").await;
        Ok(())
    }
}

fn escape(password: &str) -> String {
    password.replace('\\', "\\\\").replace('"', "\\\"")
}

impl CircuitControl for TorCircuit {
    fn proxy_url(&self) -> Option<String> {
        Some(self.proxy_url.clone())
    }

    fn change_circuit(&self) -> BoxFuture<'_, Result<(), AppError>> {
        Box::pin(async move {
            let Some(addr) = &self.control_addr else {
                tracing::debug!("No Tor control port configured, keeping current circuit");
                return Ok(());
            };
            tokio::time::timeout(CONTROL_TIMEOUT, self.newnym(addr))
                .await
                .map_err(|_| AppError::Timeout(CONTROL_TIMEOUT.as_secs()))?
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Fake control port answering each command line with the next reply.
    async fn control_port(
        replies: &'static [&'static str],
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            for reply in replies {
                let Some(line) = lines.next_line().await.unwrap() else {
                    break;
                };
                seen.push(line);
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_newnym_is_sent_after_authenticating() {
        let (addr, server) = control_port(&["250 OK\r\n", "250 OK\r\n"]).await;
        let circuit = TorCircuit::new("socks5h://127.0.0.1:9050")
            .with_control(addr, Some("s3cr\"t".to_string()));

        circuit.change_circuit().await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(seen, ["AUTHENTICATE \"s3cr\\\"t\"", "SIGNAL NEWNYM"]);
    }

    #[tokio::test]
    async fn test_rejected_authentication_is_an_error() {
        let (addr, _server) = control_port(&["515 Authentication failed\r\n"]).await;
        let circuit = TorCircuit::new("socks5h://127.0.0.1:9050").with_control(addr, None);

        let err = circuit.change_circuit().await.unwrap_err();

        assert!(err.to_string().contains("AUTHENTICATE"));
        assert!(err.to_string().contains("515"));
    }

    #[tokio::test]
    async fn test_without_control_port_circuit_is_kept() {
        let circuit = TorCircuit::new("socks5h://127.0.0.1:9050");
        circuit.change_circuit().await.unwrap();
        assert_eq!(
            circuit.proxy_url().as_deref(),
            Some("socks5h://127.0.0.1:9050")
        );
    }
}
