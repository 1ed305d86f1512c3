//! Kramer video switcher driver (Protocol 3000 over TCP)

pub mod protocol;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use self::protocol::{Request, Response};
use super::{ConnectionState, Driver};
use crate::error::{DeviceError, DeviceResult};
use crate::preset::{Command, DeviceKind};

const DEVICE: &str = "switcher";

/// Protocol 3000 default TCP port
pub const DEFAULT_PORT: u16 = 5000;

/// Stateful Protocol 3000 client
///
/// The socket is taken out of the client for the duration of each
/// request and only put back once a full reply has been read, so a failed
/// or timed-out request always leaves the client disconnected.
pub struct SwitcherClient {
    host: String,
    port: u16,
    response_timeout: Duration,
    connect_timeout: Duration,
    state: ConnectionState,
    conn: Option<BufReader<TcpStream>>,
}

impl SwitcherClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            response_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            state: ConnectionState::Disconnected,
            conn: None,
        }
    }

    /// Bound on reading one reply
    pub fn with_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Map a preset command to its Protocol 3000 request
    pub fn request_for(command: &Command) -> DeviceResult<Request> {
        match *command {
            Command::Route { source, dest, layer } => Ok(Request::Route { layer, dest, source }),
            Command::VideoMute { output, mode } => Ok(Request::VideoMute { output, mode }),
            ref other => Err(DeviceError::protocol(
                DEVICE,
                format!("{} is not a switcher command", other.name()),
            )),
        }
    }

    async fn ensure_connected(&mut self) -> DeviceResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let address = self.address();
        debug!("Connecting to switcher at {}", address);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(DeviceError::connection(DEVICE, format!("{}: {}", address, e)));
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(DeviceError::connection(
                    DEVICE,
                    format!("connect to {} timed out", address),
                ));
            }
        };
        let _ = stream.set_nodelay(true);
        self.conn = Some(BufReader::new(stream));

        if let Err(e) = self.transact(&Request::Handshake).await {
            warn!("Switcher handshake with {} failed: {}", address, e);
            self.conn = None;
            self.state = ConnectionState::Disconnected;
            return Err(e);
        }

        self.state = ConnectionState::Connected;
        info!("✅ Switcher connected at {}", address);
        Ok(())
    }

    /// Write one request and read its reply
    async fn transact(&mut self, request: &Request) -> DeviceResult<Response> {
        let Some(mut conn) = self.conn.take() else {
            self.state = ConnectionState::Disconnected;
            return Err(DeviceError::connection(DEVICE, "not connected"));
        };
        self.state = ConnectionState::Disconnected;

        let line = request.line();
        debug!("Switcher TX: {}", line.trim_end());
        conn.get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| DeviceError::connection(DEVICE, e))?;

        let response = match timeout(self.response_timeout, read_response(&mut conn, request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(DeviceError::protocol(
                    DEVICE,
                    format!(
                        "no reply to '{}' within {} ms",
                        line.trim_end(),
                        self.response_timeout.as_millis()
                    ),
                ))
            }
        };
        debug!(machine = %response.machine, "Switcher RX: {} {}", response.command, response.params);

        // The reply was fully consumed, so the link is reusable either way
        self.conn = Some(conn);
        self.state = ConnectionState::Connected;

        if response.confirms(request) {
            Ok(response)
        } else {
            Err(DeviceError::protocol(
                DEVICE,
                format!(
                    "'{}' rejected: {} {}",
                    line.trim_end(),
                    response.command,
                    response.params
                ),
            ))
        }
    }

    /// Send one command, connecting and handshaking first if needed
    pub async fn send(&mut self, command: &Command) -> DeviceResult<()> {
        let request = Self::request_for(command)?;
        self.ensure_connected().await?;
        self.transact(&request).await?;
        debug!(command = %command, "Switcher command acknowledged");
        Ok(())
    }
}

/// Read lines until one is the reply to `request`
async fn read_response(conn: &mut BufReader<TcpStream>, request: &Request) -> DeviceResult<Response> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = conn
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| DeviceError::connection(DEVICE, e))?;
        if n == 0 {
            return Err(DeviceError::connection(DEVICE, "connection closed by switcher"));
        }
        let text = String::from_utf8_lossy(&buf);
        match Response::parse(text.trim()) {
            Some(response) if response.answers(request) => return Ok(response),
            Some(_) => debug!("Switcher RX (unsolicited): {}", text.trim()),
            None if text.trim().is_empty() => continue,
            None => debug!("Switcher RX (ignored): {}", text.trim()),
        }
    }
}

#[async_trait]
impl Driver for SwitcherClient {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Switcher
    }

    async fn execute(&mut self, command: &Command) -> DeviceResult<()> {
        self.send(command).await
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn shutdown(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.get_mut().shutdown().await;
            debug!("Switcher link to {} closed", self.address());
        }
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::VideoMuteMode;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Fake switcher: answers each `\r`-terminated request via `reply`
    /// (`None` = stay silent) and records what it received.
    async fn fake_switcher(
        reply: fn(&str) -> Option<String>,
    ) -> (u16, Arc<Mutex<Vec<String>>>, Arc<Mutex<usize>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(Mutex::new(0usize));

        let seen_task = seen.clone();
        let accepted_task = accepted.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { return };
                *accepted_task.lock() += 1;
                let seen = seen_task.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket);
                    let mut buf = Vec::new();
                    loop {
                        buf.clear();
                        match reader.read_until(b'\r', &mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }
                        let line = String::from_utf8_lossy(&buf).trim().to_string();
                        seen.lock().push(line.clone());
                        if let Some(answer) = reply(&line) {
                            if reader.get_mut().write_all(answer.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        (port, seen, accepted)
    }

    fn kramer(line: &str) -> Option<String> {
        match line {
            "#" => Some("~01@ OK\r\n".to_string()),
            "#ROUTE 1,1,9" => Some("~01@ROUTE ERR 003\r\n".to_string()),
            "#ROUTE 1,1,7" => None,
            // Front-panel notification ahead of the real reply
            "#ROUTE 1,1,5" => Some("~01@ROUTE 1,1,4\r\n~01@ROUTE 1,1,5\r\n".to_string()),
            "#ROUTE 1,1,6" => Some("~01@ROUTE 1,1,4\r\n".to_string()),
            other => {
                let body = other.trim_start_matches('#');
                Some(format!("~01@{}\r\n", body))
            }
        }
    }

    fn client_for(port: u16) -> SwitcherClient {
        SwitcherClient::new("127.0.0.1", port).with_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_mixer_command_is_rejected() {
        let err = SwitcherClient::request_for(&Command::RecallScene(1)).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_route_handshakes_then_routes() {
        let (port, seen, accepted) = fake_switcher(kramer).await;
        let mut client = client_for(port);

        client
            .send(&Command::Route { source: 2, dest: 1, layer: 1 })
            .await
            .unwrap();
        client
            .send(&Command::VideoMute { output: 1, mode: VideoMuteMode::Blank })
            .await
            .unwrap();

        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(*seen.lock(), vec!["#", "#ROUTE 1,1,2", "#VMUTE 1,2"]);
        assert_eq!(*accepted.lock(), 1);
    }

    #[tokio::test]
    async fn test_err_reply_is_protocol_error() {
        let (port, _seen, _) = fake_switcher(kramer).await;
        let mut client = client_for(port);

        let err = client
            .send(&Command::Route { source: 9, dest: 1, layer: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol { .. }));
        assert!(err.to_string().contains("ERR"));
    }

    #[tokio::test]
    async fn test_timeout_drops_link_and_next_call_reconnects() {
        let (port, seen, accepted) = fake_switcher(kramer).await;
        let mut client = client_for(port);

        let err = client
            .send(&Command::Route { source: 7, dest: 1, layer: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol { .. }));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        client
            .send(&Command::Route { source: 3, dest: 1, layer: 1 })
            .await
            .unwrap();
        assert_eq!(*accepted.lock(), 2);
        assert_eq!(
            *seen.lock(),
            vec!["#", "#ROUTE 1,1,7", "#", "#ROUTE 1,1,3"]
        );
    }

    #[tokio::test]
    async fn test_unsolicited_notification_is_skipped() {
        let (port, seen, accepted) = fake_switcher(kramer).await;
        let mut client = client_for(port);

        client
            .send(&Command::Route { source: 5, dest: 1, layer: 1 })
            .await
            .unwrap();
        client
            .send(&Command::VideoMute { output: 1, mode: VideoMuteMode::Disable })
            .await
            .unwrap();
        assert_eq!(*accepted.lock(), 1);
        assert_eq!(*seen.lock(), vec!["#", "#ROUTE 1,1,5", "#VMUTE 1,1"]);

        // A notification alone never confirms the request
        let err = client
            .send(&Command::Route { source: 6, dest: 1, layer: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol { .. }));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_bad_handshake_is_protocol_error() {
        fn grumpy(_: &str) -> Option<String> {
            Some("~01@ ERR 001\r\n".to_string())
        }
        let (port, _seen, _) = fake_switcher(grumpy).await;
        let mut client = client_for(port);

        let err = client
            .send(&Command::Route { source: 1, dest: 1, layer: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol { .. }));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_switcher_is_connection_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = client_for(port);
        let err = client
            .send(&Command::Route { source: 1, dest: 1, layer: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Connection { .. }));
    }
}
