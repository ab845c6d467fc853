//! Client side of the bridge socket, used by `voxloop follow` and `voxloop send`.

use crate::bridge::protocol::{BridgeCommand, BridgeEvent};
use crate::error::{Result, VoxError};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

async fn connect(socket_path: &Path) -> Result<UnixStream> {
    UnixStream::connect(socket_path)
        .await
        .map_err(|e| VoxError::BridgeConnection {
            message: format!("failed to connect to {}: {e}", socket_path.display()),
        })
}

/// Sends one command line and disconnects.
pub async fn send_command(socket_path: &Path, command: BridgeCommand) -> Result<()> {
    let mut stream = connect(socket_path).await?;
    let line = format!("{command}\n");
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| VoxError::BridgeConnection {
            message: format!("failed to write command: {e}"),
        })?;
    stream.shutdown().await.map_err(|e| VoxError::BridgeConnection {
        message: format!("failed to close connection: {e}"),
    })
}

/// Calls `on_event` for every event until the server hangs up.
///
/// Lines that are not events are skipped with a warning.
pub async fn follow<F>(socket_path: &Path, mut on_event: F) -> Result<()>
where
    F: FnMut(BridgeEvent),
{
    let stream = connect(socket_path).await?;
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| VoxError::BridgeConnection {
            message: format!("failed to read event: {e}"),
        })?
    {
        match line.parse::<BridgeEvent>() {
            Ok(event) => on_event(event),
            Err(e) => tracing::warn!(line = %line, "skipping bridge line: {e}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_send_command_writes_one_line() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap()
        });

        send_command(&socket, BridgeCommand::Exit).await.unwrap();
        assert_eq!(server.await.unwrap(), Some("exit".to_string()));
    }

    #[tokio::test]
    async fn test_follow_parses_events_until_hangup() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(b"ready\n0\ngarbage\ninterrupted:1\n")
                .await
                .unwrap();
        });

        let mut seen = Vec::new();
        follow(&socket, |event| seen.push(event)).await.unwrap();
        assert_eq!(
            seen,
            vec![
                BridgeEvent::Ready,
                BridgeEvent::Deleted(0),
                BridgeEvent::Interrupted(1)
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_socket_is_connection_error() {
        let dir = TempDir::new().unwrap();
        let result = send_command(&dir.path().join("absent.sock"), BridgeCommand::Exit).await;
        assert!(matches!(result, Err(VoxError::BridgeConnection { .. })));
    }
}
