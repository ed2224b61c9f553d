use crate::router;
use crate::state::AppState;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use replay_core::ipc::{ReplayRequest, ReplayResponse};
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Frames are a 4-byte little-endian length prefix followed by a MessagePack body.
fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().little_endian().new_codec()
}

pub async fn run_unix_server(
    socket_path: &str,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let state = state.clone();
                tokio::spawn(async move {
                    serve_connection(stream, state).await;
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

async fn serve_connection(stream: UnixStream, state: Arc<AppState>) {
    let (read, write) = stream.into_split();
    let mut framed_read = FramedRead::new(read, codec());
    let mut framed_write = FramedWrite::new(write, codec());

    while let Some(frame) = framed_read.next().await {
        let bytes_mut = match frame {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Frame error: {}", e);
                break;
            }
        };

        let response = match rmp_serde::from_slice::<ReplayRequest>(&bytes_mut) {
            Ok(request) => router::handle_request(request, &state).await,
            Err(e) => ReplayResponse::err(format!("Deserialization error: {}", e)),
        };

        match rmp_serde::to_vec_named(&response) {
            Ok(resp_bytes) => {
                if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                    tracing::error!("Failed to send response: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize response: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::ReplayConfig;
    use replay_ingest::MemorySessionStore;

    async fn roundtrip(
        framed_read: &mut FramedRead<tokio::net::unix::OwnedReadHalf, LengthDelimitedCodec>,
        framed_write: &mut FramedWrite<tokio::net::unix::OwnedWriteHalf, LengthDelimitedCodec>,
        request: &ReplayRequest,
    ) -> ReplayResponse {
        let bytes = rmp_serde::to_vec_named(request).unwrap();
        framed_write.send(Bytes::from(bytes)).await.unwrap();
        let frame = framed_read.next().await.unwrap().unwrap();
        rmp_serde::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = std::env::temp_dir().join(format!("replay-ipc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let socket = dir.join("replay.sock");
        let socket_path = socket.to_string_lossy().to_string();

        let state = Arc::new(AppState::new(
            Arc::new(MemorySessionStore::new()),
            None,
            ReplayConfig::default(),
        ));
        let (tx, _rx) = broadcast::channel(1);
        let server = tokio::spawn({
            let socket_path = socket_path.clone();
            let shutdown = tx.subscribe();
            async move { run_unix_server(&socket_path, state, shutdown).await }
        });

        let mut stream = None;
        for _ in 0..50 {
            match UnixStream::connect(&socket).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }
        let (read, write) = stream.expect("server never bound").into_split();
        let mut framed_read = FramedRead::new(read, codec());
        let mut framed_write = FramedWrite::new(write, codec());

        let pong = roundtrip(&mut framed_read, &mut framed_write, &ReplayRequest::Ping).await;
        assert!(pong.is_ok());

        let missing = roundtrip(
            &mut framed_read,
            &mut framed_write,
            &ReplayRequest::Replay {
                session_id: "ghost".into(),
            },
        )
        .await;
        assert!(!missing.is_ok());

        // Garbage frame gets an error response, connection stays open.
        framed_write.send(Bytes::from_static(b"\xc1")).await.unwrap();
        let frame = framed_read.next().await.unwrap().unwrap();
        let resp: ReplayResponse = rmp_serde::from_slice(&frame).unwrap();
        assert!(resp.error.unwrap().contains("Deserialization"));

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(!socket.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
