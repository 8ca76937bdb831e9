use bytes::Bytes;
use futures_util::StreamExt;
use helpdesk_shared::{ChatMessage, ErrorResponse, CHAT_PATH};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What the reply stream delivers to the UI loop, in order. Every request
/// ends with exactly one `End` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(Bytes),
    End,
    Failed(String),
}

pub struct BackendClient {
    http: reqwest::Client,
    chat_url: String,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl BackendClient {
    pub fn new(base_url: &str) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            http: reqwest::Client::new(),
            chat_url: format!("{}{}", base_url.trim_end_matches('/'), CHAT_PATH),
            tx,
        };
        (client, rx)
    }

    /// Post `history` in the background; events arrive on the receiver
    /// returned by [`new`](Self::new).
    pub fn send_message(&self, history: Vec<ChatMessage>) {
        let http = self.http.clone();
        let url = self.chat_url.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            stream_chat(&http, &url, &history, &tx).await;
        });
    }
}

/// Post `history` and forward the reply body chunk by chunk.
///
/// The server cannot change the status once a reply is streaming, so a body
/// that breaks off before the chunked terminator is the only failure signal
/// after that point.
pub async fn stream_chat(
    http: &reqwest::Client,
    url: &str,
    history: &[ChatMessage],
    tx: &mpsc::UnboundedSender<StreamEvent>,
) {
    info!(messages = history.len(), "Sending chat request");

    let response = match http.post(url).json(history).send().await {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to reach server: {}", e);
            let _ = tx.send(StreamEvent::Failed(format!("could not reach server: {e}")));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let reason = match status {
            StatusCode::TOO_MANY_REQUESTS => {
                "rate limited: too many messages, try again in a minute".to_string()
            }
            _ => match response.json::<ErrorResponse>().await {
                Ok(body) => format!("server error ({}): {}", status.as_u16(), body.error),
                Err(_) => format!("server error ({})", status.as_u16()),
            },
        };
        warn!(status = status.as_u16(), "Chat request rejected");
        let _ = tx.send(StreamEvent::Failed(reason));
        return;
    }

    let mut body = response.bytes_stream();
    let mut received = 0usize;
    while let Some(item) = body.next().await {
        match item {
            Ok(bytes) => {
                received += bytes.len();
                if tx.send(StreamEvent::Chunk(bytes)).is_err() {
                    debug!("Receiver dropped, abandoning reply");
                    return;
                }
            }
            Err(e) => {
                error!(received, "Reply stream broke off: {}", e);
                let _ = tx.send(StreamEvent::Failed(format!("reply interrupted: {e}")));
                return;
            }
        }
    }

    debug!(received, "Reply stream finished");
    let _ = tx.send(StreamEvent::End);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChatSession, ReplyState};
    use helpdesk_shared::FALLBACK_ERROR_MESSAGE;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn collect_events(url: &str, history: &[ChatMessage]) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        stream_chat(&reqwest::Client::new(), url, history, &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn replay(events: &[StreamEvent]) -> ChatSession {
        let mut session = ChatSession::new();
        session.submit("Hi").unwrap();
        for event in events {
            match event {
                StreamEvent::Chunk(bytes) => session.on_chunk(bytes),
                StreamEvent::End => session.on_end(),
                StreamEvent::Failed(reason) => session.on_error(reason.clone()),
            }
        }
        session
    }

    #[tokio::test]
    async fn streamed_reply_ends_with_end_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(serde_json::json!([
                {"role": "user", "content": "Hi"}
            ])))
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("Hello")
            .create_async()
            .await;

        let url = format!("{}/api/chat", server.url());
        let events = collect_events(&url, &[ChatMessage::user("Hi")]).await;

        mock.assert_async().await;
        assert_eq!(events.last(), Some(&StreamEvent::End));

        let session = replay(&events);
        assert_eq!(session.messages().last().unwrap().content, "Hello");
        assert_eq!(session.state(), &ReplyState::Complete);
    }

    #[tokio::test]
    async fn rate_limited_request_fails_without_chunks() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(429)
            .create_async()
            .await;

        let url = format!("{}/api/chat", server.url());
        let events = collect_events(&url, &[ChatMessage::user("Hi")]).await;

        mock.assert_async().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Failed(reason) if reason.starts_with("rate limited")));

        let session = replay(&events);
        assert_eq!(session.messages().last().unwrap().content, FALLBACK_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn server_error_message_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"backend request failed: overloaded"}"#)
            .create_async()
            .await;

        let url = format!("{}/api/chat", server.url());
        let events = collect_events(&url, &[ChatMessage::user("Hi")]).await;

        assert_eq!(
            events,
            vec![StreamEvent::Failed(
                "server error (500): backend request failed: overloaded".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn unreachable_server_fails() {
        let events = collect_events("http://127.0.0.1:1/api/chat", &[]).await;
        assert!(matches!(events.as_slice(), [StreamEvent::Failed(_)]));
    }

    /// Serves one chunked reply that stops after `Par` without a terminator.
    async fn broken_stream_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      content-type: text/plain\r\n\
                      transfer-encoding: chunked\r\n\r\n\
                      3\r\nPar\r\n",
                )
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        format!("http://{addr}/api/chat")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    #[tokio::test]
    async fn abrupt_close_is_reported_as_failure() {
        let url = broken_stream_server().await;
        let events = collect_events(&url, &[ChatMessage::user("Hi")]).await;

        assert_eq!(events[0], StreamEvent::Chunk(Bytes::from_static(b"Par")));
        assert!(matches!(events.last(), Some(StreamEvent::Failed(_))));

        let session = replay(&events);
        assert_eq!(session.messages().last().unwrap().content, "Par");
        assert!(matches!(session.state(), ReplyState::Failed(_)));
    }
}
