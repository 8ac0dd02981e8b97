use anyhow::{Context, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::connection::{
    LivenessFlag, RecognizerConnector, RecognizerEvent, RecognizerLink, RecognizerOptions,
    RecognizerSink,
};
use super::messages::{parse_stream_message, CLOSE_STREAM, KEEP_ALIVE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Event channel depth per connection
const EVENT_BUFFER: usize = 256;

/// Deepgram streaming speech-to-text over WebSocket
pub struct DeepgramConnector {
    api_key: String,
    listen_url: String,
}

impl DeepgramConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            listen_url: DEFAULT_LISTEN_URL.to_string(),
        }
    }

    pub fn with_listen_url(mut self, url: impl Into<String>) -> Self {
        self.listen_url = url.into();
        self
    }

    /// Listen URL with the options encoded as query parameters
    pub fn request_url(&self, options: &RecognizerOptions) -> String {
        format!(
            "{}?model={}&language={}&encoding={}&sample_rate={}&channels={}\
             &punctuate={}&interim_results={}&utterance_end_ms={}&vad_events={}&endpointing={}",
            self.listen_url,
            options.model,
            options.language,
            options.encoding_name(),
            options.sample_rate,
            options.channels,
            options.punctuate,
            options.interim_results,
            options.utterance_end_ms,
            options.vad_events,
            options.endpointing_ms,
        )
    }
}

#[async_trait::async_trait]
impl RecognizerConnector for DeepgramConnector {
    async fn connect(&self, options: &RecognizerOptions) -> Result<RecognizerLink> {
        let url = self.request_url(options);
        let mut request = url
            .as_str()
            .into_client_request()
            .context("Invalid recognizer URL")?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .context("Recognizer API key is not a valid header value")?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _response) = connect_async(request)
            .await
            .with_context(|| format!("Recognizer handshake failed: {}", self.listen_url))?;
        info!("Connected to recognizer: {}", self.listen_url);

        let (writer, reader) = socket.split();
        let live = LivenessFlag::live();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(read_events(reader, tx, live.clone()));

        Ok(RecognizerLink {
            sink: Box::new(DeepgramSink { writer }),
            events: rx,
            live,
        })
    }

    fn name(&self) -> &str {
        "deepgram"
    }
}

/// Reader half: turns socket messages into events until the socket ends
async fn read_events(
    mut reader: futures::stream::SplitStream<WsStream>,
    tx: mpsc::Sender<RecognizerEvent>,
    live: LivenessFlag,
) {
    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(event) = parse_stream_message(&text) {
                    if tx.send(event).await.is_err() {
                        // Bridge dropped this connection
                        return;
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                live.clear();
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                let _ = tx.send(RecognizerEvent::Closed { reason }).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                live.clear();
                let _ = tx.send(RecognizerEvent::Error(e.to_string())).await;
                return;
            }
        }
    }

    live.clear();
    debug!("Recognizer stream ended");
    let _ = tx.send(RecognizerEvent::Closed { reason: None }).await;
}

struct DeepgramSink {
    writer: SplitSink<WsStream, Message>,
}

#[async_trait::async_trait]
impl RecognizerSink for DeepgramSink {
    async fn send_audio(&mut self, audio: &[u8]) -> Result<()> {
        self.writer
            .send(Message::Binary(audio.to_vec()))
            .await
            .context("Failed to send audio to recognizer")
    }

    async fn keep_alive(&mut self) -> Result<()> {
        self.writer
            .send(Message::Text(KEEP_ALIVE.to_string()))
            .await
            .context("Failed to send recognizer keep-alive")
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer
            .send(Message::Text(CLOSE_STREAM.to_string()))
            .await
            .context("Failed to send recognizer close")?;
        self.writer
            .close()
            .await
            .context("Failed to close recognizer socket")
    }
}
