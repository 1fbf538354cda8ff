use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::recorder::Recorder;

/// A streaming backend under test. Implementations stream generated text
/// into the recorder via `add_token` and report completion or failure; they
/// must not touch any other recorder lifecycle method.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn stream(&self, rec: &mut Recorder) -> Result<()>;
}

/// OpenAI-compatible `/v1/chat/completions` streaming executor.
pub struct ChatCompletions {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl ChatCompletions {
    pub fn try_new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to construct HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            api_key,
            request_timeout: Duration::from_secs(60),
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        if !request_timeout.is_zero() {
            self.request_timeout = request_timeout;
        }
        self
    }
}

#[async_trait]
impl Executor for ChatCompletions {
    async fn stream(&self, rec: &mut Recorder) -> Result<()> {
        let request = ChatRequest {
            model: &self.model,
            stream: true,
            messages: vec![Message {
                role: "user",
                content: &rec.prompt,
            }],
        };

        let mut builder = self
            .client
            .post(&self.url)
            .timeout(self.request_timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let mut source = EventSource::new(builder).context("failed to open event stream")?;

        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }
                    let chunk: ChatChunk = serde_json::from_str(&msg.data)
                        .with_context(|| format!("unparseable stream chunk: {}", msg.data))?;
                    if let Some(choice) = chunk.choices.first() {
                        if let Some(delta) = &choice.delta {
                            rec.add_token(delta.content.as_deref());
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(err) => {
                    source.close();
                    return Err(err).context("event stream failed");
                }
            }
        }

        source.close();
        Ok(())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}
