//! # Vision-language backend
//!
//! Sends prompts, optionally with images, to an OpenAI compatible
//! chat-completions endpoint serving a LLaVA-style model (llama.cpp server,
//! vLLM, Ollama, ...). Nothing is loaded in-process: the model lives behind
//! the server configured by `api_base`.
//!
//! Images are read from disk and inlined as `data:` URLs, one `image_url`
//! content part per image, followed by the prompt as a text part.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
    },
};
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

/// A model that can answer prompts about zero or more images.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Answer `prompt`, looking at `image_paths` when any are given.
    async fn chat(&self, prompt: &str, image_paths: &[PathBuf]) -> Result<String>;

    /// Produce a caption for a single image.
    async fn caption(&self, image_path: &Path) -> Result<String>;
}

/// Backend talking to an OpenAI compatible server through `async-openai`.
pub struct OpenAiVisionBackend {
    client: Client<OpenAIConfig>,
    config: GatewayConfig,
}

/// Creates a new OpenAI API client from configuration.
fn create_client(config: &GatewayConfig) -> Result<Client<OpenAIConfig>> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("Client created with api base {}", config.api_base);

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

    Ok(Client::with_config(openai_config).with_http_client(http_client))
}

/// Read an image and encode it as a `data:<mime>;base64,...` URL.
pub async fn image_data_url(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", mime.essence_str(), encoded))
}

impl OpenAiVisionBackend {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
            config: config.clone(),
        })
    }

    async fn user_content(
        &self,
        prompt: &str,
        image_paths: &[PathBuf],
    ) -> Result<ChatCompletionRequestUserMessageContent> {
        if image_paths.is_empty() {
            return Ok(ChatCompletionRequestUserMessageContent::Text(
                prompt.to_string(),
            ));
        }

        let mut parts = Vec::with_capacity(image_paths.len() + 1);
        for path in image_paths {
            match image_data_url(path).await {
                Ok(url) => parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url,
                            detail: Some(ImageDetail::Auto),
                        },
                    },
                )),
                Err(e) => warn!("Error loading image {}: {}", path.display(), e),
            }
        }

        if parts.is_empty() {
            return Err(GatewayError::Inference("Could not process images".into()));
        }

        parts.push(ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartText {
                text: prompt.to_string(),
            },
        ));
        Ok(ChatCompletionRequestUserMessageContent::Array(parts))
    }

    #[allow(deprecated)]
    async fn build_request(
        &self,
        prompt: &str,
        image_paths: &[PathBuf],
    ) -> Result<CreateChatCompletionRequest> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = &self.config.system_prompt {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(system_prompt.clone()),
                    name: None,
                },
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: self.user_content(prompt, image_paths).await?,
                name: None,
            },
        ));

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.config.model.clone())
            .max_tokens(self.config.max_tokens)
            .temperature(self.config.effective_temperature())
            .messages(messages)
            .build()?;
        Ok(request)
    }
}

#[async_trait]
impl VisionBackend for OpenAiVisionBackend {
    async fn chat(&self, prompt: &str, image_paths: &[PathBuf]) -> Result<String> {
        let request = self.build_request(prompt, image_paths).await?;
        debug!(
            "Sending chat request to {} with {} image(s)",
            self.config.model,
            image_paths.len()
        );

        let response = self.client.chat().create(request).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GatewayError::Inference("No assistant response".into()))?;
        Ok(text.trim().to_string())
    }

    async fn caption(&self, image_path: &Path) -> Result<String> {
        self.chat(&self.config.caption_prompt, &[image_path.to_path_buf()])
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Canned backend that records what it was asked.
    #[derive(Default)]
    pub struct FakeBackend {
        pub calls: Mutex<Vec<(String, Vec<PathBuf>)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl VisionBackend for FakeBackend {
        async fn chat(&self, prompt: &str, image_paths: &[PathBuf]) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), image_paths.to_vec()));
            if self.fail {
                return Err(GatewayError::Inference("model offline".into()));
            }
            Ok(format!("answer to '{prompt}' with {} image(s)", image_paths.len()))
        }

        async fn caption(&self, image_path: &Path) -> Result<String> {
            let stem = image_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .replace(['_', '-'], " ");
            self.chat("caption", &[image_path.to_path_buf()]).await?;
            Ok(format!("a photo of {stem}"))
        }
    }
}
