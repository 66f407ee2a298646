use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::error::AppError;
use tracing::{debug, info, warn};

use crate::{
    pipeline::{parse_model_response, ExtractionOutcome},
    utils::llm_instructions::QUESTION_EXTRACTION_PROMPT,
};

const MAX_RESPONSE_TOKENS: u32 = 8192;

/// Sends exam documents to a vision-capable chat model and reads back
/// candidate questions.
pub struct QuestionExtractor {
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    model: String,
}

impl QuestionExtractor {
    pub fn new(
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            openai_client,
            model: model.into(),
        }
    }

    pub async fn extract(&self, document: &[u8]) -> Result<ExtractionOutcome, AppError> {
        info!(bytes = document.len(), model = %self.model, "requesting question extraction");
        let request = self.prepare_llm_request(document)?;
        self.perform_extraction(request).await
    }

    fn prepare_llm_request(&self, document: &[u8]) -> Result<CreateChatCompletionRequest, AppError> {
        let document_url = format!("data:application/pdf;base64,{}", STANDARD.encode(document));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(MAX_RESPONSE_TOKENS)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(vec![
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(document_url)
                                .detail(ImageDetail::High)
                                .build()?,
                        )
                        .build()?
                        .into(),
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(QUESTION_EXTRACTION_PROMPT)
                        .build()?
                        .into(),
                ])
                .build()?
                .into()])
            .build()?;

        Ok(request)
    }

    async fn perform_extraction(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<ExtractionOutcome, AppError> {
        let response = self.openai_client.chat().create(request).await?;

        let Some(content) = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
        else {
            warn!("model returned no text content; treating as zero candidates");
            return Ok(ExtractionOutcome::default());
        };

        debug!(chars = content.len(), "model response received");
        Ok(parse_model_response(content))
    }
}
