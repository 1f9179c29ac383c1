use std::sync::Arc;
use tracing::{debug, info};

use crate::config::TitleConfig;
use crate::error::Result;
use crate::llm::{GenerateRequest, Transport};
use crate::prompts::render_title_prompt;

/// Asks the model for a conversation title with one non-streaming call.
#[derive(Clone)]
pub struct TitleGenerator {
    transport: Arc<dyn Transport>,
    model: String,
    template: String,
}

impl TitleGenerator {
    pub fn new(transport: Arc<dyn Transport>, model: impl Into<String>, config: &TitleConfig) -> Self {
        Self {
            transport,
            model: model.into(),
            template: config.template.clone(),
        }
    }

    pub fn request_for(&self, seed: &str) -> GenerateRequest {
        let prompt = render_title_prompt(&self.template, seed);
        GenerateRequest::new(&self.model, &prompt, &[], false)
    }

    /// The title exactly as the model returned it.
    pub async fn generate(&self, seed: &str) -> Result<String> {
        let request = self.request_for(seed);
        debug!(model = %self.model, "requesting conversation title");
        let record = self.transport.generate(&request).await?;
        info!(title = %record.response, "generated conversation title");
        Ok(record.response)
    }
}
