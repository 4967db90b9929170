//! Wraps a concrete `sa_providers::LlmProvider` as dialog-core's
//! [`sa_dialog_core::contract::DialogLlmProvider`] seam (§6 AMBIENT:
//! "a thin pass-through, since the shapes already match").

use std::sync::Arc;

use async_trait::async_trait;
use sa_dialog_core::contract::DialogLlmProvider;
use sa_domain::stream::{BoxStream, StreamEvent};
use sa_providers::traits::{ChatRequest, LlmProvider};

pub struct ProviderAdapter {
    inner: Arc<dyn LlmProvider>,
}

impl ProviderAdapter {
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DialogLlmProvider for ProviderAdapter {
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> sa_domain::error::Result<BoxStream<'static, sa_domain::error::Result<StreamEvent>>> {
        self.inner.chat_stream(request).await
    }
}
