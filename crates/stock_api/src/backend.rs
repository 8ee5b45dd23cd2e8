//! REST and streaming implementations of every store contract.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chat_contract::{
    AgentConfig, AgentStore, BindingPatch, BindingStore, CapabilityRegistry, ChatError,
    ChatSession, CompositionResult, FrameStream, PreviewRequest, ResourceKind, SessionDetail,
    SessionStore, Skill, SkillBinding, SkillCategory, SkillFilter, Tool, TurnRequest,
    TurnTransport,
};
use futures_util::stream::{self, StreamExt};
use reqwest::{Method, Response};
use tracing::debug;

use crate::client::StockApiClient;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::payload::{
    binding_patch_body, BindRequest, ContentUpdate, DeletedCount, Listing, TitleUpdate,
};
use crate::sse::FrameParser;

/// Store and turn channel backed by the platform's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Arc<StockApiClient>,
}

impl HttpBackend {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        Ok(Self::from_client(StockApiClient::new(config)?))
    }

    pub fn from_client(client: StockApiClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &StockApiClient {
        &self.client
    }
}

fn not_found_as(kind: ResourceKind, id: &str) -> impl FnOnce(ApiError) -> ChatError + '_ {
    move |error| error.into_chat_error(Some((kind, id)))
}

/// Adapts a streaming response body into parsed frames.
///
/// Read failures surface once as `Transport` and end the stream.
pub fn frame_stream(response: Response) -> FrameStream {
    let state = (
        Box::pin(response.bytes_stream()),
        FrameParser::default(),
        VecDeque::new(),
        false,
    );

    stream::unfold(state, |(mut bytes, mut parser, mut pending, mut finished)| async move {
        loop {
            if let Some(frame) = pending.pop_front() {
                return Some((frame, (bytes, parser, pending, finished)));
            }
            if finished {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => pending.extend(parser.feed(&chunk)),
                Some(Err(error)) => {
                    parser.finish();
                    finished = true;
                    pending.push_back(Err(ChatError::transport(format!(
                        "stream read failed: {error}"
                    ))));
                }
                None => {
                    parser.finish();
                    finished = true;
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl TurnTransport for HttpBackend {
    async fn open_turn(&self, request: TurnRequest) -> Result<FrameStream, ChatError> {
        let response = self
            .client
            .open_stream(&["chat", "stream"], &request)
            .await
            .map_err(|error| match request.session_id.as_deref() {
                Some(session_id) => {
                    error.into_chat_error(Some((ResourceKind::Session, session_id)))
                }
                None => error.into(),
            })?;
        debug!(status = %response.status(), "turn stream opened");
        Ok(frame_stream(response))
    }
}

#[async_trait]
impl CapabilityRegistry for HttpBackend {
    async fn list_tools(&self, include_config: bool) -> Result<Vec<Tool>, ChatError> {
        let listing: Listing<Tool> = self
            .client
            .get_json(&["tools"], &[("include_config", include_config.to_string())])
            .await?;
        Ok(listing.into_vec())
    }

    async fn list_skills(&self, filter: &SkillFilter) -> Result<Vec<Skill>, ChatError> {
        let mut query = vec![("include_builtin", filter.include_builtin.to_string())];
        if let Some(category) = &filter.category {
            query.push(("category", category.clone()));
        }
        let listing: Listing<Skill> = self.client.get_json(&["skills"], &query).await?;
        Ok(listing.into_vec())
    }

    async fn list_skill_categories(&self) -> Result<Vec<SkillCategory>, ChatError> {
        let listing: Listing<SkillCategory> = self
            .client
            .get_json(&["skills", "categories"], &[])
            .await?;
        Ok(listing.into_vec())
    }

    async fn preview(&self, request: &PreviewRequest) -> Result<CompositionResult, ChatError> {
        Ok(self
            .client
            .send_json(Method::POST, &["skills", "preview"], &[], Some(request))
            .await?)
    }
}

#[async_trait]
impl BindingStore for HttpBackend {
    async fn list_bindings(&self, agent_id: &str) -> Result<Vec<SkillBinding>, ChatError> {
        let listing: Listing<SkillBinding> = self
            .client
            .get_json(&["agents", agent_id, "skills"], &[])
            .await
            .map_err(not_found_as(ResourceKind::Agent, agent_id))?;
        Ok(listing.into_vec())
    }

    async fn bind(
        &self,
        agent_id: &str,
        skill_id: &str,
        enabled: bool,
        prompt_override: Option<String>,
    ) -> Result<SkillBinding, ChatError> {
        let body = BindRequest {
            skill_id,
            is_enabled: enabled,
            custom_prompt_override: prompt_override.as_deref(),
        };
        self.client
            .send_json(Method::POST, &["agents", agent_id, "skills"], &[], Some(&body))
            .await
            .map_err(not_found_as(ResourceKind::Skill, skill_id))
    }

    async fn update_binding(
        &self,
        agent_id: &str,
        binding_id: &str,
        patch: BindingPatch,
    ) -> Result<SkillBinding, ChatError> {
        let body = binding_patch_body(&patch);
        self.client
            .send_json(
                Method::PUT,
                &["agents", agent_id, "skills", binding_id],
                &[],
                Some(&body),
            )
            .await
            .map_err(not_found_as(ResourceKind::Binding, binding_id))
    }

    async fn unbind(&self, agent_id: &str, binding_id: &str) -> Result<(), ChatError> {
        self.client
            .send_no_content(Method::DELETE, &["agents", agent_id, "skills", binding_id], &[])
            .await
            .map_err(not_found_as(ResourceKind::Binding, binding_id))
    }
}

#[async_trait]
impl AgentStore for HttpBackend {
    async fn list_agents(&self) -> Result<Vec<AgentConfig>, ChatError> {
        let listing: Listing<AgentConfig> = self.client.get_json(&["agents"], &[]).await?;
        Ok(listing.into_vec())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentConfig, ChatError> {
        self.client
            .get_json(&["agents", agent_id], &[])
            .await
            .map_err(not_found_as(ResourceKind::Agent, agent_id))
    }

    async fn create_agent(&self, agent: &AgentConfig) -> Result<AgentConfig, ChatError> {
        Ok(self
            .client
            .send_json(Method::POST, &["agents"], &[], Some(agent))
            .await?)
    }

    async fn update_agent(&self, agent: &AgentConfig) -> Result<AgentConfig, ChatError> {
        self.client
            .send_json(Method::PUT, &["agents", &agent.id], &[], Some(agent))
            .await
            .map_err(not_found_as(ResourceKind::Agent, &agent.id))
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), ChatError> {
        self.get_agent(agent_id).await?.ensure_deletable()?;
        self.client
            .send_no_content(Method::DELETE, &["agents", agent_id], &[])
            .await
            .map_err(not_found_as(ResourceKind::Agent, agent_id))
    }
}

#[async_trait]
impl SessionStore for HttpBackend {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, ChatError> {
        let listing: Listing<ChatSession> = self.client.get_json(&["chat", "sessions"], &[]).await?;
        Ok(listing.into_vec())
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDetail, ChatError> {
        self.client
            .get_json(&["chat", "sessions", session_id], &[])
            .await
            .map_err(not_found_as(ResourceKind::Session, session_id))
    }

    async fn update_session(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<ChatSession, ChatError> {
        self.client
            .send_json(
                Method::PUT,
                &["chat", "sessions", session_id],
                &[],
                Some(&TitleUpdate { title }),
            )
            .await
            .map_err(not_found_as(ResourceKind::Session, session_id))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        self.client
            .send_no_content(Method::DELETE, &["chat", "sessions", session_id], &[])
            .await
            .map_err(not_found_as(ResourceKind::Session, session_id))
    }

    async fn update_message(
        &self,
        session_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ChatError> {
        let _: Option<serde_json::Value> = self
            .client
            .send_json(
                Method::PUT,
                &["chat", "sessions", session_id, "messages", message_id],
                &[],
                Some(&ContentUpdate { content }),
            )
            .await
            .map_err(not_found_as(ResourceKind::Message, message_id))?;
        Ok(())
    }

    async fn delete_messages_after(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<u32, ChatError> {
        let deleted: Option<DeletedCount> = self
            .client
            .send_json(
                Method::DELETE,
                &["chat", "sessions", session_id, "messages"],
                &[("after", message_id.to_string())],
                None::<&serde_json::Value>,
            )
            .await
            .map_err(not_found_as(ResourceKind::Message, message_id))?;
        Ok(deleted.unwrap_or_default().deleted)
    }
}
