use std::env;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;

use course_core::model::{ChatMessage, ChatReference, CourseId, LessonDocument, LessonId, ModuleId};

use crate::auth::AuthService;
use crate::error::{AuthError, ChatError, ContentError};

/// One-shot lesson API: content fetch on selection and the completion
/// mutation. Implemented over HTTP by [`ApiClient`]; tests stub it.
#[async_trait]
pub trait LessonContentApi: Send + Sync {
    /// Fetch the full form of a lesson.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` for any non-success status or malformed body;
    /// callers treat both the same way (content stays empty).
    async fn fetch_lesson(
        &self,
        course_id: &CourseId,
        module_id: ModuleId,
        lesson_id: LessonId,
    ) -> Result<LessonDocument, ContentError>;

    /// Signal that a lesson's completion criterion has been satisfied.
    /// Fire-and-forget from the core's perspective: not retried here,
    /// surfaced for an optional retry UI.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` if the mutation cannot be delivered.
    async fn complete_lesson(
        &self,
        course_id: &CourseId,
        module_id: ModuleId,
        lesson_id: LessonId,
    ) -> Result<(), ContentError>;
}

/// Chunked byte stream of the assistant's reply, terminated by stream close.
pub type ChatByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// Streamed chat exchange: full transcript plus lesson reference in, UTF-8
/// chunks out.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open one streamed exchange.
    ///
    /// # Errors
    ///
    /// Returns `ChatError` for transport failures or a failing status.
    async fn open_exchange(
        &self,
        transcript: &[ChatMessage],
        reference: &ChatReference,
    ) -> Result<ChatByteStream, ChatError>;
}

/// Backend endpoint configuration.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
}

impl ApiConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        let base_url = env::var("COURSE_API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:5000/api".into());
        Self { base_url }
    }
}

/// HTTP client for the course backend.
///
/// Every request carries a bearer credential; a 401 response is retried
/// exactly once after a forced token refresh (concurrent 401s share one
/// refresh via [`AuthService`]).
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    auth: AuthService,
}

enum RequestError {
    Auth(AuthError),
    Http(reqwest::Error),
}

impl From<AuthError> for RequestError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

impl From<RequestError> for ContentError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Auth(e) => ContentError::Auth(e),
            RequestError::Http(e) => ContentError::Http(e),
        }
    }
}

impl From<RequestError> for ChatError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Auth(e) => ChatError::Auth(e),
            RequestError::Http(e) => ChatError::Http(e),
        }
    }
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    messages: &'a [ChatMessage],
    reference: &'a ChatReference,
}

impl ApiClient {
    #[must_use]
    pub fn new(config: ApiConfig, auth: AuthService) -> Self {
        Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn lesson_url(&self, course_id: &CourseId, module_id: ModuleId, lesson_id: LessonId) -> String {
        format!(
            "{}/courses/{}/modules/{}/lessons/{}",
            self.base_url, course_id, module_id, lesson_id
        )
    }

    async fn send_authorized(&self, request: RequestBuilder) -> Result<Response, RequestError> {
        let token = self.auth.token(false).await?;
        // Streaming bodies cannot be cloned; those requests simply skip the
        // one 401 retry.
        let retry = request.try_clone();
        let response = request.bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(retry) = retry {
                let fresh = self.auth.token(true).await?;
                return Ok(retry.bearer_auth(fresh).send().await?);
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl LessonContentApi for ApiClient {
    async fn fetch_lesson(
        &self,
        course_id: &CourseId,
        module_id: ModuleId,
        lesson_id: LessonId,
    ) -> Result<LessonDocument, ContentError> {
        let url = self.lesson_url(course_id, module_id, lesson_id);
        let response = self.send_authorized(self.http.get(url)).await?;
        if !response.status().is_success() {
            return Err(ContentError::HttpStatus(response.status()));
        }
        let body = response.bytes().await?;
        let document: LessonDocument = serde_json::from_slice(&body)?;
        document.validate()?;
        Ok(document)
    }

    async fn complete_lesson(
        &self,
        course_id: &CourseId,
        module_id: ModuleId,
        lesson_id: LessonId,
    ) -> Result<(), ContentError> {
        let url = format!(
            "{}/complete",
            self.lesson_url(course_id, module_id, lesson_id)
        );
        let response = self.send_authorized(self.http.post(url)).await?;
        if !response.status().is_success() {
            return Err(ContentError::HttpStatus(response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for ApiClient {
    async fn open_exchange(
        &self,
        transcript: &[ChatMessage],
        reference: &ChatReference,
    ) -> Result<ChatByteStream, ChatError> {
        let body = ChatRequestBody {
            messages: transcript,
            reference,
        };
        let request = self.http.post(format!("{}/chat", self.base_url)).json(&body);
        let response = self.send_authorized(request).await?;
        if !response.status().is_success() {
            return Err(ChatError::HttpStatus(response.status()));
        }
        Ok(Box::pin(response.bytes_stream().map_err(ChatError::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_local_backend() {
        let config = ApiConfig::from_env();
        assert!(!config.base_url.is_empty());
    }

    #[test]
    fn lesson_url_follows_the_rest_hierarchy() {
        let auth = AuthService::new(std::sync::Arc::new(NoAuth));
        let client = ApiClient::new(ApiConfig::new("https://api.test/"), auth);
        assert_eq!(
            client.lesson_url(&CourseId::new("c1"), ModuleId::new(2), LessonId::new(3)),
            "https://api.test/courses/c1/modules/2/lessons/3"
        );
    }

    struct NoAuth;

    #[async_trait]
    impl crate::auth::TokenProvider for NoAuth {
        async fn fetch_token(&self, _force_refresh: bool) -> Result<String, AuthError> {
            Ok("t".into())
        }
    }
}
