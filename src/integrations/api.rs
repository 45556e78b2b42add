use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Response,
};
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

use crate::{
    core::{
        event::Event,
        participant::{AttendanceResult, Participant},
        settings::{ApiRoutes, Settings},
    },
    error::ApiError,
};

/// Remote registration and attendance service.
#[async_trait]
pub trait ConsoleApi: Send + Sync {
    /// Records a check-in of `participant_id` for `event_id`.
    async fn create_attendance(&self, participant_id: &str, event_id: &str) -> Result<(), ApiError>;

    /// First attendance record of a participant, `NotFound` when there is none.
    async fn attendance_summary(&self, participant_id: &str) -> Result<AttendanceResult, ApiError>;

    async fn active_events(&self) -> Result<Vec<Event>, ApiError>;

    async fn participants(&self) -> Result<Vec<Participant>, ApiError>;

    async fn participant(&self, participant_id: &str) -> Result<Participant, ApiError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Turns a non-2xx response into `ApiError::Rejected`, preferring the
/// server's `{error}` text over `fallback`.
async fn check_response(response: Response, fallback: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| fallback.to_owned());

    Err(ApiError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// reqwest client for the console API.
///
/// The shared-secret header pair rides on every request as a default header.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base: String,
    routes: ApiRoutes,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if !settings.api_header_name.is_empty() && !settings.api_header_value.is_empty() {
            headers.insert(
                HeaderName::from_bytes(settings.api_header_name.as_bytes())?,
                HeaderValue::from_str(&settings.api_header_value)?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout())
            .build()?;

        // Validate early so a bad base url fails at startup
        Url::parse(&settings.api_url)?;

        Ok(Self {
            client,
            base: settings.api_url.trim_end_matches('/').to_owned(),
            routes: settings.routes.clone(),
            token: None,
        })
    }

    /// Sends `token` as a bearer credential on every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn url(&self, route: &str) -> Result<Url, ApiError> {
        let route = route.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{}", self.base, route))?)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, fallback: &str) -> Result<T, ApiError> {
        let response = self.get(url).send().await?;
        let response = check_response(response, fallback).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ConsoleApi for HttpApi {
    async fn create_attendance(&self, participant_id: &str, event_id: &str) -> Result<(), ApiError> {
        let url = self.url(&self.routes.attendance)?;
        let mut request = self.client.post(url).json(&serde_json::json!({
            "participant_id": participant_id,
            "event_id": event_id,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        check_response(response, "Unknown error").await?;
        Ok(())
    }

    async fn attendance_summary(&self, participant_id: &str) -> Result<AttendanceResult, ApiError> {
        let mut url = self.url(&self.routes.attendance_summary)?;
        url.query_pairs_mut()
            .append_pair("participant_id", participant_id);

        let records: Vec<AttendanceResult> = self.get_json(url, "Fetch failed").await?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound("Participant not found".to_owned()))
    }

    async fn active_events(&self) -> Result<Vec<Event>, ApiError> {
        let url = self.url(&self.routes.active_events)?;
        self.get_json(url, "Failed to fetch events").await
    }

    async fn participants(&self) -> Result<Vec<Participant>, ApiError> {
        let url = self.url(&self.routes.participants)?;
        self.get_json(url, "Failed to fetch participants").await
    }

    async fn participant(&self, participant_id: &str) -> Result<Participant, ApiError> {
        let route = self.routes.participant.replace("{id}", participant_id);
        let url = self.url(&route)?;

        let response = self.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound("Participant not found".to_owned()));
        }
        let response = check_response(response, "Failed to fetch participant").await?;
        Ok(response.json::<Participant>().await?)
    }
}
