//! `GameApi` over HTTP/1 JSON.

use std::time::Duration;

use bytes::Bytes;
use engine::layout::PixelPoint;
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{
    ApiError, CheckReply, CreateGameReply, CreateGameRequest, FinishReply, GameApi, GameDetail,
    StageResult, wire,
};
use crate::model::GameId;

#[derive(Debug, Clone)]
pub struct HttpGameApi {
    client: Client<HttpConnector, Full<Bytes>>,
    base: String,
    timeout: Duration,
}

impl HttpGameApi {
    /// `base` is the API root, e.g. `http://127.0.0.1:8000/api/v1`.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Uri, ApiError> {
        format!("{}{path}", self.base)
            .parse()
            .map_err(|err| ApiError::Protocol(format!("invalid url: {err}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(Method::GET, path, None).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_vec(body)?;
        self.send(Method::POST, path, Some(body)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, ApiError> {
        let uri = self.url(path)?;
        debug!(%method, %uri, "request");

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|err| ApiError::Protocol(err.to_string()))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|err| ApiError::Transient(err.to_string()))?;
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|err| ApiError::Transient(err.to_string()))?
                .to_bytes();
            Ok::<_, ApiError>((status, bytes))
        };

        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ApiError::Transient(format!("no reply within {:?}", self.timeout)))??;

        debug!(status = status.as_u16(), len = bytes.len(), "response");
        if !status.is_success() {
            return Err(ApiError::from_status(
                status.as_u16(),
                &String::from_utf8_lossy(&bytes),
            ));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `/games/<id>` with the id percent-encoded as a single path segment.
fn game_path(game_id: &GameId) -> String {
    format!("/games/{}", urlencoding::encode(game_id.as_str()))
}

impl GameApi for HttpGameApi {
    async fn create_game(&self, request: &CreateGameRequest) -> Result<CreateGameReply, ApiError> {
        self.post_json("/games", request).await
    }

    async fn fetch_game(&self, game_id: &GameId) -> Result<GameDetail, ApiError> {
        let raw: wire::GameDetail = self
            .get_json(&game_path(game_id))
            .await?;
        GameDetail::try_from(raw)
    }

    async fn check(
        &self,
        game_id: &GameId,
        stage: u32,
        point: PixelPoint,
    ) -> Result<CheckReply, ApiError> {
        let raw: wire::CheckReply = self
            .post_json(
                &format!("{}/stages/{stage}/check", game_path(game_id)),
                &wire::CheckRequest {
                    x: point.x,
                    y: point.y,
                },
            )
            .await?;
        Ok(raw.into())
    }

    async fn complete_stage(
        &self,
        game_id: &GameId,
        stage: u32,
        play_time: Duration,
    ) -> Result<StageResult, ApiError> {
        let raw: wire::StageResult = self
            .post_json(
                &format!("{}/stages/{stage}/complete", game_path(game_id)),
                &play_time_body(play_time),
            )
            .await?;
        StageResult::try_from(raw)
    }

    async fn finish(&self, game_id: &GameId, play_time: Duration) -> Result<FinishReply, ApiError> {
        let raw: wire::FinishReply = self
            .post_json(
                &format!("{}/finish", game_path(game_id)),
                &play_time_body(play_time),
            )
            .await?;
        Ok(raw.into())
    }
}

fn play_time_body(play_time: Duration) -> wire::PlayTimeRequest {
    wire::PlayTimeRequest {
        play_time_milliseconds: play_time.as_millis().min(u64::MAX as u128) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_ids_are_escaped_as_one_segment() {
        assert_eq!(game_path(&GameId::new("42")), "/games/42");
        assert_eq!(game_path(&GameId::new("a b/c")), "/games/a%20b%2Fc");

        let api = HttpGameApi::new("http://localhost:8000/api/v1", Duration::from_secs(1));
        let path = format!("{}/finish", game_path(&GameId::new("x?y")));
        assert_eq!(
            api.url(&path).unwrap().to_string(),
            "http://localhost:8000/api/v1/games/x%3Fy/finish"
        );
    }

    #[test]
    fn trailing_slash_on_base_is_ignored() {
        let api = HttpGameApi::new("http://localhost:8000/api/v1/", Duration::from_secs(1));
        assert_eq!(api.base(), "http://localhost:8000/api/v1");
        assert_eq!(
            api.url("/games").unwrap().to_string(),
            "http://localhost:8000/api/v1/games"
        );
    }
}
