//! HTTP hub client
//!
//! JSON request/response calls plus the streamed control channel.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::transport::hub_endpoint;

use super::control::{ControlCommand, ControlDecoder};
use super::message::{
    DeclaredStream, RegisterRequest, RegisterResponse, RemoteStream, StateReport, StreamState,
    SyncRequest, SyncResponse, UnregisterRequest,
};
use super::{CommandStream, HubApi, PublisherIdentity};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USER_AGENT: &str = concat!("hall-publisher/", env!("CARGO_PKG_VERSION"));

/// HTTP implementation of [`HubApi`]
#[derive(Debug, Clone)]
pub struct HubClient {
    http: Client,
    request_timeout: Duration,
}

impl HubClient {
    /// Create a client with default timeouts
    pub fn new() -> Result<Self> {
        Self::with_options(DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT)
    }

    /// Create a client with a request timeout and user agent
    ///
    /// The timeout covers unary calls only; the control stream stays open
    /// for as long as the hub keeps it.
    pub fn with_options(request_timeout: Duration, user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            http,
            request_timeout,
        })
    }

    async fn post<B, T>(&self, base_url: &str, endpoint: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.post_raw(base_url, endpoint, body).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn post_raw<B>(&self, base_url: &str, endpoint: &str, body: &B) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = hub_endpoint(base_url, endpoint)?;
        let resp = self
            .http
            .post(url)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        check_status(resp).await
    }
}

#[async_trait]
impl HubApi for HubClient {
    async fn register(
        &self,
        base_url: &str,
        display_name: &str,
        client_id: &str,
    ) -> Result<PublisherIdentity> {
        let body = RegisterRequest {
            display_name,
            client_id,
        };
        let resp: RegisterResponse = self.post(base_url, "register", &body).await?;
        if resp.token.is_empty() {
            return Err(Error::protocol(200, "registration returned an empty token"));
        }

        tracing::info!(publisher_id = %resp.publisher_id, "Publisher registered");
        Ok(PublisherIdentity {
            publisher_id: resp.publisher_id,
            token: resp.token,
        })
    }

    async fn unregister(&self, base_url: &str, token: &str, client_id: &str) -> Result<()> {
        let body = UnregisterRequest { token, client_id };
        self.post_raw(base_url, "unregister", &body).await?;
        Ok(())
    }

    async fn report_stream_state(
        &self,
        base_url: &str,
        token: &str,
        stream_id: &str,
        state: StreamState,
    ) -> Result<()> {
        let body = StateReport {
            token,
            stream_id,
            state,
        };
        self.post_raw(base_url, "state", &body).await?;
        Ok(())
    }

    async fn sync_streams(
        &self,
        base_url: &str,
        token: &str,
        streams: &[DeclaredStream],
    ) -> Result<Vec<RemoteStream>> {
        let body = SyncRequest { token, streams };
        let resp: SyncResponse = self.post(base_url, "streams", &body).await?;
        Ok(resp.streams)
    }

    async fn subscribe_control(&self, base_url: &str, token: &str) -> Result<CommandStream> {
        let mut url = hub_endpoint(base_url, "control")?;
        url.query_pairs_mut().append_pair("token", token);

        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check_status(resp).await?;

        Ok(decode_command_stream(resp.bytes_stream()))
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.trim().to_string()
    };
    Err(Error::protocol(status.as_u16(), message))
}

struct DecodeState<E> {
    chunks: Pin<Box<dyn Stream<Item = std::result::Result<Bytes, E>> + Send>>,
    decoder: ControlDecoder,
    ready: VecDeque<ControlCommand>,
    done: bool,
}

/// Turn a stream of body chunks into a [`CommandStream`]
pub fn decode_command_stream<S, E>(chunks: S) -> CommandStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        decoder: ControlDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(cmd) = st.ready.pop_front() {
                return Some((Ok(cmd), st));
            }
            if st.done {
                return None;
            }
            match st.chunks.next().await {
                Some(Ok(chunk)) => {
                    let commands = st.decoder.push(&chunk);
                    st.ready.extend(commands);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(Error::Transport(e.to_string())), st));
                }
                None => {
                    st.done = true;
                    st.ready.extend(st.decoder.finish());
                }
            }
        }
    })
    .boxed()
}
