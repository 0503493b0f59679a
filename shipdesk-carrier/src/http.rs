use serde::de::DeserializeOwned;
use serde::Serialize;
use shipdesk_core::ProviderError;

const MAX_ERROR_BODY: usize = 512;

/// Posts JSON to operator-configured carrier endpoints.
///
/// Transport failures, non-2xx statuses, and undecodable bodies all map to
/// `ProviderError`; nothing here panics on carrier input.
#[derive(Clone)]
pub struct HttpEndpointClient {
    client: reqwest::Client,
}

impl HttpEndpointClient {
    pub fn new(user_agent: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProviderError::Unreachable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn post<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, ProviderError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport_error)?;

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&bytes).into_owned();
            if text.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
                text.truncate(cut);
            }
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(0)
    } else if e.is_decode() {
        ProviderError::Malformed(e.to_string())
    } else {
        ProviderError::Unreachable(e.to_string())
    }
}
