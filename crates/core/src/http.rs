use crate::error::FetchError;
use anyhow::Context;
use serde_json::Value;
use std::time::Duration;

pub(crate) fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build http client")
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Sends the request and returns the JSON body of a 2xx response.
pub(crate) async fn get_json(
    req: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<Value, FetchError> {
    let res = req
        .send()
        .await
        .map_err(|err| FetchError::from_transport(err, timeout))?;

    let status = res.status();
    let text = res
        .text()
        .await
        .map_err(|err| FetchError::from_transport(err, timeout))?;

    if !status.is_success() {
        return Err(FetchError::from_status(status, &text));
    }

    serde_json::from_str::<Value>(&text)
        .map_err(|err| FetchError::Malformed(format!("response is not valid JSON: {err}")))
}
