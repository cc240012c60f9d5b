// src/utils/http.rs

//! HTTP client utilities.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::models::FetchConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_client(config: &FetchConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .build()?;
    Ok(client)
}

/// GET a URL and decode a JSON body. Non-2xx statuses are errors.
pub async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}

/// Like [`get_json`], but maps `404 Not Found` to `None`.
pub async fn get_json_optional<T: DeserializeOwned>(client: &Client, url: &str) -> Result<Option<T>> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    Ok(Some(response.error_for_status()?.json().await?))
}
