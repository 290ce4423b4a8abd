//! DeepDAO REST client (api.deepdao.io).
//!
//! Responses stay untyped: the organization and governance endpoints change
//! shape often and downstream analysis treats them as schema-less records
//! anyway.

use anyhow::Result;
use format_url::FormatUrl;
use serde_json::Value;

const DEEPDAO_API: &str = "https://api.deepdao.io/v0.1";

pub struct DeepdaoClient {
    server_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl DeepdaoClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::new_with_url(DEEPDAO_API, api_key)
    }

    pub fn new_with_url(server_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = FormatUrl::new(&self.server_url)
            .with_path_template(&format!("/{path}"))
            .with_query_params(params.to_vec())
            .format_url();
        let body = self
            .client
            .get(url)
            .header("x-api-key", &self.api_key)
            .header("accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(body)
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = FormatUrl::new(&self.server_url)
            .with_path_template(&format!("/{path}"))
            .format_url();
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("accept", "application/json")
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(response)
    }

    /// Organizations listing, one page of `limit` rows from `offset`.
    pub async fn get_organizations(&self, limit: u64, offset: u64) -> Result<Value> {
        let limit = limit.to_string();
        let offset = offset.to_string();
        self.get(
            "organizations",
            &[("limit", limit.as_str()), ("offset", offset.as_str())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn get_sends_api_key_header() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/organizations")
            .match_header("x-api-key", "dd-key")
            .match_query(mockito::Matcher::UrlEncoded(
                "limit".to_string(),
                "10".to_string(),
            ))
            .with_status(200)
            .with_body(json!({ "data": { "resources": [] } }).to_string())
            .create_async()
            .await;

        let client = DeepdaoClient::new_with_url(&server.url(), "dd-key");
        let body = client.get_organizations(10, 0).await.unwrap();
        assert!(body["data"]["resources"].is_array());
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/organizations/search")
            .match_header("x-api-key", "dd-key")
            .match_body(mockito::Matcher::Json(json!({ "name": "uniswap" })))
            .with_status(200)
            .with_body(json!({ "data": [] }).to_string())
            .create_async()
            .await;

        let client = DeepdaoClient::new_with_url(&server.url(), "dd-key");
        let body = client
            .post("organizations/search", &json!({ "name": "uniswap" }))
            .await
            .unwrap();
        assert!(body["data"].is_array());
    }

    #[tokio::test]
    async fn non_2xx_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/organizations")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let client = DeepdaoClient::new_with_url(&server.url(), "bad-key");
        assert!(client.get("organizations", &[]).await.is_err());
    }
}
