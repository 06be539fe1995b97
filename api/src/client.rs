//! Thin reqwest client for the instancer API, used by the CLI subcommands.

use anyhow::{Context, Result, bail};

pub struct InstancerClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl InstancerClient {
    pub fn new(endpoint: &str, token: Option<String>) -> Self {
        Self {
            base: endpoint.trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    pub async fn health(&self) -> Result<()> {
        let resp = self
            .request(reqwest::Method::GET, "/healthz")
            .send()
            .await
            .context("health request failed")?;
        if !resp.status().is_success() {
            bail!("unhealthy: {}", resp.status());
        }
        Ok(())
    }

    pub async fn get_challenge(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/admin/challenges/{id}"),
            )
            .send()
            .await
            .context("get challenge request failed")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("get challenge failed: {}", resp.status());
        }
        Ok(Some(resp.json().await?))
    }

    pub async fn delete_challenge(&self, id: &str) -> Result<bool> {
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("/api/v1/admin/challenges/{id}"),
            )
            .send()
            .await
            .context("delete challenge request failed")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            bail!("delete challenge failed: {}", resp.status());
        }
        Ok(true)
    }

    pub async fn list_challenges(&self) -> Result<serde_json::Value> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/challenges")
            .send()
            .await
            .context("list challenges request failed")?;
        if !resp.status().is_success() {
            bail!("list challenges failed: {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}
