use reqwest::{Client, StatusCode, header};

/// Client for the rules endpoints of the multi-tenant API gateway.
#[derive(Clone)]
pub struct RulesApiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug)]
pub struct RulesApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RulesApiClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn logs_rules_url(&self, tenant: &str) -> String {
        format!(
            "{}/api/logs/v1/{tenant}/loki/api/v1/rules/{tenant}",
            self.base_url
        )
    }

    /// Push one YAML-encoded rule group into the tenant's logs rules
    /// namespace. Non-2xx answers are returned, not turned into errors.
    pub async fn set_logs_rules(
        &self,
        tenant: &str,
        token: &str,
        body: String,
    ) -> Result<RulesApiResponse, reqwest::Error> {
        let resp = self
            .client
            .post(self.logs_rules_url(tenant))
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/yaml")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Ok(RulesApiResponse { status, body })
    }
}
