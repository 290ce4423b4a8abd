//! Snapshot hub transports.
//!
//! Two ways of issuing one paginated query against the Snapshot GraphQL hub:
//! [`SnapshotGraphql`] sends a structured query with a variables map,
//! [`SnapshotRest`] substitutes literal `$first`/`$skip` tokens into the
//! query text and POSTs it as a plain `query` parameter, which some
//! REST-only graph endpoints require. Both return the `data` object of the
//! response envelope.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::paginate::{ConfigError, PageTransport, PageVars, TransportError};

pub const SNAPSHOT_API: &str = "https://hub.snapshot.org/graphql";

fn data_of(envelope: Value) -> Result<Value, TransportError> {
    let Value::Object(mut map) = envelope else {
        return Err(TransportError::MalformedResponse(
            "response envelope is not an object".to_string(),
        ));
    };
    // GraphQL errors come back with status 200 and an errors array.
    if let Some(errors) = map.get("errors") {
        if !errors.is_null() {
            return Err(TransportError::MalformedResponse(format!(
                "query errors: {errors}"
            )));
        }
    }
    map.remove("data").ok_or_else(|| {
        TransportError::MalformedResponse("response envelope has no data object".to_string())
    })
}

/// Structured-query transport: `{"query": ..., "variables": {...}}`.
pub struct SnapshotGraphql {
    server_url: String,
    client: reqwest::Client,
}

impl SnapshotGraphql {
    pub fn new() -> Self {
        Self::new_with_url(SNAPSHOT_API)
    }

    pub fn new_with_url(server_url: &str) -> Self {
        Self {
            server_url: server_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SnapshotGraphql {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageTransport for SnapshotGraphql {
    async fn fetch_page(&self, query: &str, vars: &PageVars) -> Result<Value, TransportError> {
        let mut variables = serde_json::Map::new();
        variables.insert("first".to_string(), json!(vars.first));
        variables.insert("skip".to_string(), json!(vars.skip));
        // Caller-supplied extras win on key collision.
        for (name, value) in &vars.extra {
            variables.insert(name.clone(), value.clone());
        }

        let envelope: Value = self
            .client
            .post(&self.server_url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        data_of(envelope)
    }
}

/// A raw-text query with literal substitution tokens.
///
/// Compile one eagerly before starting a fetch to fail fast on a query that
/// lacks the pagination tokens, instead of silently refetching the same page
/// forever.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    text: String,
}

impl QueryTemplate {
    pub fn new(text: &str) -> Result<Self, ConfigError> {
        // The variable declaration fragment only makes sense for the
        // structured transport and is dropped here.
        let text = text.replace("($first: Int!, $skip: Int!)", "");
        if !text.contains("$first") {
            return Err(ConfigError::TemplateMissingToken("$first"));
        }
        if !text.contains("$skip") {
            return Err(ConfigError::TemplateMissingToken("$skip"));
        }
        Ok(Self { text })
    }

    pub fn render(&self, vars: &PageVars) -> String {
        let mut query = self.text.replace("$first", &vars.first.to_string());
        query = query.replace("$skip", &vars.skip.to_string());
        for (name, value) in &vars.extra {
            let literal = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            query = query.replace(&format!("${name}"), &literal);
        }
        query
    }
}

/// Template-substitution transport: rewrites the query text and POSTs it as
/// a `query` parameter.
pub struct SnapshotRest {
    server_url: String,
    client: reqwest::Client,
}

impl SnapshotRest {
    pub fn new() -> Self {
        Self::new_with_url(SNAPSHOT_API)
    }

    pub fn new_with_url(server_url: &str) -> Self {
        Self {
            server_url: server_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SnapshotRest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageTransport for SnapshotRest {
    async fn fetch_page(&self, query: &str, vars: &PageVars) -> Result<Value, TransportError> {
        let template = QueryTemplate::new(query)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        let envelope: Value = self
            .client
            .post(&self.server_url)
            .header("accept", "application/json")
            .query(&[("query", template.render(vars))])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        data_of(envelope)
    }
}
