//! GraphQL-over-HTTP upstream used by the binary.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::{UpstreamError, UpstreamFetch};
use crate::config::UpstreamSettings;

use super::error::InfraError;

const ERROR_BODY_LIMIT: usize = 512;

/// Operation name → GraphQL document, read from a TOML `[operations]` table.
#[derive(Debug, Clone, Default)]
pub struct QueryDocuments {
    operations: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DocumentsFile {
    #[serde(default)]
    operations: HashMap<String, String>,
}

impl QueryDocuments {
    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| InfraError::documents(path, err.to_string()))?;
        Self::parse(&text).map_err(|message| InfraError::documents(path, message))
    }

    fn parse(text: &str) -> Result<Self, String> {
        let file: DocumentsFile = toml::from_str(text).map_err(|err| err.to_string())?;
        if let Some((name, _)) = file
            .operations
            .iter()
            .find(|(_, document)| document.trim().is_empty())
        {
            return Err(format!("operation `{name}` has an empty document"));
        }
        Ok(Self {
            operations: file.operations,
        })
    }

    pub fn with_operation(mut self, name: impl Into<String>, document: impl Into<String>) -> Self {
        self.operations.insert(name.into(), document.into());
        self
    }

    pub fn get(&self, operation: &str) -> Option<&str> {
        self.operations.get(operation).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRequest<'a> {
    operation_name: &'a str,
    query: &'a str,
    variables: &'a Value,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

/// Posts `{operationName, query, variables}` to a single GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    endpoint: Url,
    documents: QueryDocuments,
}

impl HttpUpstream {
    pub fn new(settings: &UpstreamSettings, documents: QueryDocuments) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            documents,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("querycache/", env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl UpstreamFetch for HttpUpstream {
    async fn fetch(&self, operation: &str, variables: &Value) -> Result<Value, UpstreamError> {
        let query = self
            .documents
            .get(operation)
            .ok_or_else(|| UpstreamError::UnknownOperation {
                operation: operation.to_string(),
            })?;

        debug!(operation, endpoint = %self.endpoint, "posting graphql operation");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&GraphQlRequest {
                operation_name: operation,
                query,
                variables,
            })
            .send()
            .await
            .map_err(|err| UpstreamError::transport(err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| UpstreamError::transport(err.to_string()))?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let envelope: GraphQlResponse =
            serde_json::from_slice(&bytes).map_err(|err| UpstreamError::decode(err.to_string()))?;
        if !envelope.errors.is_empty() {
            return Err(UpstreamError::GraphQl {
                messages: envelope.errors.into_iter().map(|e| e.message).collect(),
            });
        }
        envelope
            .data
            .ok_or_else(|| UpstreamError::decode("response carried neither data nor errors"))
    }
}
