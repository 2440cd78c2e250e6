//! Supabase REST API client and the history store built on it

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::history::{MatchHistoryStore, NewMatchRecord, PersistedMatch, StoreError};

/// Upper bound for one REST call, connect included
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_role_key: &str) -> Result<Self, SupabaseError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        })
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SupabaseError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::Api { status: status.as_u16(), body });
        }
        Ok(response)
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }

    /// Make an authenticated POST request (insert)
    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, SupabaseError> {
        let url = self.rest_url(table);

        let response = self
            .authed(self.client.post(&url))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        // PostgREST returns an array, get first element
        let results: Vec<R> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)?;
        results
            .into_iter()
            .next()
            .ok_or(SupabaseError::NoRowReturned)
    }

    /// Make an authenticated DELETE request, returning the deleted rows
    pub async fn delete<R: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<R>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .authed(self.client.delete(&url))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,
}

impl From<SupabaseError> for StoreError {
    fn from(e: SupabaseError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Match history kept in a Supabase table with columns
/// `id, name_a, name_b, score_a, score_b, phase, created_at`
#[derive(Clone)]
pub struct SupabaseMatchStore {
    client: SupabaseClient,
    table: String,
}

impl SupabaseMatchStore {
    pub fn new(client: SupabaseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl MatchHistoryStore for SupabaseMatchStore {
    async fn create(&self, record: NewMatchRecord) -> Result<PersistedMatch, StoreError> {
        let persisted: PersistedMatch = self.client.insert(&self.table, &record).await?;
        debug!(id = persisted.id, "Match record inserted");
        Ok(persisted)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let query = format!("id=eq.{}", id);
        let deleted: Vec<PersistedMatch> = self.client.delete(&self.table, &query).await?;
        Ok(!deleted.is_empty())
    }

    async fn find_all_ordered(&self) -> Result<Vec<PersistedMatch>, StoreError> {
        let records = self
            .client
            .get(&self.table, "select=*&order=created_at.asc,id.asc")
            .await?;
        Ok(records)
    }
}
