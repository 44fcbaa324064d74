//! LabxDB-style metadata store: HTTP client, search criteria and the
//! records the reconciliation and import workflows read.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::{DbConnection, url_join};
use crate::error::KiraError;

/// Transport to the metadata store. Both calls fail on a non-success
/// status or a non-`OK` query status; text bodies come back as strings.
pub trait SeqDb: Send + Sync {
    fn get(&self, path: &str) -> Result<Value, KiraError>;
    fn post(&self, path: &str, body: &Value) -> Result<Value, KiraError>;

    /// First record returned by `{table}/get-ref/{reference}`.
    fn get_ref<T: DeserializeOwned>(&self, table: &str, reference: &str) -> Result<Option<T>, KiraError>
    where
        Self: Sized,
    {
        let value = self.get(&format!("{table}/get-ref/{reference}"))?;
        match value.get(0).and_then(|rows| rows.get(0)) {
            Some(record) if record.as_object().is_some_and(|fields| !fields.is_empty()) => {
                decode(record.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn search<T: DeserializeOwned>(&self, table: &str, query: &SearchQuery) -> Result<Vec<T>, KiraError>
    where
        Self: Sized,
    {
        decode(self.post(table, &query.to_body())?)
    }

    /// Posts one edit. Edits are sent as a one-element record list.
    fn apply(&self, mutation: &Mutation) -> Result<Value, KiraError>
    where
        Self: Sized,
    {
        self.post(&mutation.path, &json!([mutation.fields]))
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, KiraError> {
    serde_json::from_value(value).map_err(|err| KiraError::DbResponse(err.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    Fuzzy,
}

/// One `"<level> <field> <OP> <value>"` search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriterion {
    pub level: u8,
    pub field: String,
    pub op: MatchOp,
    pub value: String,
}

impl SearchCriterion {
    pub fn equal(level: u8, field: &str, value: &str) -> Self {
        Self {
            level,
            field: field.to_string(),
            op: MatchOp::Equal,
            value: value.to_string(),
        }
    }

    pub fn fuzzy(level: u8, field: &str, value: &str) -> Self {
        Self {
            op: MatchOp::Fuzzy,
            ..Self::equal(level, field, value)
        }
    }
}

impl fmt::Display for SearchCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            MatchOp::Equal => "EQUAL",
            MatchOp::Fuzzy => "FUZZY",
        };
        write!(f, "{} {} {op} {}", self.level, self.field, self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub criteria: Vec<SearchCriterion>,
}

impl SearchQuery {
    pub fn new(criteria: Vec<SearchCriterion>) -> Self {
        Self { criteria }
    }

    pub fn to_body(&self) -> Value {
        let criteria: Vec<String> = self.criteria.iter().map(ToString::to_string).collect();
        let mut body = json!({"search_criterion": criteria, "limit": "ALL"});
        if self.criteria.len() > 1 {
            body["search_gate"] = json!("AND");
        }
        body
    }
}

/// A queued edit: `fields` posted to `path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation {
    pub path: String,
    pub fields: Map<String, Value>,
}

impl Mutation {
    pub fn edit(table: &str, id: i64, field: &str, value: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(field.to_string(), Value::String(value.to_string()));
        Self {
            path: format!("{table}/edit/{id}"),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalReplicate {
    pub replicate_id: i64,
    pub replicate_ref: String,
    #[serde(default)]
    pub label_short: Option<String>,
    #[serde(default)]
    pub sra_ref: Option<String>,
    #[serde(default)]
    pub publication_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalRun {
    pub run_id: i64,
    pub run_ref: String,
    #[serde(default)]
    pub replicate_ref: Option<String>,
    #[serde(default)]
    pub sra_ref: Option<String>,
    #[serde(default)]
    pub spots: Option<u64>,
    #[serde(default)]
    pub second_barcode: Option<String>,
    #[serde(default)]
    pub tube_label: Option<String>,
    #[serde(default)]
    pub flowcell: Option<String>,
}

impl LocalRun {
    /// Archive runs recorded on this run; several when runs were merged.
    pub fn sra_refs(&self) -> Vec<&str> {
        self.sra_ref
            .as_deref()
            .map(|refs| refs.split(',').map(str::trim).filter(|r| !r.is_empty()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Publication {
    pub publication_ref: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sra_ref: Option<String>,
}

impl Publication {
    pub fn sra_refs(&self) -> Vec<&str> {
        self.sra_ref
            .as_deref()
            .map(|refs| refs.split(',').map(str::trim).filter(|r| !r.is_empty()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DbOption {
    pub group_name: String,
    pub option: String,
}

#[derive(Clone)]
pub struct SeqDbHttpClient {
    client: Client,
    connection: DbConnection,
}

impl SeqDbHttpClient {
    pub fn new(connection: DbConnection) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-seqdb/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::DbHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::DbHttp(err.to_string()))?;
        Ok(Self { client, connection })
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.connection.login {
            Some(login) => request.basic_auth(login, self.connection.password.as_deref()),
            None => request,
        }
    }

    fn read_response(response: reqwest::blocking::Response) -> Result<Value, KiraError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "database request failed".to_string());
            return Err(KiraError::DbStatus {
                status: status.as_u16(),
                message,
            });
        }
        let query_status = response
            .headers()
            .get("Query-status")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if query_status != "OK" {
            return Err(KiraError::DbQuery(query_status));
        }
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));
        if is_json {
            response
                .json()
                .map_err(|err| KiraError::DbResponse(err.to_string()))
        } else {
            response
                .text()
                .map(Value::String)
                .map_err(|err| KiraError::DbHttp(err.to_string()))
        }
    }

    fn url(&self, path: &str) -> String {
        url_join(&[&self.connection.url, path])
    }
}

impl SeqDb for SeqDbHttpClient {
    fn get(&self, path: &str) -> Result<Value, KiraError> {
        let url = self.url(path);
        debug!(%url, "db get");
        let response = send_db(|| self.authorize(self.client.get(&url)))?;
        Self::read_response(response)
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, KiraError> {
        let url = self.url(path);
        debug!(%url, "db post");
        let response = send_db(|| self.authorize(self.client.post(&url).json(body)))?;
        Self::read_response(response)
    }
}

fn send_db<F>(make_req: F) -> Result<reqwest::blocking::Response, KiraError>
where
    F: FnMut() -> reqwest::blocking::RequestBuilder,
{
    crate::ncbi::send_with_retries(make_req).map_err(|err| match err {
        KiraError::NcbiHttp(message) => KiraError::DbHttp(message),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criterion_strings() {
        assert_eq!(
            SearchCriterion::equal(3, "replicate_ref", "AR001").to_string(),
            "3 replicate_ref EQUAL AR001"
        );
        assert_eq!(
            SearchCriterion::fuzzy(2, "sra_ref", "SRS10").to_string(),
            "2 sra_ref FUZZY SRS10"
        );
    }

    #[test]
    fn search_body_adds_gate_for_several_criteria() {
        let single = SearchQuery::new(vec![SearchCriterion::equal(0, "group_name", "publication_ref")]);
        let body = single.to_body();
        assert_eq!(body["limit"], "ALL");
        assert!(body.get("search_gate").is_none());

        let double = SearchQuery::new(vec![
            SearchCriterion::equal(3, "replicate_ref", "AR001"),
            SearchCriterion::fuzzy(3, "sra_ref", "SRR1"),
        ]);
        let body = double.to_body();
        assert_eq!(body["search_gate"], "AND");
        assert_eq!(body["search_criterion"][1], "3 sra_ref FUZZY SRR1");
    }

    #[test]
    fn merged_run_refs() {
        let run: LocalRun = serde_json::from_value(json!({
            "run_id": 4, "run_ref": "AGS4", "sra_ref": "SRR1, SRR2", "spots": 300
        }))
        .unwrap();
        assert_eq!(run.sra_refs(), vec!["SRR1", "SRR2"]);
        assert_eq!(run.second_barcode, None);
    }

    #[test]
    fn edit_path() {
        let mutation = Mutation::edit("replicate", 12, "sra_ref", "SRS1");
        assert_eq!(mutation.path, "replicate/edit/12");
        assert_eq!(mutation.fields["sra_ref"], "SRS1");
    }
}
