use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{Project, ProjectRef};
use crate::error::KiraError;
use crate::sra::parse_sra_xml;
use crate::store::ProjectStore;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Search and fetch endpoints of the SRA archive.
pub trait SraClient: Send + Sync {
    /// Opaque numeric ids of every experiment package of `project`.
    fn search_ids(&self, project: &ProjectRef) -> Result<Vec<String>, KiraError>;
    /// One `EXPERIMENT_PACKAGE_SET` document.
    fn fetch_document(&self, id: &str) -> Result<String, KiraError>;
}

#[derive(Clone)]
pub struct EutilsHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl EutilsHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_base_url(EUTILS_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-seqdb/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::NcbiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;
        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn eutils_url(&self, endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut params = params.to_vec();
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }
        build_query_url(&format!("{}/{endpoint}", self.base_url), &params)
    }

    fn get_checked(&self, url: &str) -> Result<reqwest::blocking::Response, KiraError> {
        debug!(%url, "eutils request");
        let response = send_with_retries(|| self.client.get(url))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "NCBI request failed".to_string());
            return Err(KiraError::NcbiStatus { status, message });
        }
        Ok(response)
    }
}

impl SraClient for EutilsHttpClient {
    fn search_ids(&self, project: &ProjectRef) -> Result<Vec<String>, KiraError> {
        let url = self.eutils_url(
            "esearch.fcgi",
            &[
                ("db", "sra"),
                ("retmax", "1000"),
                ("retmode", "json"),
                ("term", project.as_str()),
            ],
        );
        let payload: Value = self
            .get_checked(&url)?
            .json()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;
        Ok(parse_id_list(&payload))
    }

    fn fetch_document(&self, id: &str) -> Result<String, KiraError> {
        let url = self.eutils_url("efetch.fcgi", &[("db", "sra"), ("id", id)]);
        self.get_checked(&url)?
            .text()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))
    }
}

pub fn parse_id_list(payload: &Value) -> Vec<String> {
    payload["esearchresult"]["idlist"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|value| value.as_str().map(|id| id.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Builds a [`Project`] from one efetch document per search id.
///
/// Requests are strictly sequential and separated by `pacing`.
pub struct ProjectFetcher<'a, C: SraClient> {
    client: &'a C,
    pacing: Duration,
    xml_store: Option<&'a ProjectStore>,
}

impl<'a, C: SraClient> ProjectFetcher<'a, C> {
    pub fn new(client: &'a C, pacing: Duration) -> Self {
        Self {
            client,
            pacing,
            xml_store: None,
        }
    }

    /// Keeps every raw document in `store` as it is fetched.
    pub fn save_xml(mut self, store: &'a ProjectStore) -> Self {
        self.xml_store = Some(store);
        self
    }

    pub fn fetch(
        &self,
        project_ref: &ProjectRef,
        run_filter: &BTreeSet<String>,
    ) -> Result<Project, KiraError> {
        let ids = self.client.search_ids(project_ref)?;
        info!(project = %project_ref, ids = ids.len(), "SRA search");

        let mut project = Project::default();
        for (index, id) in ids.iter().enumerate() {
            if index > 0 {
                thread::sleep(self.pacing);
            }
            let document = self.client.fetch_document(id)?;
            if let Some(store) = self.xml_store {
                store.save_xml(project_ref, index, &document)?;
            }
            let (title, sample) = parse_sra_xml(&document, Some(project_ref.as_str()), run_filter)?;
            if title.is_some() {
                project.title = title;
            }
            if sample.runs.is_empty() {
                debug!(%id, "no matching runs in document");
                continue;
            }
            project.samples.push(sample);
        }
        project.sort_samples();
        Ok(project)
    }
}

pub(crate) fn send_with_retries<F>(mut make_req: F) -> Result<reqwest::blocking::Response, KiraError>
where
    F: FnMut() -> reqwest::blocking::RequestBuilder,
{
    const MAX_RETRIES: usize = 3;
    const BASE_DELAY_MS: u64 = 200;
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Err(KiraError::NcbiHttp(err.to_string()));
            }
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

pub(crate) fn encode_url_component(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~') {
            out.push(ch);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub(crate) fn build_query_url(base: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let query: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{}={}", encode_url_component(key), encode_url_component(value)))
        .collect();
    format!("{base}?{}", query.join("&"))
}
