//! Nexus Mods client over the REST v1 and GraphQL v2 APIs

use super::service::{
    Feedback, FeedbackResponse, Issue, ModUpdate, NexusService, RemoteModInfo, StartedDownload,
    VersionCheckReport,
};
use super::{catalog_id_for, NexusError, NxmUrl};
use crate::mods::{EndorsedStatus, ModRecord};
use crate::state::UserInfo;
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

const REST_API_BASE: &str = "https://api.nexusmods.com/v1";
const GRAPHQL_ENDPOINT: &str = "https://api.nexusmods.com/v2/graphql";
const USER_AGENT: &str = concat!("ModSync/", env!("CARGO_PKG_VERSION"));
const MAX_RETRIES: u32 = 5;
const BASE_RETRY_DELAY_MS: u64 = 2000;
const MAX_RETRY_DELAY_MS: u64 = 60000;

/// Download progress callback: (bytes so far, total bytes or 0)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// HTTP client for Nexus Mods
pub struct NexusClient {
    client: reqwest::Client,
    api_key: RwLock<Option<String>>,
    downloads_dir: PathBuf,
    progress: Option<ProgressCallback>,
}

impl NexusClient {
    pub fn new(api_key: Option<String>, downloads_dir: PathBuf) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key: RwLock::new(normalize_key(api_key)),
            downloads_dir,
            progress: None,
        })
    }

    /// Report download progress through `cb`
    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    fn key(&self) -> Result<String, NexusError> {
        self.api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| NexusError::Auth("No API key set".to_string()))
    }

    /// Send a request, retrying rate limits and server errors with backoff.
    ///
    /// `build` is called once per attempt. Any other non-success status is
    /// mapped with [`NexusError::from_status`].
    async fn send<F>(&self, build: F) -> Result<reqwest::Response, NexusError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = build(&self.client).send().await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt >= MAX_RETRIES {
                    return Err(NexusError::RateLimited);
                }

                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(retry_after_ms)
                    .unwrap_or_else(|| backoff_delay(attempt));

                tracing::warn!(
                    "Rate limited (attempt {}/{}), retrying in {}ms",
                    attempt,
                    MAX_RETRIES,
                    retry_after
                );
                sleep(Duration::from_millis(retry_after)).await;
                continue;
            }

            if status.is_server_error() && attempt < MAX_RETRIES {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    "Server error {} (attempt {}/{}), retrying in {}ms",
                    status,
                    attempt,
                    MAX_RETRIES,
                    delay
                );
                sleep(Duration::from_millis(delay)).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(NexusError::from_status(status, &body));
            }

            return Ok(response);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, NexusError> {
        let key = self.key()?;
        let response = self
            .send(|client| {
                client
                    .get(url)
                    .header("apikey", &key)
                    .header("accept", "application/json")
            })
            .await?;

        Ok(response.json().await?)
    }

    async fn graphql<V, R>(&self, query: &str, variables: V) -> Result<R, NexusError>
    where
        V: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        #[derive(Serialize)]
        struct Request<'a, V> {
            query: &'a str,
            variables: V,
        }

        #[derive(Deserialize)]
        struct Response<R> {
            data: Option<R>,
            errors: Option<Vec<GraphQLError>>,
        }

        #[derive(Deserialize)]
        struct GraphQLError {
            message: String,
        }

        let key = self.key()?;
        let request = Request { query, variables };
        let response = self
            .send(|client| {
                client
                    .post(GRAPHQL_ENDPOINT)
                    .header("apikey", &key)
                    .header(CONTENT_TYPE, "application/json")
                    .json(&request)
            })
            .await?;

        let response: Response<R> = response.json().await?;

        if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(NexusError::Other(format!(
                "GraphQL errors: {}",
                messages.join(", ")
            )));
        }

        response
            .data
            .ok_or_else(|| NexusError::Other("GraphQL response contained no data".to_string()))
    }

    /// Latest version per mod id for one catalog domain
    async fn latest_versions(
        &self,
        game_domain: &str,
        mod_ids: &[i64],
    ) -> Result<HashMap<i64, String>, NexusError> {
        let query = r#"
            query ModsByUid($uids: [ID!]!) {
                modsByUid(uids: $uids) {
                    nodes {
                        modId
                        version
                    }
                }
            }
        "#;

        #[derive(Serialize)]
        struct Variables {
            uids: Vec<String>,
        }

        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "modsByUid")]
            mods_by_uid: Nodes,
        }

        #[derive(Deserialize)]
        struct Nodes {
            nodes: Vec<ModNode>,
        }

        #[derive(Deserialize)]
        struct ModNode {
            #[serde(rename = "modId")]
            mod_id: i64,
            version: String,
        }

        let uids = mod_ids
            .iter()
            .map(|id| format!("{}:{}", game_domain, id))
            .collect();

        let response: Response = self.graphql(query, Variables { uids }).await?;

        Ok(response
            .mods_by_uid
            .nodes
            .into_iter()
            .map(|node| (node.mod_id, node.version))
            .collect())
    }

    /// Resolve a download link for `link` and stream the file to the downloads dir
    async fn download(&self, link: &NxmUrl) -> Result<StartedDownload, NexusError> {
        #[derive(Deserialize)]
        struct LinkInfo {
            #[serde(rename = "URI")]
            uri: String,
        }

        let url = download_link_url(link)?;
        let links: Vec<LinkInfo> = self.get_json(url.as_str()).await?;
        let target = links
            .into_iter()
            .next()
            .ok_or_else(|| NexusError::NotFound(format!("No download link for {}", link)))?;

        let response = self.send(|client| client.get(&target.uri)).await?;

        let content_type = response.headers().get(CONTENT_TYPE);
        if is_html(content_type) {
            return Err(NexusError::NotAFile(target.uri));
        }

        let file_name = file_name_from_url(&target.uri)
            .unwrap_or_else(|| format!("{}-{}-{}", game_domain, link.mod_id, link.file_id));

        tokio::fs::create_dir_all(&self.downloads_dir).await?;
        let dest = self.downloads_dir.join(&file_name);

        self.stream_to_file(response, &dest).await?;

        tracing::info!("Downloaded {} to {}", link, dest.display());

        Ok(StartedDownload {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: Some(file_name),
            path: Some(dest),
        })
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        dest: &Path,
    ) -> Result<(), NexusError> {
        let total_size = response.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(cb) = &self.progress {
                cb(downloaded, total_size);
            }
        }

        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl NexusService for NexusClient {
    fn set_key(&self, key: Option<String>) {
        *self.api_key.write().unwrap_or_else(PoisonError::into_inner) = normalize_key(key);
    }

    async fn validate_key(&self, key: &str) -> Result<UserInfo, NexusError> {
        let url = format!("{}/users/validate.json", REST_API_BASE);
        let key = key.trim();
        let response = self
            .send(|client| {
                client
                    .get(&url)
                    .header("apikey", key)
                    .header("accept", "application/json")
            })
            .await?;

        let validated: ValidateResponse = response.json().await?;
        Ok(validated.into())
    }

    async fn retrieve_mod_info(
        &self,
        game_domain: &str,
        record: &ModRecord,
    ) -> Result<Option<RemoteModInfo>, NexusError> {
        let Some(mod_id) = record.attributes.mod_id else {
            return Ok(None);
        };

        let url = format!("{}/games/{}/mods/{}.json", REST_API_BASE, game_domain, mod_id);
        let details: ModDetails = self.get_json(&url).await?;

        tracing::debug!("Fetched metadata for {}:{}", game_domain, mod_id);
        Ok(Some(details.into()))
    }

    async fn check_mod_versions(
        &self,
        game_domain: &str,
        mods: &[ModRecord],
    ) -> Result<VersionCheckReport, NexusError> {
        let records: Vec<(&ModRecord, i64)> = mods
            .iter()
            .filter_map(|record| record.attributes.mod_id.map(|id| (record, id)))
            .collect();

        let mut report = VersionCheckReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let ids: Vec<i64> = records.iter().map(|(_, id)| *id).collect();
        let versions = match self.latest_versions(game_domain, &ids).await {
            Ok(versions) => versions,
            Err(e @ (NexusError::Auth(_) | NexusError::RateLimited)) => return Err(e),
            Err(e) => {
                for (record, _) in &records {
                    report.errors.push(format!("{}: {}", display_name(record), e));
                }
                return Ok(report);
            }
        };

        for (record, mod_id) in records {
            match versions.get(&mod_id) {
                Some(version) => report.updates.push(ModUpdate {
                    mod_key: record.id.clone(),
                    newest_version: version.clone(),
                }),
                None => report.errors.push(format!(
                    "{}: mod {} not found on Nexus Mods ({})",
                    display_name(record),
                    mod_id,
                    game_domain
                )),
            }
        }

        Ok(report)
    }

    async fn start_download(&self, url: &NxmUrl) -> Result<StartedDownload, NexusError> {
        self.download(url).await
    }

    async fn endorse_mod(
        &self,
        game_domain: &str,
        mod_id: i64,
        endorse: bool,
    ) -> Result<EndorsedStatus, NexusError> {
        #[derive(Deserialize)]
        struct EndorseResponse {
            status: Option<String>,
        }

        let action = if endorse { "endorse" } else { "abstain" };
        let url = format!(
            "{}/games/{}/mods/{}/{}.json",
            REST_API_BASE, game_domain, mod_id, action
        );
        let key = self.key()?;

        let response = self
            .send(|client| {
                client
                    .post(&url)
                    .header("apikey", &key)
                    .header("accept", "application/json")
            })
            .await?;
        let body: EndorseResponse = response.json().await?;

        Ok(body
            .status
            .map(|s| EndorsedStatus::from_api(&s))
            .unwrap_or(if endorse {
                EndorsedStatus::Endorsed
            } else {
                EndorsedStatus::Abstained
            }))
    }

    async fn get_own_issues(&self) -> Result<Vec<Issue>, NexusError> {
        #[derive(Deserialize)]
        struct IssueList {
            #[serde(default)]
            issues: Vec<Issue>,
        }

        let url = format!("{}/feedbacks/list_user_issues.json", REST_API_BASE);
        let list: IssueList = self.get_json(&url).await?;
        Ok(list.issues)
    }

    async fn submit_feedback(&self, feedback: Feedback) -> Result<FeedbackResponse, NexusError> {
        let mut attachments = Vec::with_capacity(feedback.files.len());
        for path in &feedback.files {
            let bytes = tokio::fs::read(path).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_string());
            attachments.push((name, bytes));
        }

        // anonymous reports go out without the key
        let key = if feedback.anonymous {
            None
        } else {
            Some(self.key()?)
        };

        let url = format!("{}/feedbacks.json", REST_API_BASE);
        let response = self
            .send(|client| {
                let mut form = reqwest::multipart::Form::new()
                    .text("feedback_title", feedback.title.clone())
                    .text("feedback_text", feedback.message.clone())
                    .text("anonymous", feedback.anonymous.to_string());
                if let Some(hash) = &feedback.hash {
                    form = form.text("hash", hash.clone());
                }
                for (name, bytes) in &attachments {
                    form = form.part(
                        "feedback_file[]",
                        reqwest::multipart::Part::bytes(bytes.clone()).file_name(name.clone()),
                    );
                }

                let request = client.post(&url).multipart(form);
                match &key {
                    Some(key) => request.header("apikey", key),
                    None => request,
                }
            })
            .await?;

        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct ValidateResponse {
    user_id: i64,
    name: String,
    #[serde(default, alias = "is_premium?")]
    is_premium: bool,
    #[serde(default, alias = "is_supporter?")]
    is_supporter: bool,
    profile_url: Option<String>,
}

impl From<ValidateResponse> for UserInfo {
    fn from(v: ValidateResponse) -> Self {
        UserInfo {
            user_id: v.user_id,
            name: v.name,
            is_premium: v.is_premium,
            is_supporter: v.is_supporter,
            profile_url: v.profile_url,
        }
    }
}

#[derive(Deserialize)]
struct ModDetails {
    name: Option<String>,
    summary: Option<String>,
    author: Option<String>,
    version: Option<String>,
    picture_url: Option<String>,
    endorsement: Option<Endorsement>,
    updated_timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct Endorsement {
    endorse_status: String,
}

impl From<ModDetails> for RemoteModInfo {
    fn from(d: ModDetails) -> Self {
        RemoteModInfo {
            name: d.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            summary: d.summary,
            author: d.author,
            version: d.version,
            picture_url: d.picture_url,
            endorsement: d.endorsement.map(|e| EndorsedStatus::from_api(&e.endorse_status)),
            updated_timestamp: d.updated_timestamp,
        }
    }
}

fn normalize_key(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

fn display_name(record: &ModRecord) -> &str {
    record.attributes.mod_name.as_deref().unwrap_or(&record.id)
}

/// Exponential backoff with 85-115% jitter
/// `Retry-After` seconds as a delay, capped like the backoff
fn retry_after_ms(secs: u64) -> u64 {
    secs.saturating_mul(1000).min(MAX_RETRY_DELAY_MS)
}

fn backoff_delay(attempt: u32) -> u64 {
    let base = BASE_RETRY_DELAY_MS.saturating_mul(1 << (attempt.saturating_sub(1)).min(16));
    let jitter = rand::random::<f64>() * 0.3 + 0.85;
    ((base as f64 * jitter) as u64).min(MAX_RETRY_DELAY_MS)
}

fn is_html(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

/// Last path segment of a download url, if it looks like a file name
/// `download_link.json` endpoint of a file; website links carry `key`/`expires`
fn download_link_url(link: &NxmUrl) -> Result<url::Url, NexusError> {
    let mut url = url::Url::parse(&format!(
        "{}/games/{}/mods/{}/files/{}/download_link.json",
        REST_API_BASE,
        catalog_id_for(&link.game),
        link.mod_id,
        link.file_id
    ))
    .map_err(|e| NexusError::InvalidUrl(format!("{}: {}", link, e)))?;

    if let (Some(key), Some(expires)) = (&link.key, link.expires) {
        url.query_pairs_mut()
            .append_pair("key", key)
            .append_pair("expires", &expires.to_string());
    }
    Ok(url)
}

fn file_name_from_url(url: &str) -> Option<String> {
    let url = url::Url::parse(url).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let name = percent_decode_str(segment).decode_utf8().ok()?;
    Some(name.into_owned()).filter(|s| !s.contains('/') && !s.starts_with('.'))
}
