use super::{Metadata, Storage, ensure_not_root, parse_listed, retain_prefixed};
use crate::content::Content;
use crate::error::{Result, StashError};
use crate::key::Key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use reqwest::{Client, Method, Response, StatusCode, Url};

/// Query flag turning `GET /<prefix>` into a listing.
pub const LIST_QUERY: &str = "list";

/// Query parameter of `POST /<key>` naming the move destination.
pub const MOVE_TO_QUERY: &str = "move_to";

/// Storage served by a remote `stash` server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
    base: Url,
}

impl HttpStorage {
    pub fn new(base: &str) -> Result<Self> {
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(client: Client, base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| StashError::Config(format!("invalid http storage url '{}': {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(StashError::Config(format!(
                "'{}' cannot be used as a base url",
                base
            )));
        }
        Ok(Self { client, base })
    }

    fn key_url(&self, key: &Key) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StashError::Config(format!("'{}' cannot be used as a base url", self.base)))?
            .pop_if_empty()
            .extend(key.parts());
        Ok(url)
    }

    fn list_url(&self, prefix: &Key) -> Result<Url> {
        let mut url = self.key_url(prefix)?;
        if prefix.is_root() && !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        url.set_query(Some(LIST_QUERY));
        Ok(url)
    }

    fn move_url(&self, source: &Key, destination: &Key) -> Result<Url> {
        let mut url = self.key_url(source)?;
        url.query_pairs_mut()
            .append_pair(MOVE_TO_QUERY, &destination.to_string());
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url) -> Result<Response> {
        tracing::debug!("{} {}", method, url);
        Ok(self.client.request(method, url).send().await?)
    }
}

/// Maps a non-success response onto the error the server reported.
async fn failure(response: Response, key: &Key) -> StashError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => StashError::NotFound(key.clone()),
        StatusCode::CONFLICT => StashError::LockBusy(key.clone()),
        StatusCode::BAD_REQUEST => StashError::InvalidOperation(message),
        StatusCode::NOT_IMPLEMENTED => StashError::Unsupported(message),
        other => StashError::Backend(format!("http storage answered {}: {}", other, message)),
    }
}

fn header_size(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn header_last_modified(response: &Response) -> Option<DateTime<Utc>> {
    let value = response.headers().get(LAST_MODIFIED)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|instant| instant.with_timezone(&Utc))
}

#[async_trait]
impl Storage for HttpStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        if key.is_root() {
            return Ok(false);
        }
        let response = self.send(Method::HEAD, self.key_url(key)?).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure(response, key).await),
        }
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let response = self.send(Method::GET, self.list_url(prefix)?).await?;
        if !response.status().is_success() {
            return Err(failure(response, prefix).await);
        }
        let rendered: Vec<String> = response.json().await?;
        let keys = parse_listed(rendered.iter().map(String::as_str), &self.identifier());
        Ok(retain_prefixed(keys, prefix))
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        ensure_not_root(key, "save to")?;
        let url = self.key_url(key)?;
        let bytes = content.bytes().await?;
        tracing::debug!("PUT {} ({} bytes)", url, bytes.len());
        let response = self.client.put(url).body(bytes).send().await?;
        if !response.status().is_success() {
            return Err(failure(response, key).await);
        }
        Ok(())
    }

    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()> {
        ensure_not_root(destination, "move to")?;
        let response = self
            .send(Method::POST, self.move_url(source, destination)?)
            .await?;
        if !response.status().is_success() {
            return Err(failure(response, source).await);
        }
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        ensure_not_root(key, "load from")?;
        let response = self.send(Method::GET, self.key_url(key)?).await?;
        if !response.status().is_success() {
            return Err(failure(response, key).await);
        }
        let size = header_size(&response);
        let stream = response.bytes_stream().map_err(StashError::from);
        Ok(Content::from_stream(stream, size))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let response = self.send(Method::DELETE, self.key_url(key)?).await?;
        if !response.status().is_success() {
            return Err(failure(response, key).await);
        }
        Ok(())
    }

    async fn metadata(&self, key: &Key) -> Result<Metadata> {
        let response = self.send(Method::HEAD, self.key_url(key)?).await?;
        if !response.status().is_success() {
            return Err(failure(response, key).await);
        }
        let size = header_size(&response).ok_or_else(|| {
            StashError::Backend(format!("http storage sent no size for '{}'", key))
        })?;
        Ok(Metadata {
            size,
            last_modified: header_last_modified(&response),
        })
    }

    fn identifier(&self) -> String {
        format!("HTTP: {}", self.base)
    }
}
