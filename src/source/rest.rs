use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::cache::IndexParams;
use crate::record::ResourceData;

const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";

/// Top-level JSON:API document.
#[derive(Debug, Serialize, Deserialize)]
pub struct Document<T> {
  pub data: T,
}

/// Remote JSON:API collection endpoint, e.g. `https://api.example.com/jobs`
#[derive(Clone)]
pub struct RestSource {
  client: reqwest::Client,
  base: Url,
  /// Relationships requested through `include` on reads
  include: Vec<String>,
}

impl RestSource {
  pub fn new(url: &str) -> Result<Self> {
    let base = Url::parse(url).map_err(|e| eyre!("Invalid source URL {}: {}", url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Source URL {} cannot be a base", url));
    }

    Ok(Self {
      client: reqwest::Client::new(),
      base,
      include: Vec::new(),
    })
  }

  /// Ask for `names` to be sideloaded on every read.
  pub fn with_include<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.include = names.into_iter().map(Into::into).collect();
    self
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  /// URL of the collection with `filter[key]=value` pairs for `params`.
  pub fn index_url(&self, params: &IndexParams) -> Url {
    let mut pairs: Vec<(String, String)> = params
      .filter
      .iter()
      .map(|(key, value)| (format!("filter[{}]", key), value.clone()))
      .collect();
    pairs.extend(self.include_pair());
    with_query(self.base.clone(), &pairs)
  }

  /// URL to read a single resource, with the configured `include`.
  pub fn get_url(&self, id: &str) -> Result<Url> {
    let pairs: Vec<_> = self.include_pair().into_iter().collect();
    Ok(with_query(self.resource_url(id)?, &pairs))
  }

  fn include_pair(&self) -> Option<(String, String)> {
    (!self.include.is_empty()).then(|| ("include".to_string(), self.include.join(",")))
  }

  /// URL of a single resource.
  pub fn resource_url(&self, id: &str) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("Source URL {} cannot be a base", self.base))?
      .pop_if_empty()
      .push(id);
    Ok(url)
  }

  /// List the collection
  pub async fn index(&self, params: &IndexParams) -> Result<Vec<ResourceData>> {
    let url = self.index_url(params);
    let document: Document<Vec<ResourceData>> = self.send(self.request(Method::GET, url)).await?;
    Ok(document.data)
  }

  /// Get a single resource by id
  pub async fn get(&self, id: &str) -> Result<ResourceData> {
    let url = self.get_url(id)?;
    let document: Document<ResourceData> = self.send(self.request(Method::GET, url)).await?;
    Ok(document.data)
  }

  /// Create a resource, returning the stored version
  pub async fn create(&self, data: ResourceData) -> Result<ResourceData> {
    let body = serde_json::to_vec(&Document { data })
      .map_err(|e| eyre!("Failed to encode resource: {}", e))?;
    let request = self
      .request(Method::POST, self.base.clone())
      .header(CONTENT_TYPE, JSONAPI_MEDIA_TYPE)
      .body(body);

    let document: Document<ResourceData> = self.send(request).await?;
    Ok(document.data)
  }

  /// Delete a resource by id
  pub async fn delete(&self, id: &str) -> Result<()> {
    let url = self.resource_url(id)?;
    let response = self
      .request(Method::DELETE, url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to delete {}: {}", url, e))?;

    response
      .error_for_status()
      .map_err(|e| eyre!("Failed to delete {}: {}", url, e))?;
    Ok(())
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    debug!(%method, %url, "Source request");
    self
      .client
      .request(method, url)
      .header(ACCEPT, JSONAPI_MEDIA_TYPE)
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", self.base, e))?
      .error_for_status()
      .map_err(|e| eyre!("Request to {} failed: {}", self.base, e))?;

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", self.base, e))?;

    serde_json::from_slice(&body)
      .map_err(|e| eyre!("Failed to parse response from {}: {}", self.base, e))
  }
}

/// Append query pairs, leaving `url` untouched when there are none.
fn with_query(mut url: Url, pairs: &[(String, String)]) -> Url {
  if !pairs.is_empty() {
    url.query_pairs_mut().extend_pairs(pairs);
  }
  url
}
