use crate::config::Config;
use crate::error::Error;
use log::{debug, warn};
use reqwest::{Client, Url};

/// Downloads images for `GET /api/recognize-url`.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    limit: u64,
}

impl Fetcher {
    pub fn new(config: &Config) -> Fetcher {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("plate-reader/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to a default http client: {}", e);
                Client::new()
            });
        Fetcher {
            client,
            limit: config.max_upload_bytes,
        }
    }

    pub async fn fetch(&self, url: Url) -> Result<Vec<u8>, Error> {
        debug!("Downloading {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::download(e.to_string()))?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(Error::download(format!("status_{}", status.as_u16())));
        }

        let mut data: Vec<u8> = vec![];
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::download(e.to_string()))?
        {
            if (data.len() + chunk.len()) as u64 > self.limit {
                return Err(Error::download(format!(
                    "image larger than {} bytes",
                    self.limit
                )));
            }
            data.extend_from_slice(&chunk);
        }
        if data.is_empty() {
            return Err(Error::download("empty response body"));
        }
        Ok(data)
    }
}

/// Accepts only absolute http and https urls.
pub fn parse_url(url: Option<&str>) -> Result<Url, Error> {
    let url = url.map(str::trim).unwrap_or("");
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(parsed),
        _ => Err(Error::InvalidUrl(url.to_string())),
    }
}
