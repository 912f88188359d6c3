use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<FetchResponse>;
}

pub struct ReqwestFetcher {
    client: Arc<Client>,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("could not build http client")?;
        Ok(ReqwestFetcher {
            client: Arc::new(client),
        })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str) -> anyhow::Result<FetchResponse> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .context(format!("request to {} failed", url))?;
        let status = res.status().as_u16();
        let body = res
            .bytes()
            .await
            .context(format!("could not read body of {}", url))?;
        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}
