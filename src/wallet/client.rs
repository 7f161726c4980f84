//! Wallet to mint connector

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::HttpCache;
use crate::error::{Error, ErrorResponse};
use crate::mint::Mint;
use crate::mint_url::MintUrl;
use crate::nuts::{
    CheckStateRequest, CheckStateResponse, Id, KeysResponse, KeysetResponse, MeltBolt11Request,
    MeltQuoteBolt11Request, MeltQuoteBolt11Response, MintBolt11Request, MintBolt11Response,
    MintInfo, MintQuoteBolt11Request, MintQuoteBolt11Response, RestoreRequest, RestoreResponse,
    SwapRequest, SwapResponse,
};

/// Interface the wallet uses to talk to a mint
#[async_trait]
pub trait MintConnector: Debug {
    /// Get mint info
    async fn get_mint_info(&self) -> Result<MintInfo, Error>;
    /// Get active keysets with keys
    async fn get_mint_keys(&self) -> Result<KeysResponse, Error>;
    /// Get one keyset with keys
    async fn get_keyset(&self, keyset_id: Id) -> Result<KeysResponse, Error>;
    /// Get all keysets with metadata
    async fn get_mint_keysets(&self) -> Result<KeysetResponse, Error>;
    /// Request a mint quote
    async fn post_mint_quote(
        &self,
        request: MintQuoteBolt11Request,
    ) -> Result<MintQuoteBolt11Response, Error>;
    /// Get the state of a mint quote
    async fn get_mint_quote_status(&self, quote_id: &str)
        -> Result<MintQuoteBolt11Response, Error>;
    /// Redeem a mint quote
    async fn post_mint(&self, request: MintBolt11Request) -> Result<MintBolt11Response, Error>;
    /// Swap inputs for outputs
    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error>;
    /// Request a melt quote
    async fn post_melt_quote(
        &self,
        request: MeltQuoteBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error>;
    /// Get the state of a melt quote
    async fn get_melt_quote_status(&self, quote_id: &str)
        -> Result<MeltQuoteBolt11Response, Error>;
    /// Execute a melt
    async fn post_melt(&self, request: MeltBolt11Request) -> Result<MeltQuoteBolt11Response, Error>;
    /// Check proof states by Y
    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> Result<CheckStateResponse, Error>;
    /// Ask the mint to resign recovered outputs
    async fn post_restore(&self, request: RestoreRequest) -> Result<RestoreResponse, Error>;
}

/// HTTP connector
#[derive(Debug, Clone)]
pub struct HttpClient {
    mint_url: MintUrl,
    client: reqwest::Client,
}

impl HttpClient {
    /// Create new [`HttpClient`]
    pub fn new(mint_url: MintUrl) -> Self {
        Self {
            mint_url,
            client: reqwest::Client::new(),
        }
    }

    fn map_reqwest_error(err: reqwest::Error) -> Error {
        // Transport level failures are the retryable class
        if err.is_connect() || err.is_timeout() || err.is_request() {
            return Error::Network(err.to_string());
        }

        Error::Custom(err.to_string())
    }

    async fn http_get<R: DeserializeOwned>(&self, path: &str) -> Result<R, Error> {
        let url = self.mint_url.join(path)?;

        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?
            .text()
            .await
            .map_err(Self::map_reqwest_error)?;

        Self::parse_response(&res)
    }

    async fn http_post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, Error> {
        let url = self.mint_url.join(path)?;

        let res = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?
            .text()
            .await
            .map_err(Self::map_reqwest_error)?;

        Self::parse_response(&res)
    }

    fn parse_response<R: DeserializeOwned>(res: &str) -> Result<R, Error> {
        match serde_json::from_str::<R>(res) {
            Ok(response) => Ok(response),
            Err(_) => match serde_json::from_str::<ErrorResponse>(res) {
                Ok(error_response) => Err(error_response.into()),
                Err(err) => Err(err.into()),
            },
        }
    }
}

#[async_trait]
impl MintConnector for HttpClient {
    async fn get_mint_info(&self) -> Result<MintInfo, Error> {
        self.http_get("v1/info").await
    }

    async fn get_mint_keys(&self) -> Result<KeysResponse, Error> {
        self.http_get("v1/keys").await
    }

    async fn get_keyset(&self, keyset_id: Id) -> Result<KeysResponse, Error> {
        self.http_get(&format!("v1/keys/{keyset_id}")).await
    }

    async fn get_mint_keysets(&self) -> Result<KeysetResponse, Error> {
        self.http_get("v1/keysets").await
    }

    async fn post_mint_quote(
        &self,
        request: MintQuoteBolt11Request,
    ) -> Result<MintQuoteBolt11Response, Error> {
        self.http_post("v1/mint/quote/bolt11", &request).await
    }

    async fn get_mint_quote_status(
        &self,
        quote_id: &str,
    ) -> Result<MintQuoteBolt11Response, Error> {
        self.http_get(&format!("v1/mint/quote/bolt11/{quote_id}"))
            .await
    }

    async fn post_mint(&self, request: MintBolt11Request) -> Result<MintBolt11Response, Error> {
        self.http_post("v1/mint/bolt11", &request).await
    }

    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error> {
        self.http_post("v1/swap", &request).await
    }

    async fn post_melt_quote(
        &self,
        request: MeltQuoteBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        self.http_post("v1/melt/quote/bolt11", &request).await
    }

    async fn get_melt_quote_status(
        &self,
        quote_id: &str,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        self.http_get(&format!("v1/melt/quote/bolt11/{quote_id}"))
            .await
    }

    async fn post_melt(&self, request: MeltBolt11Request) -> Result<MeltQuoteBolt11Response, Error> {
        self.http_post("v1/melt/bolt11", &request).await
    }

    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> Result<CheckStateResponse, Error> {
        self.http_post("v1/checkstate", &request).await
    }

    async fn post_restore(&self, request: RestoreRequest) -> Result<RestoreResponse, Error> {
        self.http_post("v1/restore", &request).await
    }
}

/// In-process connector
///
/// Routes requests straight into a [`Mint`], fronted by the same
/// idempotency cache a served mint uses. This is what the integration
/// tests run against.
#[derive(Debug, Clone)]
pub struct DirectMintConnector {
    mint: Mint,
    cache: Arc<HttpCache>,
}

impl DirectMintConnector {
    /// Create new [`DirectMintConnector`]
    pub fn new(mint: Mint) -> Self {
        Self {
            mint,
            cache: Arc::new(HttpCache::default()),
        }
    }

    /// The wrapped mint
    pub fn mint(&self) -> &Mint {
        &self.mint
    }

    /// Run a cacheable operation: serve a duplicate request from cache,
    /// execute and cache otherwise
    async fn cached<B, R, F, Fut>(&self, path: &str, body: &B, f: F) -> Result<R, Error>
    where
        B: Serialize,
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R, Error>>,
    {
        let body = serde_json::to_vec(body)?;
        let key = self.cache.key("POST", path, &body);

        if let Some(key) = key {
            if let Some(cached) = self.cache.get(&key).await {
                tracing::debug!("Serving {} from idempotency cache", path);
                return Ok(serde_json::from_slice(&cached)?);
            }

            let response = f().await?;
            self.cache
                .set(key, serde_json::to_vec(&response)?)
                .await;
            return Ok(response);
        }

        f().await
    }
}

#[async_trait]
impl MintConnector for DirectMintConnector {
    async fn get_mint_info(&self) -> Result<MintInfo, Error> {
        Ok(self.mint.mint_info().clone())
    }

    async fn get_mint_keys(&self) -> Result<KeysResponse, Error> {
        self.mint.pubkeys().await
    }

    async fn get_keyset(&self, keyset_id: Id) -> Result<KeysResponse, Error> {
        self.mint.keyset_pubkeys(&keyset_id).await
    }

    async fn get_mint_keysets(&self) -> Result<KeysetResponse, Error> {
        self.mint.keysets().await
    }

    async fn post_mint_quote(
        &self,
        request: MintQuoteBolt11Request,
    ) -> Result<MintQuoteBolt11Response, Error> {
        self.mint.get_mint_quote(request).await
    }

    async fn get_mint_quote_status(
        &self,
        quote_id: &str,
    ) -> Result<MintQuoteBolt11Response, Error> {
        self.mint.check_mint_quote(quote_id).await
    }

    async fn post_mint(&self, request: MintBolt11Request) -> Result<MintBolt11Response, Error> {
        self.cached("/v1/mint/bolt11", &request, || {
            self.mint.process_mint_request(request.clone())
        })
        .await
    }

    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error> {
        self.cached("/v1/swap", &request, || {
            self.mint.process_swap_request(request.clone())
        })
        .await
    }

    async fn post_melt_quote(
        &self,
        request: MeltQuoteBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        self.mint.get_melt_quote(request).await
    }

    async fn get_melt_quote_status(
        &self,
        quote_id: &str,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        self.mint.check_melt_quote(quote_id).await
    }

    async fn post_melt(&self, request: MeltBolt11Request) -> Result<MeltQuoteBolt11Response, Error> {
        self.cached("/v1/melt/bolt11", &request, || {
            self.mint.process_melt_request(request.clone())
        })
        .await
    }

    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> Result<CheckStateResponse, Error> {
        self.mint.check_state(&request).await
    }

    async fn post_restore(&self, request: RestoreRequest) -> Result<RestoreResponse, Error> {
        self.mint.process_restore_request(request).await
    }
}
