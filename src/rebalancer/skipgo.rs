//! External routing API client.

use crate::error::RoutingError;
use alloy::primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use url::Url;

type Result<T> = std::result::Result<T, RoutingError>;

/// Terminal success state of a routed transfer leg.
pub const STATE_COMPLETED_SUCCESS: &str = "STATE_COMPLETED_SUCCESS";
/// Terminal error state of a routed transfer leg.
pub const STATE_COMPLETED_ERROR: &str = "STATE_COMPLETED_ERROR";

/// A route quote between two chains.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteResponse {
    /// Amount delivered on the destination, in the destination denom.
    pub amount_out: String,
    /// Opaque route operations, passed back verbatim when requesting
    /// messages.
    pub operations: Vec<serde_json::Value>,
    /// Chains an address must be supplied for, in order.
    pub required_chain_addresses: Vec<String>,
}

/// An ERC-20 approval a route transaction requires first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Erc20Approval {
    /// Token contract to approve.
    pub token_contract: String,
    /// Spender to approve.
    pub spender: String,
    /// Approval amount, decimal string.
    pub amount: String,
}

/// An EVM transaction produced by the routing API.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmTx {
    /// Chain to execute on.
    pub chain_id: String,
    /// Recipient contract.
    pub to: String,
    /// Native value to attach, decimal string.
    #[serde(default)]
    pub value: String,
    /// Hex calldata.
    #[serde(default)]
    pub data: String,
    /// The account that must sign.
    pub signer_address: String,
    /// Approvals that must land before this transaction.
    #[serde(default)]
    pub required_erc20_approvals: Vec<Erc20Approval>,
}

/// One transaction of a route's message set.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteTx {
    /// Set when the transaction executes on an EVM chain.
    #[serde(default)]
    pub evm_tx: Option<EvmTx>,
    /// Set when the transaction executes on a Cosmos chain.
    #[serde(default)]
    pub cosmos_tx: Option<serde_json::Value>,
}

/// State of one leg of a routed transfer.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferState {
    /// Leg state constant.
    pub state: String,
    /// Error description for failed legs.
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of the transfer status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    /// Per-leg transfer states.
    pub transfers: Vec<TransferState>,
}

/// The routing API surface the rebalancer consumes.
#[async_trait]
pub trait RoutingClient: Send + Sync + Debug {
    /// Quotes a USDC route between two chains.
    async fn route(
        &self,
        source_denom: &str,
        source_chain_id: &str,
        dest_denom: &str,
        dest_chain_id: &str,
        amount_in: U256,
    ) -> Result<RouteResponse>;

    /// Builds the transactions executing a quoted route.
    #[allow(clippy::too_many_arguments)]
    async fn msgs(
        &self,
        source_denom: &str,
        source_chain_id: &str,
        dest_denom: &str,
        dest_chain_id: &str,
        amount_in: U256,
        amount_out: U256,
        address_list: Vec<String>,
        operations: Vec<serde_json::Value>,
    ) -> Result<Vec<RouteTx>>;

    /// Registers a transaction for tracking.
    async fn track_tx(&self, tx_hash: &str, chain_id: &str) -> Result<String>;

    /// Current status of a tracked transaction.
    async fn status(&self, tx_hash: &str, chain_id: &str) -> Result<StatusResponse>;
}

/// HTTP client for the hosted routing API.
#[derive(Debug)]
pub struct SkipGo {
    http: reqwest::Client,
    base_url: Url,
}

impl SkipGo {
    pub fn new(base_url: Url) -> Self {
        Self { http: reqwest::Client::new(), base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self.http.post(self.endpoint(path)).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(RoutingError::Api(response.text().await.unwrap_or_default()));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RoutingClient for SkipGo {
    async fn route(
        &self,
        source_denom: &str,
        source_chain_id: &str,
        dest_denom: &str,
        dest_chain_id: &str,
        amount_in: U256,
    ) -> Result<RouteResponse> {
        self.post(
            "/v2/fungible/route",
            serde_json::json!({
                "amount_in": amount_in.to_string(),
                "source_asset_denom": source_denom,
                "source_asset_chain_id": source_chain_id,
                "dest_asset_denom": dest_denom,
                "dest_asset_chain_id": dest_chain_id,
                "allow_multi_tx": false,
                "allow_unsafe": true,
                "smart_swap_options": { "split_routes": true },
            }),
        )
        .await
    }

    async fn msgs(
        &self,
        source_denom: &str,
        source_chain_id: &str,
        dest_denom: &str,
        dest_chain_id: &str,
        amount_in: U256,
        amount_out: U256,
        address_list: Vec<String>,
        operations: Vec<serde_json::Value>,
    ) -> Result<Vec<RouteTx>> {
        #[derive(Deserialize)]
        struct MsgsResponse {
            txs: Vec<RouteTx>,
        }

        let response: MsgsResponse = self
            .post(
                "/v2/fungible/msgs",
                serde_json::json!({
                    "source_asset_denom": source_denom,
                    "source_asset_chain_id": source_chain_id,
                    "dest_asset_denom": dest_denom,
                    "dest_asset_chain_id": dest_chain_id,
                    "amount_in": amount_in.to_string(),
                    "amount_out": amount_out.to_string(),
                    "address_list": address_list,
                    "operations": operations,
                    "slippage_tolerance_percent": "1",
                }),
            )
            .await?;
        Ok(response.txs)
    }

    async fn track_tx(&self, tx_hash: &str, chain_id: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct TrackResponse {
            tx_hash: String,
        }

        let response: TrackResponse = self
            .post(
                "/v2/tx/track",
                serde_json::json!({ "tx_hash": tx_hash, "chain_id": chain_id }),
            )
            .await?;
        Ok(response.tx_hash)
    }

    async fn status(&self, tx_hash: &str, chain_id: &str) -> Result<StatusResponse> {
        let response = self
            .http
            .get(self.endpoint("/v2/tx/status"))
            .query(&[("tx_hash", tx_hash), ("chain_id", chain_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RoutingError::Api(response.text().await.unwrap_or_default()));
        }
        Ok(response.json().await?)
    }
}
