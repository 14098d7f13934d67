use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stellar_xdr::curr::{ContractDataDurability, ScMap, ScVal};
use tracing::*;
use url::Url;

use crate::{
    errors::{FarmError, FarmResult},
    types::{Fingerprint, RoundState},
    utils::{retry, RETRY_DELAY, RETRY_TIMES},
    xdr,
};

const INDEX_KEY: &str = "Index";
const DIFFICULTY_KEY: &str = "Difficulty";
const PAUSED_KEY: &str = "Paused";
const BLOCK_KEY: &str = "Block";

/// Read access to the farm contract's round metadata.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn read_round_state(&self) -> FarmResult<RoundState>;

    async fn read_round_fingerprint(&self, index: u64) -> FarmResult<Fingerprint>;
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize, Debug)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize, Debug)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Serialize)]
struct LedgerEntriesParams {
    keys: Vec<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LedgerEntriesResult {
    #[serde(default)]
    entries: Option<Vec<LedgerEntryResult>>,
    latest_ledger: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct LedgerEntryResult {
    key: String,
    xdr: String,
}

/// Soroban JSON-RPC reader for the farm contract's storage.
pub struct RpcChainClient {
    url: Url,
    contract: [u8; 32],
    client: reqwest::Client,
}

impl RpcChainClient {
    pub fn new(endpoint: &str, contract_id: &str, timeout: Duration) -> FarmResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(endpoint, contract_id, client)
    }

    fn with_client(endpoint: &str, contract_id: &str, client: reqwest::Client) -> FarmResult<Self> {
        let url = Url::parse(endpoint)
            .map_err(|err| FarmError::Config(format!("invalid rpc url `{endpoint}`: {err}")))?;
        let contract = xdr::decode_contract(contract_id)?;
        Ok(Self { url, contract, client })
    }

    /// Reads one persistent contract-data entry; `None` when the ledger has no such entry.
    async fn read_entry(&self, key: ScVal) -> FarmResult<Option<ScVal>> {
        let encoded = xdr::contract_data_key(&self.contract, key, ContractDataDurability::Persistent)?;
        let params = LedgerEntriesParams { keys: vec![encoded.clone()] };

        let result: LedgerEntriesResult = self.request("getLedgerEntries", &params).await?;
        trace!("ledger entries at {:?}", result.latest_ledger);

        let Some(entry) = result.entries.unwrap_or_default().into_iter().find(|e| e.key == encoded)
        else {
            return Ok(None);
        };

        let entry = xdr::decode_contract_data(&entry.xdr)?;
        Ok(Some(entry.val))
    }

    async fn request<P, R>(&self, method: &str, params: &P) -> FarmResult<R>
    where
        P: Serialize + Sync,
        R: serde::de::DeserializeOwned, {
        let payload = RpcRequest { jsonrpc: "2.0", id: 1, method, params };

        let send = || async {
            self.client
                .post(self.url.clone())
                .header("Content-Type", "application/json")
                .json(&payload)
                .send()
                .await
                .and_then(|response| response.error_for_status())
        };
        let response = retry(send, RETRY_TIMES, RETRY_DELAY).await?;

        let text = response.text().await?;
        let response: RpcResponse<R> = serde_json::from_str(&text).map_err(|err| {
            FarmError::MalformedEntry(format!("fail to deserialize {method} response: {err:#}, response: {text}"))
        })?;

        match (response.result, response.error) {
            (_, Some(err)) => Err(FarmError::Rpc { code: err.code, message: err.message }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(FarmError::MalformedEntry(format!("{method} returned neither result nor error"))),
        }
    }

    async fn read_block(&self, index: u64) -> FarmResult<ScVal> {
        self.read_entry(xdr::tuple_key(BLOCK_KEY, ScVal::U64(index))?)
            .await?
            .ok_or_else(|| FarmError::MalformedEntry(format!("block {index} not found")))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn read_round_state(&self) -> FarmResult<RoundState> {
        let instance = self
            .read_entry(ScVal::LedgerKeyContractInstance)
            .await?
            .ok_or_else(|| FarmError::MalformedEntry("contract instance not found".to_string()))?;

        let storage = match instance {
            ScVal::ContractInstance(instance) => instance.storage,
            other => return Err(FarmError::MalformedEntry(format!("unexpected instance value {other:?}"))),
        };
        let storage = storage.as_ref();

        let index = slot(storage, INDEX_KEY)?
            .and_then(xdr::as_u64)
            .ok_or_else(|| FarmError::MalformedEntry("round index missing".to_string()))?;
        let difficulty = slot(storage, DIFFICULTY_KEY)?
            .and_then(xdr::as_u64)
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| FarmError::MalformedEntry("difficulty missing".to_string()))?;
        let halted = slot(storage, PAUSED_KEY)?.and_then(xdr::as_bool).unwrap_or(false);

        let block = self.read_block(index).await?;
        let fingerprint = block_fingerprint(&block, index)?;
        let miner = xdr::field(&block, "miner")
            .and_then(xdr::as_address)
            .map(xdr::address_strkey)
            .unwrap_or_default();

        Ok(RoundState { index, difficulty, fingerprint, miner, halted })
    }

    async fn read_round_fingerprint(&self, index: u64) -> FarmResult<Fingerprint> {
        let block = self.read_block(index).await?;
        block_fingerprint(&block, index)
    }
}

fn slot<'a>(storage: Option<&'a ScMap>, name: &str) -> FarmResult<Option<&'a ScVal>> {
    let key = xdr::unit_key(name)?;
    Ok(storage.and_then(|map| xdr::lookup(map, &key)))
}

fn block_fingerprint(block: &ScVal, index: u64) -> FarmResult<Fingerprint> {
    xdr::field(block, "hash")
        .and_then(xdr::as_bytes32)
        .map(Fingerprint)
        .ok_or_else(|| FarmError::MalformedEntry(format!("block {index} has no 32-byte hash")))
}
