// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A mock ethers transport for tests.
//!
//! Responses are looked up in order by exact `(method, params)`, then for
//! `eth_call` by the `(to, data)` of the call object, then by method alone.

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, ProviderError, RpcError};
use ethers::types::{Address as EthAddress, Bytes};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum EthMockProviderError {
    #[error("No mock response for {0}")]
    NoResponse(String),
    #[error("Mock failure for {0}")]
    Injected(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl RpcError for EthMockProviderError {
    fn as_error_response(&self) -> Option<&JsonRpcError> {
        None
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        match self {
            EthMockProviderError::SerdeJson(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EthMockProviderError> for ProviderError {
    fn from(e: EthMockProviderError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(e))
    }
}

#[derive(Default, Debug)]
struct MockState {
    exact: HashMap<(String, String), Value>,
    calls: HashMap<(EthAddress, Bytes), Value>,
    by_method: HashMap<String, Value>,
    failing: HashSet<String>,
    requests: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct EthMockProvider {
    state: Arc<Mutex<MockState>>,
}

impl EthMockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response<P: Serialize, R: Serialize>(
        &self,
        method: &str,
        params: P,
        response: R,
    ) -> Result<(), serde_json::Error> {
        let params = serde_json::to_string(&params)?;
        let response = serde_json::to_value(response)?;
        self.state
            .lock()
            .unwrap()
            .exact
            .insert((method.to_string(), params), response);
        Ok(())
    }

    /// Response for any `eth_call` to `to` with calldata `data`.
    pub fn add_call_response(&self, to: EthAddress, data: impl Into<Bytes>, output: Bytes) {
        self.state
            .lock()
            .unwrap()
            .calls
            .insert((to, data.into()), serde_json::to_value(output).unwrap());
    }

    /// Response for any request of `method`, whatever the params.
    pub fn add_method_response<R: Serialize>(&self, method: &str, response: R) {
        self.state
            .lock()
            .unwrap()
            .by_method
            .insert(method.to_string(), serde_json::to_value(response).unwrap());
    }

    /// Every request of `method` fails until `recover` is called.
    pub fn fail_method(&self, method: &str) {
        self.state.lock().unwrap().failing.insert(method.to_string());
    }

    pub fn recover(&self, method: &str) {
        self.state.lock().unwrap().failing.remove(method);
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }

    fn lookup(&self, method: &str, params: &Value) -> Result<Value, EthMockProviderError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(method.to_string());
        if state.failing.contains(method) {
            return Err(EthMockProviderError::Injected(method.to_string()));
        }
        let key = (method.to_string(), serde_json::to_string(params)?);
        if let Some(v) = state.exact.get(&key) {
            return Ok(v.clone());
        }
        if method == "eth_call" {
            let call = &params[0];
            let to = serde_json::from_value::<EthAddress>(call["to"].clone()).ok();
            let data = call
                .get("data")
                .or_else(|| call.get("input"))
                .and_then(|d| serde_json::from_value::<Bytes>(d.clone()).ok());
            if let (Some(to), Some(data)) = (to, data) {
                if let Some(v) = state.calls.get(&(to, data)) {
                    return Ok(v.clone());
                }
            }
        }
        state
            .by_method
            .get(method)
            .cloned()
            .ok_or_else(|| EthMockProviderError::NoResponse(format!("{} {}", key.0, key.1)))
    }
}

#[async_trait]
impl JsonRpcClient for EthMockProvider {
    type Error = EthMockProviderError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, Self::Error> {
        let params = serde_json::to_value(&params)?;
        let response = self.lookup(method, &params)?;
        Ok(serde_json::from_value(response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{Middleware, Provider};
    use ethers::types::U64;

    #[tokio::test]
    async fn test_exact_and_fallback_responses() {
        let mock = EthMockProvider::new();
        let provider = Provider::new(mock.clone());

        mock.add_method_response("eth_blockNumber", U64::from(10));
        assert_eq!(provider.get_block_number().await.unwrap(), U64::from(10));

        mock.fail_method("eth_blockNumber");
        assert!(provider.get_block_number().await.is_err());
        mock.recover("eth_blockNumber");
        assert!(provider.get_block_number().await.is_ok());
        assert_eq!(mock.request_count("eth_blockNumber"), 3);

        // Unregistered methods fail
        assert!(provider.get_chainid().await.is_err());
    }
}
