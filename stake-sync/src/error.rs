// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::providers::ProviderError;
use ethers::types::{Address as EthAddress, TxHash, U256};

/// Why a submitted transaction never reached a successful receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationFailure {
    // Included, but the receipt status is 0
    Reverted,
    // No receipt before the confirmation timeout
    TimedOut,
    // The node forgot about the transaction
    Dropped,
}

impl std::fmt::Display for ConfirmationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfirmationFailure::Reverted => "reverted",
            ConfirmationFailure::TimedOut => "timed out",
            ConfirmationFailure::Dropped => "dropped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakeError {
    // Node returned an error or could not be reached
    #[error("Provider error: {0}")]
    ProviderError(String),
    // Connection level failure worth retrying
    #[error("Transient provider error: {0}")]
    TransientProviderError(String),
    // Response decoded but does not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    // withdrawAmount returned more unlocked than requested
    #[error("Invalid withdraw state: unlocked {unlocked} exceeds requested {requested}")]
    InvalidWithdrawState { requested: U256, unlocked: U256 },
    // No signer was injected into the adapter
    #[error("Wallet unavailable: no signer configured")]
    WalletUnavailable,
    // The node or the signer refused the transaction
    #[error("Transaction submission failed: {0}")]
    SubmissionFailed(String),
    #[error("Transaction {tx_hash:?} {reason}")]
    ConfirmationFailed {
        tx_hash: TxHash,
        reason: ConfirmationFailure,
    },
    #[error("Network mismatch: expected chain {expected}, connected to chain {actual}")]
    NetworkMismatch { expected: u64, actual: u64 },
    #[error("Account mismatch: expected {expected:?}, signer is {actual:?}")]
    AccountMismatch {
        expected: EthAddress,
        actual: EthAddress,
    },
    #[error("No account connected")]
    AccountNotConnected,
    #[error("Insufficient balance: needs {needed}, has {available}")]
    InsufficientBalance { needed: U256, available: U256 },
    // Operation makes no sense for this pool (e.g. approve on the native pool)
    #[error("Not applicable: {0}")]
    NotApplicable(String),
    // The sync instance was unmounted while the call was running
    #[error("Stake sync has been unmounted")]
    Unmounted,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Generic(String),
}

impl StakeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            StakeError::ProviderError(_) => "provider_error",
            StakeError::TransientProviderError(_) => "transient_provider_error",
            StakeError::InvalidResponse(_) => "invalid_response",
            StakeError::InvalidWithdrawState { .. } => "invalid_withdraw_state",
            StakeError::WalletUnavailable => "wallet_unavailable",
            StakeError::SubmissionFailed(_) => "submission_failed",
            StakeError::ConfirmationFailed { .. } => "confirmation_failed",
            StakeError::NetworkMismatch { .. } => "network_mismatch",
            StakeError::AccountMismatch { .. } => "account_mismatch",
            StakeError::AccountNotConnected => "account_not_connected",
            StakeError::InsufficientBalance { .. } => "insufficient_balance",
            StakeError::NotApplicable(_) => "not_applicable",
            StakeError::Unmounted => "unmounted",
            StakeError::InvalidConfig(_) => "invalid_config",
            StakeError::Generic(_) => "generic",
        }
    }

    /// Whether retrying the same read could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StakeError::ProviderError(_) | StakeError::TransientProviderError(_)
        )
    }

    /// Errors raised before anything was sent to the chain
    pub fn is_configuration_mismatch(&self) -> bool {
        matches!(
            self,
            StakeError::NetworkMismatch { .. }
                | StakeError::AccountMismatch { .. }
                | StakeError::AccountNotConnected
        )
    }
}

impl From<ProviderError> for StakeError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::HTTPError(err) => StakeError::TransientProviderError(err.to_string()),
            other => StakeError::ProviderError(other.to_string()),
        }
    }
}

pub type StakeResult<T> = Result<T, StakeError>;
