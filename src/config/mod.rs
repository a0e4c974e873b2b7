use anyhow::{anyhow, Result};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};
use validator::{Validate, ValidationError};

use crate::utils::{env_or, get_env};

pub const DEFAULT_PROVIDER_URL: &str = "ws://localhost:8545";
pub const DEFAULT_ARTIFACTS_LOCATION: &str = "artifacts";
pub const DEFAULT_CONTRACTS: &[&str] = &["ERC223Interface", "ContractReceiver", "Bagel"];
pub const DEFAULT_SALE_CONTRACT: &str = "Bagel";

/// Address whose incoming calls are listed as "last 5 functions".
pub const DEFAULT_CALL_TARGET: &str = "0x44d936c8ce21eb6f55e11c4cd782894c0d20ecf2";

pub const DEFAULT_SCAN_START_BLOCK: u64 = 4_070_430;
pub const DEFAULT_SCAN_FLOOR_BLOCK: u64 = 4_070_279;
pub const DEFAULT_EVENTS_FROM_BLOCK: u64 = 4_070_279;
pub const DEFAULT_SCAN_LIMIT: usize = 5;
pub const DEFAULT_BALANCE_HOLDER: &str = "riesling";

/// 0.01 ether
pub const DEFAULT_TOKEN_PRICE_WEI: u64 = 10_000_000_000_000_000;
pub const DEFAULT_TOTAL_SUPPLY: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Block and transaction fetches overlap; results arrive in resolution order.
    Concurrent,
    /// One fetch at a time, strictly newest first.
    Sequential,
}

impl FromStr for ScanMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "concurrent" => Ok(ScanMode::Concurrent),
            "sequential" => Ok(ScanMode::Sequential),
            other => Err(anyhow!("unknown scan mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DashboardConfig {
    // Provider selection
    #[validate(custom = "validate_provider_url")]
    pub default_provider_url: String,
    pub host_provider_url: Option<String>,

    // Contract descriptors
    #[validate(length(min = 1))]
    pub artifacts_location: String,
    #[validate(length(min = 1))]
    pub contracts: Vec<String>,
    #[validate(length(min = 1))]
    pub sale_contract: String,

    // Recent call scan
    #[validate(custom = "validate_address")]
    pub call_target: Address,
    pub scan_start_block: u64,
    pub scan_floor_block: u64,
    #[validate(range(min = 1, max = 100))]
    pub scan_limit: usize,
    pub scan_mode: ScanMode,
    #[validate(range(min = 1, max = 256))]
    pub scan_concurrency: usize,

    // Events
    pub events_from_block: u64,
    pub watch_events: bool,

    // Sale figures
    #[validate(length(min = 1))]
    pub balance_holder: String,
    pub token_price_wei: U256,

    // Runtime
    pub poll_interval: Duration,
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            default_provider_url: DEFAULT_PROVIDER_URL.to_string(),
            host_provider_url: None,
            artifacts_location: DEFAULT_ARTIFACTS_LOCATION.to_string(),
            contracts: DEFAULT_CONTRACTS.iter().map(|name| name.to_string()).collect(),
            sale_contract: DEFAULT_SALE_CONTRACT.to_string(),
            call_target: Address::from_str(DEFAULT_CALL_TARGET).unwrap_or_default(),
            scan_start_block: DEFAULT_SCAN_START_BLOCK,
            scan_floor_block: DEFAULT_SCAN_FLOOR_BLOCK,
            scan_limit: DEFAULT_SCAN_LIMIT,
            scan_mode: ScanMode::Concurrent,
            scan_concurrency: 8,
            events_from_block: DEFAULT_EVENTS_FROM_BLOCK,
            watch_events: true,
            balance_holder: DEFAULT_BALANCE_HOLDER.to_string(),
            token_price_wei: U256::from(DEFAULT_TOKEN_PRICE_WEI),
            poll_interval: Duration::from_secs(15),
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let contracts = match get_env("CONTRACTS") {
            Some(raw) => raw
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            None => defaults.contracts,
        };

        let call_target = match get_env("CALL_TARGET") {
            Some(raw) => Address::from_str(raw.trim())
                .map_err(|e| anyhow!("CALL_TARGET is not an address: {}", e))?,
            None => defaults.call_target,
        };

        let token_price_wei = match get_env("TOKEN_PRICE_WEI") {
            Some(raw) => U256::from_dec_str(raw.trim())
                .map_err(|e| anyhow!("TOKEN_PRICE_WEI is not a decimal integer: {}", e))?,
            None => defaults.token_price_wei,
        };

        let metrics_port = match get_env("METRICS_PORT") {
            Some(raw) => Some(raw.trim().parse::<u16>()?),
            None => None,
        };

        Ok(Self {
            default_provider_url: env_or("DEFAULT_PROVIDER_URL", defaults.default_provider_url)?,
            host_provider_url: get_env("HOST_PROVIDER_URL"),
            artifacts_location: env_or("ARTIFACTS_LOCATION", defaults.artifacts_location)?,
            contracts,
            sale_contract: env_or("SALE_CONTRACT", defaults.sale_contract)?,
            call_target,
            scan_start_block: env_or("SCAN_START_BLOCK", defaults.scan_start_block)?,
            scan_floor_block: env_or("SCAN_FLOOR_BLOCK", defaults.scan_floor_block)?,
            scan_limit: env_or("SCAN_LIMIT", defaults.scan_limit)?,
            scan_mode: env_or("SCAN_MODE", defaults.scan_mode)?,
            scan_concurrency: env_or("SCAN_CONCURRENCY", defaults.scan_concurrency)?,
            events_from_block: env_or("EVENTS_FROM_BLOCK", defaults.events_from_block)?,
            watch_events: env_or("WATCH_EVENTS", defaults.watch_events)?,
            balance_holder: env_or("BALANCE_HOLDER", defaults.balance_holder)?,
            token_price_wei,
            poll_interval: Duration::from_secs(env_or("POLL_INTERVAL_SECS", 15u64)?),
            log_level: env_or("LOG_LEVEL", defaults.log_level)?,
            metrics_port,
        })
    }

    /// The injected endpoint wins over the configured default.
    pub fn provider_url(&self) -> &str {
        self.host_provider_url
            .as_deref()
            .unwrap_or(&self.default_provider_url)
    }

    pub fn validate_all(&self) -> Result<()> {
        if let Err(e) = self.validate() {
            return Err(anyhow!("Configuration validation failed: {:?}", e));
        }

        self.validate_scan_range()?;
        self.validate_contract_list()?;
        self.validate_runtime()?;

        if let Some(url) = &self.host_provider_url {
            validate_provider_url(url)
                .map_err(|_| anyhow!("HOST_PROVIDER_URL has an unsupported scheme: {}", url))?;
        }

        Ok(())
    }

    fn validate_scan_range(&self) -> Result<()> {
        if self.scan_start_block < self.scan_floor_block {
            return Err(anyhow!(
                "scan start block {} is below the floor block {}",
                self.scan_start_block,
                self.scan_floor_block
            ));
        }
        Ok(())
    }

    fn validate_contract_list(&self) -> Result<()> {
        if !self.contracts.iter().any(|name| name == &self.sale_contract) {
            return Err(anyhow!(
                "sale contract {} is not in the contract list {:?}",
                self.sale_contract,
                self.contracts
            ));
        }
        Ok(())
    }

    fn validate_runtime(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be at least one second"));
        }
        Ok(())
    }
}

fn validate_provider_url(url: &str) -> Result<(), ValidationError> {
    let parsed = url::Url::parse(url).map_err(|_| ValidationError::new("invalid_provider_url"))?;
    match parsed.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(()),
        _ => Err(ValidationError::new("invalid_provider_url")),
    }
}

fn validate_address(address: &Address) -> Result<(), ValidationError> {
    if address == &Address::zero() {
        return Err(ValidationError::new("zero_address"));
    }
    Ok(())
}
