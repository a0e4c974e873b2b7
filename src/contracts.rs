use anyhow::Result;
use ethers::{
    abi::{Abi, Token},
    types::{Address, Bytes, U256},
};
use log::debug;

use crate::abi::Artifact;
use crate::error::SessionError;
use crate::provider::Ledger;

/// A contract interface bound to the network the session is connected to.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    pub name: String,
    pub abi: Abi,
    /// `None` for interface-only artifacts that were never deployed.
    pub address: Option<Address>,
    pub network_id: String,
}

impl ContractHandle {
    pub fn bind(artifact: Artifact, network_id: &str) -> Self {
        let address = artifact.deployed_address(network_id);
        Self {
            name: artifact.contract_name,
            abi: artifact.abi,
            address,
            network_id: network_id.to_string(),
        }
    }

    /// Address of the deployed instance, failing like Truffle's `deployed()` when there is none.
    pub fn deployed(&self) -> Result<Address, SessionError> {
        self.address.ok_or_else(|| SessionError::NotDeployed {
            name: self.name.clone(),
            network: self.network_id.clone(),
        })
    }

    /// ABI-encoded calldata for `method`. Overloads resolve to the first declaration.
    pub fn encode_call(&self, method: &str, args: &[Token]) -> Result<Bytes> {
        let function = self
            .abi
            .function(method)
            .map_err(|_| self.unknown_method(method))?;
        Ok(function.encode_input(args)?.into())
    }

    /// Runs a view `method` and returns its decoded outputs.
    pub async fn call_view(
        &self,
        ledger: &dyn Ledger,
        method: &str,
        args: &[Token],
    ) -> Result<Vec<Token>> {
        let address = self.deployed()?;
        let data = self.encode_call(method, args)?;
        debug!("{}.{} -> {:?}", self.name, method, address);

        let output = ledger.call(address, data).await?;
        let function = self
            .abi
            .function(method)
            .map_err(|_| self.unknown_method(method))?;
        Ok(function.decode_output(&output)?)
    }

    pub async fn call_u256(&self, ledger: &dyn Ledger, method: &str, args: &[Token]) -> Result<U256> {
        let outputs = self.call_view(ledger, method, args).await?;
        match outputs.into_iter().next().and_then(Token::into_uint) {
            Some(value) => Ok(value),
            None => Err(SessionError::UnexpectedReturn {
                contract: self.name.clone(),
                method: method.to_string(),
            }
            .into()),
        }
    }

    fn unknown_method(&self, method: &str) -> SessionError {
        SessionError::UnknownMethod {
            contract: self.name.clone(),
            method: method.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockLedger;
    use std::str::FromStr;

    const BAGEL: &str = r#"{
        "contractName": "Bagel",
        "abi": [
            {"constant":true,"inputs":[],"name":"totalSupply","outputs":[{"name":"","type":"uint256"}],"stateMutability":"view","type":"function"},
            {"constant":true,"inputs":[{"name":"who","type":"string"}],"name":"balanceOf","outputs":[{"name":"","type":"uint256"}],"stateMutability":"view","type":"function"},
            {"constant":true,"inputs":[],"name":"owner","outputs":[{"name":"","type":"address"}],"stateMutability":"view","type":"function"}
        ],
        "networks": {"4": {"address": "0x44d936C8Ce21eb6f55e11c4cd782894c0D20ECF2"}}
    }"#;

    fn bagel(network: &str) -> ContractHandle {
        ContractHandle::bind(Artifact::from_json("Bagel.json", BAGEL).unwrap(), network)
    }

    #[test]
    fn test_bind_resolves_network_address() {
        let handle = bagel("4");
        assert_eq!(
            handle.deployed().unwrap(),
            Address::from_str("0x44d936C8Ce21eb6f55e11c4cd782894c0D20ECF2").unwrap()
        );

        let elsewhere = bagel("1");
        assert!(matches!(
            elsewhere.deployed(),
            Err(SessionError::NotDeployed { .. })
        ));
    }

    #[test]
    fn test_encode_unknown_method() {
        let handle = bagel("4");
        let err = handle.encode_call("mint", &[]).unwrap_err();
        assert!(err.to_string().contains("mint"));
    }

    #[tokio::test]
    async fn test_call_u256_decodes_output() {
        let handle = bagel("4");
        let expected = handle.encode_call("balanceOf", &[Token::String("riesling".into())]).unwrap();

        let mut ledger = MockLedger::new();
        ledger
            .expect_call()
            .withf(move |_, data| data == &expected)
            .times(1)
            .returning(|_, _| Ok(ethers::abi::encode(&[Token::Uint(U256::from(42))]).into()));

        let balance = handle
            .call_u256(&ledger, "balanceOf", &[Token::String("riesling".into())])
            .await
            .unwrap();
        assert_eq!(balance, U256::from(42));
    }

    #[tokio::test]
    async fn test_call_u256_rejects_non_integer() {
        let handle = bagel("4");
        let mut ledger = MockLedger::new();
        ledger
            .expect_call()
            .returning(|_, _| Ok(ethers::abi::encode(&[Token::Address(Address::zero())]).into()));

        let result = handle.call_u256(&ledger, "owner", &[]).await;
        assert!(result.is_err());
    }
}
