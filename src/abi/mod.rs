//! Contract descriptor loading.
//!
//! Descriptors are Truffle build artifacts: a JSON document carrying the
//! contract name, its ABI and the address it was deployed at per network id.
//! They are read either from a local directory or fetched from an HTTP base
//! URL as `<base>/<Name>.json`.

use ethers::abi::Abi;
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::SessionError;

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDeployment {
    pub address: Address,
    #[serde(default, rename = "transactionHash")]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    #[serde(rename = "contractName")]
    pub contract_name: String,
    pub abi: Abi,
    #[serde(default)]
    pub networks: HashMap<String, NetworkDeployment>,
}

impl Artifact {
    pub fn from_json(source: &str, json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|e| SessionError::ArtifactParse {
            path: source.to_string(),
            source: e,
        })
    }

    /// Deployed address on `network_id`, if the artifact records one.
    pub fn deployed_address(&self, network_id: &str) -> Option<Address> {
        self.networks.get(network_id).map(|d| d.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Directory(PathBuf),
    Remote(url::Url),
}

impl ArtifactSource {
    pub fn parse(location: &str) -> Self {
        match url::Url::parse(location) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                ArtifactSource::Remote(url)
            }
            _ => ArtifactSource::Directory(PathBuf::from(location)),
        }
    }

    pub async fn load(&self, name: &str) -> Result<Artifact, SessionError> {
        let filename = format!("{}.json", name);
        match self {
            ArtifactSource::Directory(dir) => {
                let path = dir.join(&filename);
                let display = path.display().to_string();
                let json = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    SessionError::ArtifactRead {
                        path: display.clone(),
                        message: e.to_string(),
                    }
                })?;
                Artifact::from_json(&display, &json)
            }
            ArtifactSource::Remote(base) => {
                let url = remote_url(base, &filename)?;
                let read_err = |e: reqwest::Error| SessionError::ArtifactRead {
                    path: url.to_string(),
                    message: e.to_string(),
                };
                let json = reqwest::get(url.clone())
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(read_err)?
                    .text()
                    .await
                    .map_err(read_err)?;
                Artifact::from_json(url.as_str(), &json)
            }
        }
    }
}

fn remote_url(base: &url::Url, filename: &str) -> Result<url::Url, SessionError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(filename).map_err(|e| SessionError::ArtifactRead {
        path: format!("{}{}", base, filename),
        message: e.to_string(),
    })
}
