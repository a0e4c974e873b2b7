use colored::Colorize;
use ethers::types::{Address, H256, U256};
use log::info;

/// One rendered region of the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayUpdate {
    Account(Option<Address>),
    LastFunctions(Vec<String>),
    TokenPrice(String),
    TokensClaimed(U256),
    TokensAvailable(U256),
    Progress(Option<f64>),
    Balance(U256),
    LastTransfers(Vec<H256>),
}

impl DisplayUpdate {
    pub fn region(&self) -> &'static str {
        match self {
            DisplayUpdate::Account(_) => "account",
            DisplayUpdate::LastFunctions(_) => "last-5-functions",
            DisplayUpdate::TokenPrice(_) => "token-price",
            DisplayUpdate::TokensClaimed(_) => "tokens-claimed",
            DisplayUpdate::TokensAvailable(_) => "tokens-available",
            DisplayUpdate::Progress(_) => "progress",
            DisplayUpdate::Balance(_) => "bagel-balance",
            DisplayUpdate::LastTransfers(_) => "last-5-transfers",
        }
    }

    pub fn text(&self) -> String {
        match self {
            DisplayUpdate::Account(Some(account)) => format!("Your Account: {:?}", account),
            DisplayUpdate::Account(None) => "Your Account: 0x0".to_string(),
            DisplayUpdate::LastFunctions(calls) => calls.join(" | "),
            DisplayUpdate::TokenPrice(price) => price.clone(),
            DisplayUpdate::TokensClaimed(value)
            | DisplayUpdate::TokensAvailable(value)
            | DisplayUpdate::Balance(value) => value.to_string(),
            DisplayUpdate::Progress(Some(percent)) => format!("{:.2}%", percent),
            DisplayUpdate::Progress(None) => "n/a".to_string(),
            DisplayUpdate::LastTransfers(hashes) => hashes
                .iter()
                .map(|h| format!("{:?}", h))
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// Output side of a session: where rendered figures end up.
#[cfg_attr(test, mockall::automock)]
pub trait DisplaySink: Send + Sync {
    fn show(&self, update: DisplayUpdate);

    /// Loader visible while a render cycle is running.
    fn set_loading(&self, loading: bool);
}

#[derive(Debug, Default)]
pub struct ConsoleDisplay;

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self
    }
}

impl DisplaySink for ConsoleDisplay {
    fn show(&self, update: DisplayUpdate) {
        info!("{:>18} {}", update.region().cyan().bold(), update.text());
    }

    fn set_loading(&self, loading: bool) {
        if loading {
            info!("{}", "loading...".dimmed());
        } else {
            info!("{}", "render complete".green());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_match_page_targets() {
        assert_eq!(DisplayUpdate::Balance(U256::zero()).region(), "bagel-balance");
        assert_eq!(DisplayUpdate::LastFunctions(vec![]).region(), "last-5-functions");
        assert_eq!(DisplayUpdate::LastTransfers(vec![]).region(), "last-5-transfers");
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(DisplayUpdate::Account(None).text(), "Your Account: 0x0");
        assert_eq!(DisplayUpdate::Progress(Some(12.5)).text(), "12.50%");
        assert_eq!(DisplayUpdate::Progress(None).text(), "n/a");
        assert_eq!(
            DisplayUpdate::LastFunctions(vec!["a".into(), "b".into()]).text(),
            "a | b"
        );
    }
}
