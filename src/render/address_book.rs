use alloy_primitives::{Address, address};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::models::traces::AnnotatedCallFrame;

const KNOWN_ADDRESSES: &[(Address, &str)] = &[
    (address!("def1c0ded9bec7f1a1670819833240f027b25eff"), "ExchangeProxy"),
    (address!("22f9dcf4647084d6c31b2765f6910cd85c178c18"), "FlashWallet"),
    (address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"), "ETH"),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenList {
    tokens: Vec<TokenEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenEntry {
    address: Address,
    symbol: String,
    #[serde(default)]
    chain_id: Option<u64>,
}

/// Display labels for addresses, used only when rendering.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    names: HashMap<Address, String>,
}

impl AddressBook {
    /// Book holding the well-known protocol addresses.
    pub fn new() -> Self {
        let mut book = Self::default();
        for (address, name) in KNOWN_ADDRESSES {
            book.insert(*address, *name);
        }
        book
    }

    pub fn insert(&mut self, address: Address, name: impl Into<String>) {
        self.names.insert(address, name.into());
    }

    pub fn label(&self, address: &Address) -> Option<&str> {
        self.names.get(address).map(String::as_str)
    }

    /// Adds token symbols from every token-list file in `dir`. Entries tagged
    /// with another chain id are skipped.
    pub fn load_tokenlists<P: AsRef<Path>>(&mut self, dir: P, network_id: u64) -> Result<usize> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read token list directory {}", dir.display()))?;

        let mut added = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let list = match read_token_list(&path) {
                Ok(list) => list,
                Err(e) => {
                    warn!("Skipping token list {}: {:#}", path.display(), e);
                    continue;
                }
            };
            for token in list.tokens {
                if token.chain_id.is_some_and(|chain_id| chain_id != network_id) {
                    continue;
                }
                // Hand-curated names win over token lists
                if !self.names.contains_key(&token.address) {
                    self.insert(token.address, token.symbol);
                    added += 1;
                }
            }
        }

        info!("Loaded {} token labels from {}", added, dir.display());
        Ok(added)
    }

    /// Labels the transaction's sender and target. These override every other
    /// label for the duration of one rendering.
    pub fn with_participants(mut self, root: &AnnotatedCallFrame) -> Self {
        if let Some(from) = root.from {
            self.insert(from, "Sender");
        }
        if let Some(to) = root.code_address.or(root.address) {
            self.insert(to, "To");
        }
        self
    }
}

fn read_token_list(path: &Path) -> Result<TokenList> {
    let contents = fs::read_to_string(path).context("failed to read token list")?;
    serde_json::from_str(&contents).context("failed to parse token list")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::traces::Operation;

    #[test]
    fn test_known_and_participant_labels() {
        let exchange = address!("def1c0ded9bec7f1a1670819833240f027b25eff");
        let book = AddressBook::new();
        assert_eq!(book.label(&exchange), Some("ExchangeProxy"));

        let mut root = AnnotatedCallFrame::new(Operation::Call, 0);
        root.from = Some(Address::repeat_byte(0x01));
        root.address = Some(exchange);
        root.code_address = Some(exchange);

        let book = book.with_participants(&root);
        assert_eq!(book.label(&Address::repeat_byte(0x01)), Some("Sender"));
        assert_eq!(book.label(&exchange), Some("To"));
    }

    #[test]
    fn test_load_tokenlists() {
        let dir = std::env::temp_dir().join(format!("tx-trace-tokens-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("tokens.json"),
            r#"{"name":"test","tokens":[
                {"chainId":1,"address":"0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2","symbol":"WETH","name":"Wrapped Ether"},
                {"chainId":137,"address":"0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619","symbol":"WETH","name":"Wrapped Ether"},
                {"address":"0x6B175474E89094C44Da98b954EedeAC495271d0F","symbol":"DAI"}
            ]}"#,
        )
        .unwrap();
        fs::write(dir.join("bad.json"), "[]").unwrap();

        let mut book = AddressBook::new();
        let added = book.load_tokenlists(&dir, 1).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(added, 2);
        assert_eq!(book.label(&address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")), Some("WETH"));
        assert!(book.label(&address!("7ceb23fd6bc0add59e62ac25578270cff1b9f619")).is_none());
    }
}
