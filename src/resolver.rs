//! Token/chain resolution
//!
//! Answers "on which chains can this symbol be traded", merging three
//! sources in priority order: the built-in canonical table, the external
//! token-metadata registry, and the DEX listing index (base side only).
//! Results are cached per symbol with a shorter TTL for negative answers;
//! the caller-specific preference for chains with an active wallet is
//! applied per call, never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::registry::TokenLookup;
use crate::cache::TtlCache;
use crate::config::TokenEntry;
use crate::error::{Error, ErrorKind, Result};

/// Where a binding came from; lower priority rank wins on conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingSource {
    Known,
    Registry,
    DexListing,
}

impl BindingSource {
    pub fn priority(&self) -> u8 {
        match self {
            BindingSource::Known => 0,
            BindingSource::Registry => 1,
            BindingSource::DexListing => 2,
        }
    }
}

/// A resolved (symbol, network, contract) triple
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenBinding {
    pub symbol: String,
    pub network: String,
    pub contract_address: String,
    pub decimals: u8,
    pub is_native: bool,
    pub source: BindingSource,
    /// Liquidity-backed (listing index) or canonical
    pub verified: bool,
}

pub struct TokenResolver {
    builtin: HashMap<String, Vec<TokenBinding>>,
    sources: Vec<Arc<dyn TokenLookup>>,
    cache: TtlCache<String, Vec<TokenBinding>>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl TokenResolver {
    pub fn new(
        tokens: &[TokenEntry],
        sources: Vec<Arc<dyn TokenLookup>>,
        positive_ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        let mut builtin: HashMap<String, Vec<TokenBinding>> = HashMap::new();
        for entry in tokens {
            builtin
                .entry(entry.symbol.to_uppercase())
                .or_default()
                .push(TokenBinding {
                    symbol: entry.symbol.to_uppercase(),
                    network: entry.network.clone(),
                    contract_address: entry.address.to_lowercase(),
                    decimals: entry.decimals,
                    is_native: entry.native,
                    source: BindingSource::Known,
                    verified: true,
                });
        }
        Self {
            builtin,
            sources,
            cache: TtlCache::new(),
            positive_ttl,
            negative_ttl,
        }
    }

    /// Resolve a symbol to its ordered bindings. Chains where the caller
    /// has an active wallet move to the front without dropping the rest;
    /// an empty result is `TOKEN_NOT_FOUND`.
    pub async fn resolve(
        &self,
        symbol: &str,
        active_networks: &[String],
    ) -> Result<Vec<TokenBinding>> {
        let key = symbol.to_uppercase();
        let positive_ttl = self.positive_ttl;
        let negative_ttl = self.negative_ttl;

        let mut bindings = self
            .cache
            .get_or_load(
                key.clone(),
                |v: &Vec<TokenBinding>| {
                    if v.is_empty() {
                        negative_ttl
                    } else {
                        positive_ttl
                    }
                },
                || self.load(key.clone()),
            )
            .await?;

        if bindings.is_empty() {
            return Err(Error::TokenNotFound(symbol.to_string()));
        }

        // Stable partition: preferred chains first, original order kept on
        // both sides
        if !active_networks.is_empty() {
            let (preferred, rest): (Vec<_>, Vec<_>) = bindings
                .into_iter()
                .partition(|b| active_networks.contains(&b.network));
            bindings = preferred;
            bindings.extend(rest);
        }

        Ok(bindings)
    }

    pub fn invalidate(&self, symbol: &str) {
        self.cache.invalidate(&symbol.to_uppercase());
    }

    /// Union-merge all sources, dedupe by (network, contract), rank by
    /// source priority then verification
    async fn load(&self, symbol: String) -> Result<Vec<TokenBinding>> {
        let mut merged: Vec<TokenBinding> = self
            .builtin
            .get(&symbol)
            .cloned()
            .unwrap_or_default();

        let mut external_errors = 0usize;
        for source in &self.sources {
            match source.lookup(&symbol).await {
                Ok(bindings) => merged.extend(bindings),
                Err(e) => {
                    warn!(symbol = %symbol, source = ?source.source(), error = %e, "token source failed");
                    if e.kind() == ErrorKind::Network {
                        external_errors += 1;
                    }
                }
            }
        }

        // A transient blackout of every external source must not be cached
        // as "token does not exist"
        if merged.is_empty() && !self.sources.is_empty() && external_errors == self.sources.len() {
            return Err(Error::PriceDataUnavailable(format!(
                "all token sources unreachable for {}",
                symbol
            )));
        }

        let mut seen: HashMap<(String, String), usize> = HashMap::new();
        let mut deduped: Vec<TokenBinding> = Vec::with_capacity(merged.len());
        for binding in merged {
            let dedupe_key = (binding.network.clone(), binding.contract_address.clone());
            match seen.get(&dedupe_key) {
                Some(&index) => {
                    // Keep the higher-priority source, but let a verified
                    // listing upgrade the flag
                    let kept: &mut TokenBinding = &mut deduped[index];
                    if binding.source.priority() < kept.source.priority() {
                        *kept = binding;
                    } else if binding.verified {
                        kept.verified = true;
                    }
                }
                None => {
                    seen.insert(dedupe_key, deduped.len());
                    deduped.push(binding);
                }
            }
        }

        deduped.sort_by_key(|b| (b.source.priority(), !b.verified));
        debug!(symbol = %symbol, count = deduped.len(), "resolved token bindings");
        Ok(deduped)
    }
}
