//! Cascading price resolution.
//!
//! A model id is priced by the first strategy that produces a match:
//! an exact catalog entry, then a catalog entry of the same provider family,
//! and finally a fixed default pair. Resolution never fails; catalog errors
//! are logged and treated as "no match" for that step.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{PriceEntry, PricePair, PriceSource, Provider, ResolvedPrice};

#[derive(Debug, Clone, Error)]
#[error("pricing catalog unavailable: {0}")]
pub struct CatalogError(pub String);

/// Read interface over the pricing reference data.
pub trait PricingCatalog: Send + Sync {
    fn find_by_model(&self, model_id: &str) -> Result<Option<PriceEntry>, CatalogError>;

    fn find_by_provider(&self, provider: Provider) -> Result<Vec<PriceEntry>, CatalogError>;
}

/// In-memory catalog snapshot keyed by model id.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    entries: BTreeMap<String, PriceEntry>,
}

impl PriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = PriceEntry>,
    {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.model_id.clone(), entry))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, entry: PriceEntry) {
        self.entries.insert(entry.model_id.clone(), entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &PriceEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PricingCatalog for PriceCatalog {
    fn find_by_model(&self, model_id: &str) -> Result<Option<PriceEntry>, CatalogError> {
        Ok(self.entries.get(model_id).cloned())
    }

    fn find_by_provider(&self, provider: Provider) -> Result<Vec<PriceEntry>, CatalogError> {
        Ok(self
            .entries
            .values()
            .filter(|entry| entry.provider == provider)
            .cloned()
            .collect())
    }
}

/// One step of the pricing cascade.
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(
        &self,
        model_id: &str,
        catalog: &dyn PricingCatalog,
    ) -> Result<Option<ResolvedPrice>, CatalogError>;
}

pub struct ExactMatch;

impl ResolveStrategy for ExactMatch {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn resolve(
        &self,
        model_id: &str,
        catalog: &dyn PricingCatalog,
    ) -> Result<Option<ResolvedPrice>, CatalogError> {
        Ok(catalog
            .find_by_model(model_id)?
            .filter(PriceEntry::has_valid_prices)
            .map(|entry| ResolvedPrice::from_entry(&entry, PriceSource::Exact)))
    }
}

/// Best-effort family match for ids shaped like `<family>-<version>`.
///
/// The family segment is everything before the first `-`. A provider is
/// derived from the segment through a prefix table, and the first catalog
/// entry of that provider (ordered by model id) whose id contains the segment
/// is used. Ids that do not follow the convention can match the wrong entry.
pub struct ProviderFamily {
    prefixes: Vec<(String, Provider)>,
}

impl ProviderFamily {
    pub fn new() -> Self {
        Self {
            prefixes: default_prefixes(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str, provider: Provider) -> Self {
        self.prefixes
            .push((prefix.to_ascii_lowercase(), provider));
        self
    }

    pub fn provider_for(&self, model_id: &str) -> Option<Provider> {
        let segment = family_segment(model_id);
        if segment.is_empty() {
            return None;
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| segment.starts_with(prefix.as_str()))
            .map(|(_, provider)| *provider)
    }
}

impl Default for ProviderFamily {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolveStrategy for ProviderFamily {
    fn name(&self) -> &'static str {
        "provider_family"
    }

    fn resolve(
        &self,
        model_id: &str,
        catalog: &dyn PricingCatalog,
    ) -> Result<Option<ResolvedPrice>, CatalogError> {
        let Some(provider) = self.provider_for(model_id) else {
            return Ok(None);
        };
        let segment = family_segment(model_id);
        let mut candidates = catalog.find_by_provider(provider)?;
        candidates.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(candidates
            .iter()
            .filter(|entry| entry.has_valid_prices())
            .find(|entry| entry.model_id.to_ascii_lowercase().contains(&segment))
            .map(|entry| ResolvedPrice::from_entry(entry, PriceSource::ProviderFallback)))
    }
}

fn default_prefixes() -> Vec<(String, Provider)> {
    vec![
        ("gpt".to_string(), Provider::OpenAi),
        ("claude".to_string(), Provider::Anthropic),
        ("gemini".to_string(), Provider::Google),
    ]
}

fn family_segment(model_id: &str) -> String {
    model_id
        .trim()
        .split('-')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Display provider for a model id, using the default prefix table.
pub fn provider_for_model(model_id: &str) -> Provider {
    ProviderFamily::new()
        .provider_for(model_id)
        .unwrap_or(Provider::Other)
}

pub struct PricingResolver {
    catalog: Arc<dyn PricingCatalog>,
    strategies: Vec<Box<dyn ResolveStrategy>>,
    default_price: PricePair,
}

impl PricingResolver {
    pub fn new(catalog: Arc<dyn PricingCatalog>) -> Self {
        Self {
            catalog,
            strategies: vec![Box::new(ExactMatch), Box::new(ProviderFamily::new())],
            default_price: PricePair::FALLBACK,
        }
    }

    pub fn with_default_price(mut self, price: PricePair) -> Self {
        self.default_price = price;
        self
    }

    /// Appends a strategy after the existing ones; the default price stays last.
    pub fn with_strategy(mut self, strategy: Box<dyn ResolveStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn default_price(&self) -> PricePair {
        self.default_price
    }

    pub fn resolve(&self, model_id: &str) -> ResolvedPrice {
        for strategy in &self.strategies {
            match strategy.resolve(model_id, self.catalog.as_ref()) {
                Ok(Some(resolved)) => return resolved,
                Ok(None) => {}
                Err(err) => {
                    warn!(model = model_id, strategy = strategy.name(), error = %err, "catalog lookup failed");
                }
            }
        }
        debug!(model = model_id, "no catalog match; using default price");
        ResolvedPrice::fallback(self.default_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnreachableCatalog;

    impl PricingCatalog for UnreachableCatalog {
        fn find_by_model(&self, _model_id: &str) -> Result<Option<PriceEntry>, CatalogError> {
            Err(CatalogError("connection refused".to_string()))
        }

        fn find_by_provider(&self, _provider: Provider) -> Result<Vec<PriceEntry>, CatalogError> {
            Err(CatalogError("connection refused".to_string()))
        }
    }

    fn resolver(entries: Vec<PriceEntry>) -> PricingResolver {
        PricingResolver::new(Arc::new(PriceCatalog::from_entries(entries)))
    }

    #[test]
    fn exact_entry_wins() {
        let resolver = resolver(vec![
            PriceEntry::new("gpt-4.1", Provider::OpenAi, 3.70, 11.10),
            PriceEntry::new("gpt-4o", Provider::OpenAi, 2.5, 10.0),
        ]);
        let resolved = resolver.resolve("gpt-4.1");
        assert_eq!(resolved.source, PriceSource::Exact);
        assert_eq!(resolved.input_per_1m, 3.70);
        assert_eq!(resolved.output_per_1m, 11.10);
    }

    #[test]
    fn unknown_model_of_known_family_uses_provider_fallback() {
        let resolver = resolver(vec![
            PriceEntry::new("claude-3-opus", Provider::Anthropic, 15.0, 75.0),
            PriceEntry::new("gpt-9-stable", Provider::OpenAi, 8.0, 24.0),
        ]);
        let resolved = resolver.resolve("gpt-9-preview");
        assert_eq!(resolved.source, PriceSource::ProviderFallback);
        assert_eq!(resolved.matched_model.as_deref(), Some("gpt-9-stable"));
        assert_eq!(resolved.input_per_1m, 8.0);
        assert_eq!(resolved.output_per_1m, 24.0);
    }

    #[test]
    fn family_match_is_case_insensitive_and_ordered_by_model_id() {
        let resolver = resolver(vec![
            PriceEntry::new("GPT-5-mini", Provider::OpenAi, 0.25, 2.0),
            PriceEntry::new("GPT-4o", Provider::OpenAi, 2.5, 10.0),
        ]);
        let resolved = resolver.resolve("gpt-6");
        assert_eq!(resolved.source, PriceSource::ProviderFallback);
        assert_eq!(resolved.matched_model.as_deref(), Some("GPT-4o"));
    }

    #[test]
    fn provider_fallback_ignores_other_providers() {
        let resolver = resolver(vec![PriceEntry::new(
            "gpt-lookalike",
            Provider::Other,
            1.0,
            1.0,
        )]);
        assert_eq!(resolver.resolve("gpt-9").source, PriceSource::Default);
    }

    #[test]
    fn unmatched_model_uses_default_pair() {
        let resolver = resolver(vec![PriceEntry::new(
            "gpt-4.1",
            Provider::OpenAi,
            3.70,
            11.10,
        )]);
        let resolved = resolver.resolve("llama-3-70b");
        assert_eq!(resolved.source, PriceSource::Default);
        assert_eq!(resolved.input_per_1m, 5.0);
        assert_eq!(resolved.output_per_1m, 15.0);
        assert!(resolved.matched_model.is_none());
    }

    #[test]
    fn configured_default_price_is_used() {
        let resolver = resolver(Vec::new()).with_default_price(PricePair {
            input_per_1m: 1.0,
            output_per_1m: 2.0,
        });
        let resolved = resolver.resolve("mystery");
        assert_eq!(resolved.input_per_1m, 1.0);
        assert_eq!(resolved.output_per_1m, 2.0);
    }

    #[test]
    fn unreachable_catalog_degrades_to_default() {
        let resolver = PricingResolver::new(Arc::new(UnreachableCatalog));
        let resolved = resolver.resolve("gpt-4.1");
        assert_eq!(resolved.source, PriceSource::Default);
    }

    #[test]
    fn entries_with_invalid_prices_are_skipped() {
        let resolver = resolver(vec![PriceEntry::new(
            "gpt-4.1",
            Provider::OpenAi,
            -1.0,
            f64::NAN,
        )]);
        assert_eq!(resolver.resolve("gpt-4.1").source, PriceSource::Default);
    }

    #[test]
    fn added_prefix_extends_family_matching() {
        let catalog = Arc::new(PriceCatalog::from_entries(vec![PriceEntry::new(
            "mistral-large",
            Provider::Mistral,
            2.0,
            6.0,
        )]));
        let without = PricingResolver::new(catalog.clone());
        assert_eq!(without.resolve("mistral-small").source, PriceSource::Default);

        let with = PricingResolver::new(catalog).with_strategy(Box::new(
            ProviderFamily::new().with_prefix("mistral", Provider::Mistral),
        ));
        assert_eq!(
            with.resolve("mistral-small").source,
            PriceSource::ProviderFallback
        );
    }

    #[test]
    fn provider_for_model_labels_known_families() {
        assert_eq!(provider_for_model("gpt-4o"), Provider::OpenAi);
        assert_eq!(provider_for_model("claude-3-5-sonnet"), Provider::Anthropic);
        assert_eq!(provider_for_model("gemini-1.5-pro"), Provider::Google);
        assert_eq!(provider_for_model("llama-3"), Provider::Other);
    }
}
