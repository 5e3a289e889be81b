//! Resolves a customer's product phrase against the business catalog.
//!
//! Matching only ever returns products that exist in the catalog; when nothing
//! matches, callers show a real subset of the catalog instead of guessing.

use crate::domain::product::Product;
use crate::text::{fold, tokens};

const STOP_TOKENS: &[&str] = &["de", "do", "da", "dos", "das", "com", "ao", "a", "o", "e", "um", "uma"];

#[derive(Clone, Debug, PartialEq)]
pub enum ProductMatch {
    Found(Product),
    Ambiguous(Vec<Product>),
    NotFound,
}

#[derive(Clone, Debug, Default)]
pub struct CatalogMatcher;

impl CatalogMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Tries, in order: exact name, substring either way, keyword hit, first
    /// significant token. The first tier with candidates decides.
    pub fn resolve(&self, query: &str, catalog: &[Product]) -> ProductMatch {
        let query_folded = fold(query.trim());
        if query_folded.is_empty() {
            return ProductMatch::NotFound;
        }
        let active: Vec<&Product> = catalog.iter().filter(|product| product.active).collect();

        if let Some(product) = active.iter().find(|product| fold(&product.name) == query_folded) {
            return ProductMatch::Found((*product).clone());
        }

        let query_tokens = significant_tokens(query);
        let tiers: [&dyn Fn(&Product) -> bool; 3] = [
            &|product| {
                let name = fold(&product.name);
                name.contains(&query_folded) || query_folded.contains(&name)
            },
            &|product| {
                product.keywords.iter().any(|keyword| {
                    let keyword = singular(&fold(keyword));
                    !keyword.is_empty() && query_tokens.iter().any(|token| *token == keyword)
                })
            },
            &|product| {
                let first_name_token = significant_tokens(&product.name).into_iter().next();
                match (first_name_token, query_tokens.first()) {
                    (Some(name_token), Some(query_token)) => name_token == *query_token,
                    _ => false,
                }
            },
        ];

        for tier in tiers {
            let candidates: Vec<Product> =
                active.iter().filter(|product| tier(product)).map(|product| (*product).clone()).collect();
            match candidates.len() {
                0 => continue,
                1 => return candidates.into_iter().next().map_or(ProductMatch::NotFound, ProductMatch::Found),
                _ => return narrow(candidates, &query_tokens),
            }
        }

        ProductMatch::NotFound
    }

    /// Up to `limit` active products, in catalog order.
    pub fn subset(&self, catalog: &[Product], limit: usize) -> Vec<Product> {
        catalog.iter().filter(|product| product.active).take(limit).cloned().collect()
    }
}

/// Among several candidates, keep the ones sharing the most query tokens.
fn narrow(candidates: Vec<Product>, query_tokens: &[String]) -> ProductMatch {
    let scored: Vec<(usize, Product)> = candidates
        .into_iter()
        .map(|product| {
            let name_tokens = significant_tokens(&product.name);
            let score = query_tokens.iter().filter(|token| name_tokens.contains(token)).count();
            (score, product)
        })
        .collect();
    let best = scored.iter().map(|(score, _)| *score).max().unwrap_or(0);
    let mut top: Vec<Product> =
        scored.into_iter().filter(|(score, _)| *score == best).map(|(_, product)| product).collect();

    if top.len() == 1 {
        top.pop().map_or(ProductMatch::NotFound, ProductMatch::Found)
    } else {
        ProductMatch::Ambiguous(top)
    }
}

fn significant_tokens(text: &str) -> Vec<String> {
    tokens(text)
        .into_iter()
        .filter(|token| !STOP_TOKENS.contains(&token.as_str()))
        .map(|token| singular(&token))
        .collect()
}

/// Crude Portuguese plural folding: `lasanhas` -> `lasanha`.
fn singular(token: &str) -> String {
    if token.len() > 3 && token.ends_with('s') {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{CatalogMatcher, ProductMatch};
    use crate::domain::account::BusinessId;
    use crate::domain::product::{Product, ProductId};

    fn product(id: &str, name: &str, keywords: &[&str], active: bool) -> Product {
        Product {
            id: ProductId(id.to_string()),
            business_id: BusinessId("biz-1".to_string()),
            name: name.to_string(),
            description: None,
            price: Decimal::new(3490, 2),
            keywords: keywords.iter().map(|value| value.to_string()).collect(),
            active,
        }
    }

    fn catalog() -> Vec<Product> {
        vec![
            product("p1", "Rondelli de Frango", &["rondeli"], true),
            product("p2", "Rondelli de Presunto e Queijo", &[], true),
            product("p3", "Lasanha Bolonhesa", &["lasagna"], true),
            product("p4", "Nhoque ao Sugo", &["gnocchi"], true),
            product("p5", "Canelone de Ricota", &[], false),
        ]
    }

    fn found_id(result: ProductMatch) -> Option<String> {
        match result {
            ProductMatch::Found(product) => Some(product.id.0),
            _ => None,
        }
    }

    #[test]
    fn exact_and_substring_matches_resolve() {
        let matcher = CatalogMatcher::new();
        assert_eq!(found_id(matcher.resolve("rondelli de frango", &catalog())), Some("p1".to_string()));
        assert_eq!(found_id(matcher.resolve("lasanha", &catalog())), Some("p3".to_string()));
    }

    #[test]
    fn keyword_and_plural_matching() {
        let matcher = CatalogMatcher::new();
        assert_eq!(found_id(matcher.resolve("gnocchi", &catalog())), Some("p4".to_string()));
        assert_eq!(found_id(matcher.resolve("lasanhas", &catalog())), Some("p3".to_string()));
    }

    #[test]
    fn shared_first_token_is_ambiguous_until_narrowed() {
        let matcher = CatalogMatcher::new();
        match matcher.resolve("rondelli", &catalog()) {
            ProductMatch::Ambiguous(products) => assert_eq!(products.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert_eq!(
            found_id(matcher.resolve("rondelli presunto", &catalog())),
            Some("p2".to_string())
        );
    }

    #[test]
    fn unknown_or_inactive_products_are_never_fabricated() {
        let matcher = CatalogMatcher::new();
        assert_eq!(matcher.resolve("pizza calabresa", &catalog()), ProductMatch::NotFound);
        assert_eq!(matcher.resolve("canelone de ricota", &catalog()), ProductMatch::NotFound);
        assert_eq!(matcher.subset(&catalog(), 10).len(), 4);
    }
}
