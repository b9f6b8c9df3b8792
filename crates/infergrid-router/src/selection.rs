//! Provider selection strategies.
//!
//! Each strategy returns an index into the filtered candidate list, so
//! the engine can fall back over the remaining candidates in order.

use infergrid_core::catalog::{Feature, ProviderConfig, StrategyKind};
use rand::Rng;

/// Uniform pick among the candidates tied at the lowest priority value.
pub fn by_priority<R: Rng + ?Sized>(candidates: &[ProviderConfig], rng: &mut R) -> Option<usize> {
    let min = candidates.iter().map(|p| p.priority).min()?;
    let tied: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, p)| p.priority == min)
        .map(|(i, _)| i)
        .collect();
    if tied.len() == 1 {
        return Some(tied[0]);
    }
    Some(tied[rng.gen_range(0..tied.len())])
}

/// Draw in `[0, total_weight)` and walk the candidates.
///
/// With all weights zero the first candidate wins.
pub fn by_weight<R: Rng + ?Sized>(candidates: &[ProviderConfig], rng: &mut R) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let total: u64 = candidates.iter().map(|p| p.weight as u64).sum();
    if total == 0 {
        return Some(0);
    }
    let mut remaining = rng.gen_range(0..total) as i64;
    for (i, p) in candidates.iter().enumerate() {
        remaining -= p.weight as i64;
        if remaining < 0 {
            return Some(i);
        }
    }
    Some(candidates.len() - 1)
}

/// Any self-hosted candidate first, else the cheapest configured
/// third-party, else the first candidate.
pub fn by_cost(feature: &Feature, candidates: &[ProviderConfig]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    if let Some(i) = candidates.iter().position(|p| p.is_self_hosted()) {
        return Some(i);
    }
    let cheapest = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, p)| feature.request_cost(&p.id).map(|c| (i, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i);
    Some(cheapest.unwrap_or(0))
}

pub fn select<R: Rng + ?Sized>(
    strategy: StrategyKind,
    feature: &Feature,
    candidates: &[ProviderConfig],
    rng: &mut R,
) -> Option<usize> {
    match strategy {
        StrategyKind::Priority => by_priority(candidates, rng),
        StrategyKind::Weighted => by_weight(candidates, rng),
        StrategyKind::CostBased => by_cost(feature, candidates),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infergrid_core::catalog::{CostConfig, ProviderKind};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn provider(id: &str, kind: ProviderKind, priority: u32, weight: u32) -> ProviderConfig {
        ProviderConfig {
            priority,
            weight,
            ..ProviderConfig::new(id, kind, "v")
        }
    }

    fn third(id: &str, priority: u32, weight: u32) -> ProviderConfig {
        provider(id, ProviderKind::ThirdParty, priority, weight)
    }

    fn feature(costs: &[(&str, f64)]) -> Feature {
        Feature {
            id: "text_to_image".into(),
            name: "Text to image".into(),
            category: "image".into(),
            description: String::new(),
            enabled: true,
            providers: Vec::new(),
            routing: None,
            cost: Some(CostConfig {
                self_hosted_per_hour: 2.0,
                third_party_per_request: costs.iter().map(|(k, v)| (k.to_string(), *v)).collect::<HashMap<_, _>>(),
            }),
        }
    }

    #[test]
    fn priority_prefers_lowest_value() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = vec![third("a", 2, 1), third("b", 1, 1), third("c", 3, 1)];
        for _ in 0..100 {
            assert_eq!(by_priority(&candidates, &mut rng), Some(1));
        }
    }

    #[test]
    fn priority_ties_are_spread() {
        let mut rng = StdRng::seed_from_u64(42);
        let candidates = vec![third("a", 1, 1), third("b", 1, 1), third("c", 1, 1), third("d", 2, 1)];
        let mut counts = [0usize; 4];
        for _ in 0..1000 {
            counts[by_priority(&candidates, &mut rng).unwrap()] += 1;
        }
        assert!(counts[..3].iter().all(|&c| c > 0), "{counts:?}");
        assert_eq!(counts[3], 0);
    }

    #[test]
    fn weighted_matches_proportions() {
        let mut rng = StdRng::seed_from_u64(1234);
        let candidates = vec![third("a", 1, 10), third("b", 1, 30), third("c", 1, 60)];
        let trials = 10_000;
        let mut counts = [0usize; 3];
        for _ in 0..trials {
            counts[by_weight(&candidates, &mut rng).unwrap()] += 1;
        }
        for (count, expected) in counts.iter().zip([0.10, 0.30, 0.60]) {
            let observed = *count as f64 / trials as f64;
            assert!((observed - expected).abs() < 0.03, "{counts:?}");
        }
    }

    #[test]
    fn zero_weights_pick_first() {
        let mut rng = StdRng::seed_from_u64(0);
        let candidates = vec![third("a", 1, 0), third("b", 1, 0)];
        assert_eq!(by_weight(&candidates, &mut rng), Some(0));
        assert_eq!(by_weight(&[], &mut rng), None);
    }

    #[test]
    fn cost_based_prefers_self_hosted() {
        let f = feature(&[("a", 0.01)]);
        let candidates = vec![third("a", 1, 1), provider("gpu", ProviderKind::SelfHosted, 5, 1)];
        assert_eq!(by_cost(&f, &candidates), Some(1));
    }

    #[test]
    fn cost_based_picks_cheapest_third_party() {
        let f = feature(&[("a", 0.04), ("b", 0.02), ("c", 0.08)]);
        let candidates = vec![third("a", 1, 1), third("b", 1, 1), third("c", 1, 1)];
        assert_eq!(by_cost(&f, &candidates), Some(1));
    }

    #[test]
    fn cost_based_without_costs_picks_first() {
        let mut f = feature(&[]);
        f.cost = None;
        let candidates = vec![third("a", 1, 1), third("b", 1, 1)];
        assert_eq!(by_cost(&f, &candidates), Some(0));
    }
}
