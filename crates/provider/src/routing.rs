use quizgate_core::health::HealthTracker;
use quizgate_core::provider::Proxy;
use quizgate_core::registry::ProxySnapshot;
use std::sync::Arc;

/// Ordered candidate list for one dispatch.
///
/// Model-compatible active proxies (or all active ones), minus unhealthy or
/// breaker-open ones. If that removes everything the unfiltered list is used,
/// so a request is never refused on health grounds alone.
pub fn select_candidates(
    snapshot: &ProxySnapshot,
    health: &HealthTracker,
    model: Option<&str>,
) -> Vec<Arc<Proxy>> {
    let pool = match model {
        Some(model) => snapshot.for_model(model),
        None => snapshot.active(),
    };

    let healthy: Vec<Arc<Proxy>> = pool
        .iter()
        .filter(|p| health.is_healthy(&p.name))
        .cloned()
        .collect();

    let mut candidates = if healthy.is_empty() && !pool.is_empty() {
        tracing::warn!(
            proxies = pool.len(),
            "No healthy proxy available, trying all candidates"
        );
        pool
    } else {
        healthy
    };
    candidates.sort_by_key(|p| p.priority);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizgate_core::config::{HealthConfig, ProxyEntry};
    use quizgate_core::error::ErrorClass;
    use quizgate_core::registry::ProxyRegistry;

    fn entry(name: &str, priority: i32, models: &[&str]) -> ProxyEntry {
        ProxyEntry {
            name: Some(name.to_string()),
            api_base: Some(format!("https://{name}.test")),
            api_keys: vec!["k".to_string()],
            model: None,
            models: models.iter().map(|m| m.to_string()).collect(),
            is_active: true,
            priority,
        }
    }

    fn names(proxies: &[Arc<Proxy>]) -> Vec<&str> {
        proxies.iter().map(|p| p.name.as_str()).collect()
    }

    fn break_proxy(health: &HealthTracker, name: &str) {
        for _ in 0..3 {
            health.record_failure(name, ErrorClass::ServerError);
        }
    }

    #[test]
    fn test_unhealthy_proxies_are_skipped() {
        let registry = ProxyRegistry::empty();
        registry
            .load(&[entry("c", 3, &["m"]), entry("a", 1, &["m"]), entry("b", 2, &["m"])])
            .unwrap();
        let health = HealthTracker::new(HealthConfig::default());
        break_proxy(&health, "a");

        let candidates = select_candidates(&registry.snapshot(), &health, None);
        assert_eq!(names(&candidates), vec!["b", "c"]);
    }

    #[test]
    fn test_all_unhealthy_falls_back_to_everything() {
        let registry = ProxyRegistry::empty();
        registry
            .load(&[entry("a", 1, &["m"]), entry("b", 2, &["m"])])
            .unwrap();
        let health = HealthTracker::new(HealthConfig::default());
        break_proxy(&health, "a");
        break_proxy(&health, "b");

        let candidates = select_candidates(&registry.snapshot(), &health, Some("m"));
        assert_eq!(names(&candidates), vec!["a", "b"]);
    }

    #[test]
    fn test_model_filter() {
        let registry = ProxyRegistry::empty();
        registry
            .load(&[entry("a", 1, &["gpt"]), entry("b", 2, &["qwen"])])
            .unwrap();
        let health = HealthTracker::new(HealthConfig::default());
        let snapshot = registry.snapshot();
        assert_eq!(names(&select_candidates(&snapshot, &health, Some("qwen"))), vec!["b"]);
        assert_eq!(
            names(&select_candidates(&snapshot, &health, Some("other"))),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_empty_pool() {
        let registry = ProxyRegistry::empty();
        let health = HealthTracker::new(HealthConfig::default());
        assert!(select_candidates(&registry.snapshot(), &health, None).is_empty());
    }
}
