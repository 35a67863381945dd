use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::{Engine, VenueConfig};
use crate::gateway::PaymentGateway;
use crate::limits::{MAX_VENUE_NAME_LEN, MAX_VENUES};
use crate::notify::NotifyHub;

/// Manages per-venue engines. Each venue gets its own Engine + journal +
/// compactor. Venue = database name from the pgwire connection.
pub struct VenueManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    config: VenueConfig,
    gateway: Arc<dyn PaymentGateway>,
}

impl VenueManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        config: VenueConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            config,
            gateway,
        }
    }

    /// Get or lazily create the engine for a venue.
    pub fn get_or_create(&self, venue: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(venue) {
            return Ok(engine.value().clone());
        }
        if venue.len() > MAX_VENUE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "venue name too long",
            ));
        }
        if self.engines.len() >= MAX_VENUES {
            return Err(std::io::Error::other("too many venues"));
        }

        // Sanitize venue name to prevent path traversal
        let safe_name: String = venue
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty venue name",
            ));
        }

        let journal_path = self.data_dir.join(format!("{safe_name}.journal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(
            &journal_path,
            notify,
            self.gateway.clone(),
            self.config.clone(),
        )?);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(venue.to_string(), engine.clone());
        metrics::gauge!(crate::observability::VENUES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::availability::AvailabilityRequest;
    use crate::gateway::DevGateway;
    use crate::model::TableShape;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("maitred_test_venue").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> VenueManager {
        VenueManager::new(dir, 1000, VenueConfig::default(), Arc::new(DevGateway))
    }

    #[tokio::test]
    async fn venue_isolation() {
        let vm = manager(test_data_dir("isolation"));
        let bistro = vm.get_or_create("bistro").unwrap();
        let brasserie = vm.get_or_create("brasserie").unwrap();

        bistro
            .create_table(Some("admin"), Ulid::new(), 4, TableShape::Round, None)
            .await
            .unwrap();

        let req = AvailabilityRequest {
            start: 1_700_000_000_000,
            party_size: 2,
            duration_minutes: None,
        };
        assert!(bistro.check_availability(&req).unwrap().available);
        // The other venue has no tables at all
        let other = brasserie.check_availability(&req).unwrap();
        assert!(!other.available);
        assert_eq!(
            other.reason,
            Some(crate::engine::availability::NO_CAPACITY_MATCH)
        );
    }

    #[tokio::test]
    async fn venue_lazy_creation() {
        let dir = test_data_dir("lazy");
        let vm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _engine = vm.get_or_create("chez_nous").unwrap();
        assert!(dir.join("chez_nous.journal").exists());
    }

    #[tokio::test]
    async fn venue_same_engine_returned() {
        let vm = manager(test_data_dir("same_engine"));
        let a = vm.get_or_create("bistro").unwrap();
        let b = vm.get_or_create("bistro").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn venue_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let vm = manager(dir.clone());

        let _engine = vm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.journal").exists());

        assert!(vm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn venue_name_too_long() {
        let vm = manager(test_data_dir("name_too_long"));
        let long_name = "x".repeat(MAX_VENUE_NAME_LEN + 1);
        let err = vm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("venue name too long"));
    }

    #[tokio::test]
    async fn venue_count_limit() {
        let vm = manager(test_data_dir("count_limit"));
        for i in 0..MAX_VENUES {
            vm.get_or_create(&format!("v{i}")).unwrap();
        }
        let err = vm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many venues"));
    }
}
