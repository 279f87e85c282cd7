//! Liveness endpoint and the shared wall clock

use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::{Duration, Instant};

use crate::infrastructure::{Module, ServiceContainer};
use crate::persistence::Database;
use crate::web::{Response, Router, RouterExt};

pub const MODULE_NAME: &str = "health";

/// Boot-time clock shared by every module that needs "now" or uptime.
#[derive(Debug)]
pub struct Clock {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct HealthModule;

impl HealthModule {
    pub fn new() -> Self {
        Self
    }
}

impl Module for HealthModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn register_services(&self, container: &ServiceContainer) -> anyhow::Result<()> {
        container.singleton(|_| Clock::new());
        Ok(())
    }

    fn routes(&self, router: &mut dyn Router, container: &ServiceContainer) -> anyhow::Result<()> {
        let clock = container.try_resolve::<Clock>()?;
        let database = container.try_resolve::<Database>()?;

        router.get("/health", move |_| {
            Response::ok(json!({
                "status": "ok",
                "database": database.name(),
                "tables": database.tables(),
                "started_at": clock.started_at().to_rfc3339(),
                "uptime_seconds": clock.uptime().as_secs(),
            }))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::{Method, Request, RouteTable};
    use std::sync::Arc;

    #[test]
    fn clock_is_a_shared_singleton() {
        let container = ServiceContainer::new();
        HealthModule::new().register_services(&container).unwrap();

        let first = container.resolve::<Clock>();
        let second = container.resolve::<Clock>();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.now() >= first.started_at());
    }

    #[test]
    fn health_route_reports_database() {
        let container = ServiceContainer::new();
        container.singleton(|_| Database::in_memory("probe"));
        let module = HealthModule::new();
        module.register_services(&container).unwrap();

        let mut table = RouteTable::new();
        module.routes(&mut table, &container).unwrap();

        let response = table.dispatch(Request::new(Method::GET, "/health"));
        assert_eq!(response.status, 200);
        assert_eq!(response.body["status"], "ok");
        assert_eq!(response.body["database"], "probe");
    }
}
