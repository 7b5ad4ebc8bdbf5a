// Mapping of OSB identifiers to application service IDs

use serde::{Deserialize, Serialize};

use crate::model::{ApplicationServiceId, ServiceId, ServicePlanId};

/// Which OSB identifier names the application service.
///
/// Legacy catalogs expose one service class per application service. With API
/// packages the class stands for the application and each plan is a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationServiceIdSelector {
    #[default]
    Legacy,
    ApiPackages,
}

impl ApplicationServiceIdSelector {
    pub fn from_api_packages_support(enabled: bool) -> Self {
        if enabled {
            ApplicationServiceIdSelector::ApiPackages
        } else {
            ApplicationServiceIdSelector::Legacy
        }
    }

    pub fn select(&self, service_id: &ServiceId, plan_id: &ServicePlanId) -> ApplicationServiceId {
        match self {
            ApplicationServiceIdSelector::Legacy => ApplicationServiceId::new(service_id.as_str()),
            ApplicationServiceIdSelector::ApiPackages => ApplicationServiceId::new(plan_id.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select() {
        let svc = ServiceId::from("svc");
        let plan = ServicePlanId::from("plan");
        assert_eq!(
            ApplicationServiceIdSelector::Legacy.select(&svc, &plan).as_str(),
            "svc"
        );
        assert_eq!(
            ApplicationServiceIdSelector::from_api_packages_support(true)
                .select(&svc, &plan)
                .as_str(),
            "plan"
        );
    }
}
