//! Network, asset, and user sub-collectors

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use vigil_core::model::{Alert, ContextType, EnrichmentContext, EnrichmentStatus};
use vigil_core::validate::subnet_24;

use crate::network::{is_internal, CidrV4};
use crate::providers::{ContextProvider, ProviderError};

pub struct Collectors {
    geoip: Arc<dyn ContextProvider>,
    cmdb: Arc<dyn ContextProvider>,
    directory: Arc<dyn ContextProvider>,
    internal_cidrs: Vec<CidrV4>,
    ttl_hint_secs: u64,
}

impl Collectors {
    pub fn new(
        geoip: Arc<dyn ContextProvider>,
        cmdb: Arc<dyn ContextProvider>,
        directory: Arc<dyn ContextProvider>,
        internal_cidrs: Vec<CidrV4>,
        ttl_hint_secs: u64,
    ) -> Self {
        Self {
            geoip,
            cmdb,
            directory,
            internal_cidrs,
            ttl_hint_secs,
        }
    }

    fn row(
        &self,
        context_type: ContextType,
        source: &str,
        status: EnrichmentStatus,
        data: Option<serde_json::Value>,
    ) -> EnrichmentContext {
        EnrichmentContext {
            context_type,
            source: source.to_string(),
            status,
            data,
            collected_at: Utc::now(),
            ttl_hint_secs: Some(self.ttl_hint_secs),
        }
    }

    /// Partial row for a sub-collector that timed out or failed outright
    pub fn partial(&self, context_type: ContextType) -> EnrichmentContext {
        let source = match context_type {
            ContextType::Network => "geoip",
            ContextType::Asset => "cmdb",
            ContextType::User => "directory",
        };
        self.row(context_type, source, EnrichmentStatus::Partial, None)
    }

    /// Classify each present IP and resolve GeoIP for the external ones.
    /// None when the alert carries no IPs at all.
    pub async fn network(&self, alert: &Alert) -> Option<EnrichmentContext> {
        let ips = [("source", alert.source_ip), ("target", alert.target_ip)];
        if ips.iter().all(|(_, ip)| ip.is_none()) {
            return None;
        }

        let mut entries = Vec::new();
        let mut degraded = false;

        for (direction, ip) in ips.into_iter() {
            let Some(ip) = ip else { continue };
            let internal = is_internal(&ip, &self.internal_cidrs);

            let geo = if internal {
                None
            } else {
                match self.geoip.lookup(&ip.to_string()).await {
                    Ok(geo) => Some(geo),
                    Err(ProviderError::NotFound) => None,
                    Err(e) => {
                        debug!(ip = %ip, error = %e, "geoip lookup failed");
                        degraded = true;
                        None
                    }
                }
            };

            entries.push(json!({
                "ip": ip.to_string(),
                "direction": direction,
                "internal": internal,
                "subnet": subnet_24(&ip),
                "geo": geo,
            }));
        }

        if degraded {
            return Some(self.partial(ContextType::Network));
        }
        Some(self.row(
            ContextType::Network,
            "geoip",
            EnrichmentStatus::Ok,
            Some(json!({ "ips": entries })),
        ))
    }

    /// CMDB lookup by asset id. None when the alert names no asset.
    pub async fn asset(&self, alert: &Alert) -> Option<EnrichmentContext> {
        let asset_id = alert.asset_id.as_deref()?;
        match self.cmdb.lookup(asset_id).await {
            Ok(data) => Some(self.row(
                ContextType::Asset,
                "cmdb",
                EnrichmentStatus::Ok,
                Some(data),
            )),
            Err(e) => {
                debug!(asset_id, error = %e, "asset lookup failed");
                Some(self.partial(ContextType::Asset))
            }
        }
    }

    /// Directory lookup by user id. None when the alert names no user.
    pub async fn user(&self, alert: &Alert) -> Option<EnrichmentContext> {
        let user_id = alert.user_id.as_deref()?;
        match self.directory.lookup(user_id).await {
            Ok(data) => Some(self.row(
                ContextType::User,
                "directory",
                EnrichmentStatus::Ok,
                Some(data),
            )),
            Err(e) => {
                debug!(user_id, error = %e, "user lookup failed");
                Some(self.partial(ContextType::User))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StaticContextProvider;
    use chrono::Utc;
    use uuid::Uuid;
    use vigil_core::model::{AlertStatus, AlertType, Severity};

    fn collectors() -> Collectors {
        Collectors::new(
            Arc::new(
                StaticContextProvider::new("geoip")
                    .with_entry("8.8.8.8", json!({"country": "US", "asn": 15169, "reputation_score": 90})),
            ),
            Arc::new(
                StaticContextProvider::new("cmdb")
                    .with_entry("SRV-001", json!({"criticality": "critical", "environment": "production"})),
            ),
            Arc::new(StaticContextProvider::new("directory")),
            Vec::new(),
            3600,
        )
    }

    fn alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            alert_id: "A-1".to_string(),
            alert_type: AlertType::Malware,
            severity: Severity::High,
            status: AlertStatus::New,
            description: "test".to_string(),
            source: "splunk".to_string(),
            timestamp: Utc::now(),
            source_ip: None,
            target_ip: None,
            file_hash: None,
            url: None,
            asset_id: None,
            user_id: None,
            process_name: None,
            raw_payload: serde_json::Value::Null,
            fingerprint: None,
            risk_score: None,
            assigned_to: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn network_classifies_internal_without_geo() {
        let mut a = alert();
        a.source_ip = Some("192.168.1.100".parse().unwrap());
        let ctx = collectors().network(&a).await.unwrap();
        assert_eq!(ctx.status, EnrichmentStatus::Ok);
        let data = ctx.data.unwrap();
        assert_eq!(data["ips"][0]["internal"], true);
        assert_eq!(data["ips"][0]["subnet"], "192.168.1.0/24");
        assert!(data["ips"][0]["geo"].is_null());
    }

    #[tokio::test]
    async fn network_resolves_geo_for_external() {
        let mut a = alert();
        a.source_ip = Some("8.8.8.8".parse().unwrap());
        let ctx = collectors().network(&a).await.unwrap();
        let data = ctx.data.unwrap();
        assert_eq!(data["ips"][0]["internal"], false);
        assert_eq!(data["ips"][0]["geo"]["country"], "US");
    }

    #[tokio::test]
    async fn no_ips_means_no_network_context() {
        assert!(collectors().network(&alert()).await.is_none());
    }

    #[tokio::test]
    async fn asset_hit_and_user_miss() {
        let mut a = alert();
        a.asset_id = Some("SRV-001".to_string());
        a.user_id = Some("ghost".to_string());

        let c = collectors();
        let asset = c.asset(&a).await.unwrap();
        assert_eq!(asset.status, EnrichmentStatus::Ok);
        assert_eq!(asset.data.unwrap()["criticality"], "critical");

        // Directory has no entry and no default: partial row, not a failure
        let user = c.user(&a).await.unwrap();
        assert_eq!(user.status, EnrichmentStatus::Partial);
        assert!(user.data.is_none());
    }
}
