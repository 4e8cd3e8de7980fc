//! End-to-end workflow against the in-memory ledger.

use std::sync::Arc;

use attestation::ledger::{LOCAL_ATTESTOR, LOCAL_CONTRACT_ADDRESS};
use attestation::{InMemoryLedger, ResolutionService, ServiceConfig, VerificationTarget};
use chrono::{Duration, Utc};
use resolution::{ComplaintCluster, Evidence, Severity};
use serde_json::{json, Value};
use tracing::info;

/// Track a cluster, resolve it, attest the resolution and verify it.
pub async fn run(config: ServiceConfig, exchange: &str, category: &str) -> anyhow::Result<Value> {
    let chain = config
        .chain()?
        .info(&config.network, LOCAL_CONTRACT_ADDRESS, LOCAL_ATTESTOR);
    let ledger = Arc::new(InMemoryLedger::new(chain));
    let service = ResolutionService::new(config, ledger)?;

    let issue = service
        .track_cluster(ComplaintCluster {
            exchange: exchange.to_string(),
            category: category.to_string(),
            complaint_count: 150,
            title: None,
            description: Some("Spike in complaints reported by the collector".to_string()),
            severity: Severity::High,
        })
        .await?
        .ok_or_else(|| anyhow::anyhow!("cluster below tracking threshold"))?;
    info!(issue_id = %issue.id, "Demo issue tracked");

    let end = Utc::now() - Duration::days(7);
    let evidence = Evidence::from_counts(150, 22)
        .with_sentiment_shift(0.3)
        .with_sources(["youtube", "google", "reddit"])
        .with_window(end - Duration::days(7), end)
        .with_methodology("Week-over-week complaint volume across tracked sources");

    let resolution = service
        .create_resolution(&issue.id, evidence, "Complaint volume back to baseline")
        .await?;
    let attestation = service.attest_resolution(&resolution.id).await?;
    let verification = service
        .verify(VerificationTarget::Resolution(resolution.id.clone()))
        .await?;

    Ok(json!({
        "issue": service.get_issue(&issue.id).await?,
        "resolution": service.get_resolution(&resolution.id).await?,
        "attestation": attestation,
        "verification": verification,
        "custody_chain": service.custody_chain(exchange, category),
        "timeline": service.issue_timeline(&issue.id).await,
        "stats": service.stats().await?,
        "chain": service.chain_info(),
    }))
}
