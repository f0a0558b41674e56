use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::evaluator::{DeliveryMode, SeenSet, evaluate};
use crate::marketplace::Marketplace;
use crate::model::Rule;
use crate::notifier::Notifier;

const STARTUP_MESSAGE: &str = "🚀 P2P monitor started";

/// Everything the poll loop needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub asset: String,
    pub chat_target: String,
    pub payment_methods: BTreeSet<String>,
    pub interval: Duration,
    pub delivery: DeliveryMode,
    pub startup_notice: bool,
}

impl MonitorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            asset: config.asset.clone(),
            chat_target: config.chat_target.clone(),
            payment_methods: config.payment_methods.clone(),
            interval: config.interval,
            delivery: config.delivery,
            startup_notice: config.startup_notice,
        }
    }
}

/// Counters for one pass over all rules.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub rules_checked: usize,
    pub rules_failed: usize,
    pub listings: usize,
    pub matches: usize,
    pub sent: usize,
    pub send_failures: usize,
}

/// Poll-loop driver. Owns the rules and the seen-set.
pub struct Monitor {
    marketplace: Arc<dyn Marketplace>,
    notifier: Arc<dyn Notifier>,
    rules: Vec<Rule>,
    settings: MonitorSettings,
    seen: SeenSet,
}

impl Monitor {
    pub fn new(
        marketplace: Arc<dyn Marketplace>,
        notifier: Arc<dyn Notifier>,
        rules: Vec<Rule>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            marketplace,
            notifier,
            rules,
            settings,
            seen: SeenSet::new(),
        }
    }

    // Read by tests; the binary only logs the size.
    #[allow(dead_code)]
    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Send the one-off startup message. Failures are only logged.
    pub async fn announce_start(&self) {
        match self
            .notifier
            .send(&self.settings.chat_target, STARTUP_MESSAGE)
            .await
        {
            Ok(()) => debug!(notifier = self.notifier.name(), "startup notice sent"),
            Err(e) => warn!(error = ?e, "startup notice failed"),
        }
    }

    /// Check every rule once, in configured order. Never fails.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        for rule in &self.rules {
            check_rule(
                rule,
                self.marketplace.as_ref(),
                self.notifier.as_ref(),
                &self.settings,
                &mut self.seen,
                &mut report,
            )
            .await;
        }

        report
    }

    /// Run cycles separated by the configured interval until `cancel` fires.
    ///
    /// Returns the number of completed cycles.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        info!(
            marketplace = self.marketplace.name(),
            notifier = self.notifier.name(),
            rules = self.rules.len(),
            interval_secs = self.settings.interval.as_secs(),
            delivery = %self.settings.delivery,
            "monitor started"
        );

        if self.settings.startup_notice {
            self.announce_start().await;
        }

        let mut cycles = 0;
        while !cancel.is_cancelled() {
            let report = self.run_cycle().await;
            cycles += 1;

            info!(
                cycle = cycles,
                rules = report.rules_checked,
                failed = report.rules_failed,
                listings = report.listings,
                matches = report.matches,
                sent = report.sent,
                send_failures = report.send_failures,
                seen = self.seen.len(),
                "cycle complete"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.settings.interval) => {}
            }
        }

        info!(cycles, "monitor stopped");
        cycles
    }
}

async fn check_rule(
    rule: &Rule,
    marketplace: &dyn Marketplace,
    notifier: &dyn Notifier,
    settings: &MonitorSettings,
    seen: &mut SeenSet,
    report: &mut CycleReport,
) {
    debug!(rule = %rule, "checking rule");
    report.rules_checked += 1;

    // A failed fetch counts as an empty batch so later rules still run.
    let listings = match marketplace
        .fetch_listings(&settings.asset, &rule.currency, rule.side)
        .await
    {
        Ok(listings) => listings,
        Err(e) => {
            warn!(error = ?e, rule = %rule, "listing fetch failed");
            report.rules_failed += 1;
            return;
        }
    };

    debug!(rule = %rule, count = listings.len(), "listings fetched");
    report.listings += listings.len();

    let matches = evaluate(
        rule,
        &settings.asset,
        &listings,
        &settings.payment_methods,
        seen,
        settings.delivery,
    );
    report.matches += matches.len();

    for found in matches {
        match notifier.send(&settings.chat_target, &found.message).await {
            Ok(()) => {
                if settings.delivery == DeliveryMode::AtLeastOnce {
                    seen.mark(&found.listing.id);
                }
                report.sent += 1;
                info!(id = %found.listing.id, price = found.listing.price, rule = %rule, "notified");
            }
            Err(e) => {
                report.send_failures += 1;
                warn!(
                    error = ?e,
                    id = %found.listing.id,
                    delivery = %settings.delivery,
                    "notification failed"
                );
            }
        }
    }
}
