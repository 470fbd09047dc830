//! Dashboard statistics kept fresh in the background.
//!
//! [`run`] recomputes [`ProfileStats`] on a fixed interval and whenever an
//! invoice is created or deleted, publishing every new value on a
//! `watch` channel. It stops when the token is cancelled or the user logs
//! out.

use std::{sync::Arc, time::Duration};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    billing::BillingBackend,
    events::AppEvent,
    identity::management::UserDirectory,
    models::session::Actor,
    services::invoices::collect_invoices,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileStats {
    pub invoice_count: usize,
    /// Only counted for the admin
    pub client_count: u64,
}

/// Computes fresh statistics for `actor`. A failed invoice listing counts
/// as zero invoices; a failed client count keeps the previous value.
pub async fn refresh(
    previous: ProfileStats,
    actor: &Actor,
    billing: &dyn BillingBackend,
    directory: &dyn UserDirectory,
) -> ProfileStats {
    let invoice_count = match collect_invoices(billing).await {
        Ok(invoices) if actor.is_admin() => invoices.len(),
        Ok(invoices) => invoices
            .iter()
            .filter(|i| i.customer_email.eq_ignore_ascii_case(&actor.email))
            .count(),
        Err(e) => {
            tracing::error!(error = %e, "Stats: invoice count failed");
            0
        }
    };

    let client_count = if actor.is_admin() {
        match directory.count_users(&actor.email).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Stats: client count failed");
                previous.client_count
            }
        }
    } else {
        0
    };

    ProfileStats {
        invoice_count,
        client_count,
    }
}

pub struct StatsRefresher {
    pub actor: Actor,
    pub billing: Arc<dyn BillingBackend>,
    pub directory: Arc<dyn UserDirectory>,
    pub interval: Duration,
}

impl StatsRefresher {
    async fn refresh_into(&self, tx: &watch::Sender<ProfileStats>) {
        let previous = *tx.borrow();
        let stats = refresh(
            previous,
            &self.actor,
            self.billing.as_ref(),
            self.directory.as_ref(),
        )
        .await;
        tracing::debug!(?stats, "Stats refreshed");
        tx.send_replace(stats);
    }
}

/// Runs until `cancel` fires, the bus closes or the user logs out. The
/// first tick fires immediately, so `tx` holds real numbers right away.
pub async fn run(
    refresher: StatsRefresher,
    mut events: broadcast::Receiver<AppEvent>,
    tx: watch::Sender<ProfileStats>,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = refresher.interval.as_secs(),
        "Stats refresher started"
    );

    let mut interval = tokio::time::interval(refresher.interval);

    loop {
        let refresh_now = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stats refresher stopping");
                break;
            }
            _ = interval.tick() => true,
            event = events.recv() => match event {
                Ok(AppEvent::InvoiceCreated { .. } | AppEvent::InvoiceDeleted { .. }) => true,
                Ok(AppEvent::UserLoggedOut) => {
                    tx.send_replace(ProfileStats::default());
                    tracing::info!("Stats refresher stopping after logout");
                    break;
                }
                Ok(_) => false,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Stats refresher lagged");
                    true
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if refresh_now {
            // A refresh may sit on a slow request; cancelling drops it.
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stats refresher stopping during refresh");
                    break;
                }
                _ = refresher.refresh_into(&tx) => {}
            }
        }
    }
}
