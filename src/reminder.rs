use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::handler::AppState;
use crate::ledger::{ClientLedger, ClientRecord};
use crate::transport::{send_text_logged, Transport};

/// Day-of-month match, optionally ahead of the billing day by up to
/// `lead_days`. A billing day past the current month's length never fires
/// inside that month.
pub fn is_due(billing_day: u32, today: NaiveDate, lead_days: u32) -> bool {
    let diff = billing_day as i64 - today.day() as i64;
    diff >= 0 && diff <= lead_days as i64
}

pub fn compose_reminder(record: &ClientRecord) -> String {
    format!(
        "🔔 Hola *{}*, te recordamos que tu pago de *{}* {} corresponde al día {} de cada mes.\n\
         Cuando realices el pago, envíame el comprobante por este chat. ¡Gracias!",
        record.name, record.amount_label, record.country_flag, record.billing_day
    )
}

/// One stateless pass over the ledger: a reminder per non-suspended client
/// whose billing day is due. Nothing is tracked across runs, so the cadence
/// and lead window bound how often a client can be re-reminded. A failed
/// send is logged and never aborts the rest of the scan.
pub async fn run_scan(
    transport: &dyn Transport,
    ledger: &ClientLedger,
    today: NaiveDate,
    lead_days: u32,
) -> usize {
    let mut sent = 0;
    for (number, record) in ledger.list() {
        if record.suspended {
            continue;
        }
        if !is_due(record.billing_day, today, lead_days) {
            continue;
        }
        if send_text_logged(transport, "reminder", &number, &compose_reminder(&record)).await {
            sent += 1;
        } else {
            warn!("reminder delivery failed for {number}, continuing scan");
        }
    }
    sent
}

/// Periodic scan task: first pass immediately at startup, then on the fixed
/// interval until shutdown.
pub async fn reminder_task(
    transport: Arc<dyn Transport>,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let interval_hours = state.cfg.reminders.interval_hours();
    let lead_days = state.cfg.reminders.lead_days();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_hours * 3600));
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => { break; }
            _ = ticker.tick() => {
                let today = chrono::Local::now().date_naive();
                let sent = run_scan(transport.as_ref(), &state.ledger, today, lead_days).await;
                info!("reminder scan done: {sent} sent ({} clients)", state.ledger.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn due_windows() {
        assert!(is_due(21, date(2026, 8, 21), 0));
        assert!(!is_due(21, date(2026, 8, 20), 0));
        assert!(!is_due(21, date(2026, 8, 22), 0));
        // lead window fires ahead of the day, never after
        assert!(is_due(21, date(2026, 8, 19), 2));
        assert!(!is_due(21, date(2026, 8, 18), 2));
        // day 31 inside a 30-day month never matches
        assert!(!is_due(31, date(2026, 9, 30), 0));
    }

    async fn seeded_ledger(dir: &tempfile::TempDir) -> ClientLedger {
        let ledger = ClientLedger::open(dir.path().join("pagos.json")).unwrap();
        ledger
            .register("+569292929292", "Victoria", 21, "$3000", "🇨🇱")
            .await
            .unwrap();
        ledger
            .register("+51987654321", "Marcelo", 10, "S/50", "🇵🇪")
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn scan_sends_one_reminder_per_due_client() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = seeded_ledger(&dir).await;
        let transport = MockTransport::new();

        let sent = run_scan(&transport, &ledger, date(2026, 8, 21), 0).await;
        assert_eq!(sent, 1);

        let texts = transport.sent_texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, "+569292929292");
        assert!(texts[0].1.contains("Victoria"));
        assert!(texts[0].1.contains("$3000"));
        assert!(texts[0].1.contains("día 21"));
    }

    #[tokio::test]
    async fn suspended_clients_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = seeded_ledger(&dir).await;
        ledger.set_suspended("+569292929292", true).await.unwrap();
        let transport = MockTransport::new();

        let sent = run_scan(&transport, &ledger, date(2026, 8, 21), 0).await;
        assert_eq!(sent, 0);
        assert!(transport.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn one_failing_send_does_not_abort_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = seeded_ledger(&dir).await;
        // both clients due on the 10th with a wide lead window
        let transport = MockTransport::new();
        transport.fail_sends_to("+51987654321");

        let sent = run_scan(&transport, &ledger, date(2026, 8, 10), 15).await;
        assert_eq!(sent, 1);
        let texts = transport.sent_texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, "+569292929292");
    }
}
