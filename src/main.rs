use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use pagobot::config::{load_config, parse_config_arg, validate_config};
use pagobot::derivados::DerivadoStore;
use pagobot::handler::{self, AppState};
use pagobot::ledger::ClientLedger;
use pagobot::reminder;
use pagobot::responder::ResponderClient;
use pagobot::transport::{read_gateway_events, JsonLineGateway, Transport};
use pagobot::users::UserStateTracker;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = parse_config_arg(&args).unwrap_or_else(|| PathBuf::from("config.yaml"));

    let cfg = load_config(&config_path)?;
    validate_config(&cfg)?;

    let filter = cfg.bot.log_level.clone().unwrap_or_else(|| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = PathBuf::from(cfg.runtime.data_dir());
    let ledger = ClientLedger::open(data_dir.join("pagos.json"))?;
    let users = UserStateTracker::open(data_dir.join("usuarios.json"))?;
    let derivados = DerivadoStore::open(data_dir.join("derivados.json"))?;
    info!(
        "stores loaded: {} clients, {} user states",
        ledger.len(),
        users.len()
    );

    let responder = cfg.responder.as_ref().and_then(ResponderClient::from_config);
    if responder.is_none() {
        info!("free-text responder disabled");
    }

    let transport: Arc<dyn Transport> =
        Arc::new(JsonLineGateway::new(cfg.runtime.gateway_base_url()));
    let state = Arc::new(AppState::new(cfg, ledger, users, derivados, responder));

    let (shutdown_tx, _shutdown_rx0) = broadcast::channel::<()>(8);

    let shutdown_ctrl = shutdown_tx.clone();
    let ctrl_handle = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_ctrl.send(());
    });

    let h_remind = tokio::spawn(reminder::reminder_task(
        transport.clone(),
        state.clone(),
        shutdown_tx.subscribe(),
    ));

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let h_read = tokio::spawn(read_gateway_events(event_tx));

    info!("dispatching gateway events");
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => { break; }
            maybe = event_rx.recv() => {
                let Some(msg) = maybe else { break; };
                let transport = transport.clone();
                let state = state.clone();
                // one task per event: a stalled transport call only stalls
                // its own event, per-key locks keep same-sender handling
                // serialized
                tokio::spawn(async move {
                    if let Err(e) = handler::handle_event(transport.as_ref(), &state, msg).await {
                        warn!("event handling abandoned: {e}");
                    }
                });
            }
        }
    }

    let _ = shutdown_tx.send(());
    ctrl_handle.abort();
    h_read.abort();
    let _ = h_remind.await;

    Ok(())
}
