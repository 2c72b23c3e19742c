use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::derivados::DerivadoStore;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{ledger_key_for_sender, ClientLedger};
use crate::proof::{self, is_payment_proof};
use crate::reminder::compose_reminder;
use crate::responder::{owner_escalation_notice, ResponderClient};
use crate::transport::{
    parse_decision_data, send_text_logged, Decision, InboundMessage, MessageKind, Transport,
};
use crate::users::{UserState, UserStateTracker};

const OWNER_ONLY_TEXT: &str = "❌ Solo el propietario puede usar este comando.";

pub struct AppState {
    pub cfg: Config,
    pub ledger: ClientLedger,
    pub users: UserStateTracker,
    pub derivados: DerivadoStore,
    pub responder: Option<ResponderClient>,
    sender_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(
        cfg: Config,
        ledger: ClientLedger,
        users: UserStateTracker,
        derivados: DerivadoStore,
        responder: Option<ResponderClient>,
    ) -> Self {
        Self {
            cfg,
            ledger,
            users,
            derivados,
            responder,
            sender_locks: DashMap::new(),
        }
    }

    pub fn is_owner(&self, sender: &str) -> bool {
        ledger_key_for_sender(sender) == ledger_key_for_sender(&self.cfg.bot.owner)
    }

    fn sender_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.sender_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Closed set of owner commands; anything else with a prefix falls through
/// to the free-text path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register(String),
    RegisterBatch(String),
    Remove(String),
    List,
    Suspend(String),
    Activate(String),
    Reminder(String),
    Derivados(String),
    Unknown,
}

pub fn parse_command(text: &str, prefixes: &[String]) -> Option<Command> {
    let rest = prefixes
        .iter()
        .find_map(|p| text.strip_prefix(p.as_str()))?;
    let keyword: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
    if keyword.is_empty() {
        return None;
    }
    let payload = rest[keyword.len()..].trim().to_string();

    let cmd = match keyword.to_lowercase().as_str() {
        "registrarpago" | "agregarcliente" => Command::Register(payload),
        "agregarclientes" | "registrarlote" => Command::RegisterBatch(payload),
        "limpiarpago" | "eliminarcliente" => Command::Remove(payload),
        "clientes" | "listarpagos" => Command::List,
        "suspendercliente" => Command::Suspend(payload),
        "activarcliente" => Command::Activate(payload),
        "recordatorio" => Command::Reminder(payload),
        "derivados" => Command::Derivados(payload),
        _ => Command::Unknown,
    };
    Some(cmd)
}

/// Entry point for one inbound event. Everything user-visible is resolved
/// in here; an `Err` only means the event had to be abandoned (the caller
/// logs it and the loop keeps serving).
pub async fn handle_event(
    transport: &dyn Transport,
    state: &AppState,
    msg: InboundMessage,
) -> EngineResult<()> {
    // read-then-write sections for one identifier must not interleave;
    // decisions serialize on the client they refer to, not on the admin
    let lock_key = match &msg.kind {
        MessageKind::Decision { data } => parse_decision_data(data)
            .map(|(_, correlation, _)| correlation)
            .unwrap_or_else(|| msg.sender.clone()),
        _ => msg.sender.clone(),
    };
    let lock = state.sender_lock(&lock_key);
    let _serial = lock.lock().await;

    if let MessageKind::Decision { data } = &msg.kind {
        let data = data.clone();
        return handle_payment_decision(transport, state, &msg, &data).await;
    }

    let user = state.users.get_or_create(&msg.sender).await?;

    match &msg.kind {
        MessageKind::Media { .. } => handle_media_event(transport, state, &msg, &user).await,
        MessageKind::Text { body } => {
            let body = body.clone();
            handle_text_event(transport, state, &msg, &user, &body).await
        }
        MessageKind::Decision { .. } => Ok(()),
    }
}

async fn handle_media_event(
    transport: &dyn Transport,
    state: &AppState,
    msg: &InboundMessage,
    user: &UserState,
) -> EngineResult<()> {
    let MessageKind::Media { media, caption, .. } = &msg.kind else {
        return Ok(());
    };
    if !media.is_proof_candidate() {
        return Ok(());
    }
    let caption_is_proof = caption.as_deref().map(is_payment_proof).unwrap_or(false);
    if !caption_is_proof && !user.awaiting_payment_response {
        return Ok(());
    }

    if !msg.is_group {
        // a decision is now pending: flip the gate before intake runs
        let key = ledger_key_for_sender(&msg.sender);
        let pending_name = state.ledger.display_name(&key).unwrap_or_default();
        state
            .users
            .update(&msg.sender, move |s| {
                s.awaiting_payment_response = true;
                s.pending_client_name = pending_name;
                s.pending_client_number = key;
            })
            .await?;
    }

    proof::handle_incoming_media(transport, &state.ledger, state.cfg.bot.admin_forward(), msg)
        .await;
    Ok(())
}

async fn handle_text_event(
    transport: &dyn Transport,
    state: &AppState,
    msg: &InboundMessage,
    user: &UserState,
    body: &str,
) -> EngineResult<()> {
    match parse_command(body, &state.cfg.bot.command_prefixes()) {
        Some(Command::Unknown) | None => {
            handle_free_text(transport, state, msg, user, body).await
        }
        Some(cmd) => handle_command(transport, state, msg, cmd).await,
    }
}

async fn handle_free_text(
    transport: &dyn Transport,
    state: &AppState,
    msg: &InboundMessage,
    user: &UserState,
    body: &str,
) -> EngineResult<()> {
    if user.awaiting_payment_response {
        // the pending admin decision suppresses the default path entirely
        debug!("free text from {} suppressed while awaiting decision", msg.sender);
        return Ok(());
    }
    if msg.is_group || state.is_owner(&msg.sender) || body.trim().is_empty() {
        return Ok(());
    }
    let Some(responder) = &state.responder else {
        return Ok(());
    };

    match responder.query(body).await {
        Err(e) => warn!("responder query failed: {e}"),
        Ok(None) => debug!("responder declined for {}", msg.sender),
        Ok(Some(r)) => {
            send_text_logged(transport, "responder_reply", &msg.chat, &r.reply).await;
            if r.escalate {
                let notice = owner_escalation_notice(
                    msg.display_name(),
                    &ledger_key_for_sender(&msg.sender),
                    body,
                    &r.reply,
                );
                send_text_logged(transport, "responder_escalation", &state.cfg.bot.owner, &notice)
                    .await;
            }
        }
    }
    Ok(())
}

async fn handle_payment_decision(
    transport: &dyn Transport,
    state: &AppState,
    msg: &InboundMessage,
    data: &str,
) -> EngineResult<()> {
    if ledger_key_for_sender(&msg.sender)
        != ledger_key_for_sender(state.cfg.bot.admin_forward())
    {
        debug!("decision from non-admin {} ignored", msg.sender);
        return Ok(());
    }
    let Some((decision, client_id, proof_ref)) = parse_decision_data(data) else {
        warn!("unparseable decision data: {data}");
        return Ok(());
    };
    let key = ledger_key_for_sender(&client_id);
    let client_name = state
        .ledger
        .display_name(&key)
        .unwrap_or_else(|| key.clone());

    match decision {
        Decision::Accept => {
            let today = chrono::Local::now().date_naive();
            match state.ledger.confirm_payment(&key, today, &proof_ref).await {
                Ok(()) => {
                    send_text_logged(
                        transport,
                        "decision_ack",
                        &msg.chat,
                        &format!("✅ Pago de *{client_name}* ({key}) confirmado y registrado."),
                    )
                    .await;
                }
                Err(EngineError::NotFound(_)) => {
                    send_text_logged(
                        transport,
                        "decision_ack",
                        &msg.chat,
                        &format!("⚠️ El cliente {key} no está registrado; el pago no quedó asentado."),
                    )
                    .await;
                }
                Err(e) => {
                    send_text_logged(transport, "decision_ack", &msg.chat, &e.user_message()).await;
                }
            }
            send_text_logged(
                transport,
                "decision_notify",
                &client_id,
                "✅ Tu pago fue confirmado. ¡Gracias por tu puntualidad!",
            )
            .await;
        }
        Decision::Reject => {
            send_text_logged(
                transport,
                "decision_notify",
                &client_id,
                "❌ Tu comprobante fue rechazado. Verifica tu pago o contacta a soporte.",
            )
            .await;
            send_text_logged(
                transport,
                "decision_ack",
                &msg.chat,
                &format!("❌ Transferencia de *{client_name}* rechazada; se notificó al cliente."),
            )
            .await;
        }
    }

    // the decision is recorded: release the response gate
    if state.users.get(&client_id).is_some() {
        state
            .users
            .update(&client_id, |s| {
                s.awaiting_payment_response = false;
                s.pending_client_name.clear();
                s.pending_client_number.clear();
            })
            .await?;
    }
    Ok(())
}

async fn handle_command(
    transport: &dyn Transport,
    state: &AppState,
    msg: &InboundMessage,
    cmd: Command,
) -> EngineResult<()> {
    if !state.is_owner(&msg.sender) {
        send_text_logged(transport, "owner_gate", &msg.chat, OWNER_ONLY_TEXT).await;
        return Ok(());
    }

    let reply = match cmd {
        Command::Register(args) => register_reply(state, &args).await,
        Command::RegisterBatch(raw) => register_batch_reply(state, &raw).await,
        Command::Remove(args) => remove_reply(state, &args).await,
        Command::List => list_reply(state),
        Command::Suspend(args) => suspend_reply(state, &args, true).await,
        Command::Activate(args) => suspend_reply(state, &args, false).await,
        Command::Reminder(args) => reminder_reply(transport, state, &args).await,
        Command::Derivados(payload) => derivados_reply(state, &payload).await,
        Command::Unknown => return Ok(()),
    };
    send_text_logged(transport, "command_reply", &msg.chat, &reply).await;
    Ok(())
}

async fn register_reply(state: &AppState, args: &str) -> String {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 5 {
        return "*Uso incorrecto del comando:*\n\
                Proporciona el nombre, número, día de pago, monto y bandera.\n\
                Ejemplo: `registrarpago Victoria +569292929292 21 $3000 🇨🇱`\n\n\
                *Nota:* El día de pago debe ser un número (1-31)."
            .to_string();
    }
    let (name, number, day_str, amount, flag) =
        (parts[0], parts[1], parts[2], parts[3], parts[4]);
    let Ok(day) = day_str.parse::<u32>() else {
        return "*Día de pago inválido:*\nEl día de pago debe ser un número entre 1 y 31."
            .to_string();
    };
    match state.ledger.register(number, name, day, amount, flag).await {
        Ok(()) => format!(
            "✅ Cliente *{name}* ({number}) añadido exitosamente a la base de datos de pagos."
        ),
        Err(e) => e.user_message(),
    }
}

async fn register_batch_reply(state: &AppState, raw: &str) -> String {
    if raw.trim().is_empty() {
        return "*Uso incorrecto del comando:*\n\
                Envía el comando seguido de la lista de clientes, un cliente por línea.\n\n\
                *Formato por línea:*\n`Nombre +Número Día de cada mes (Monto Bandera)`\n\n\
                *Ejemplo:*\n`registrarlote\nVictoria +569292929292 21 de cada mes ($3000🇨🇱)\n\
                Marcelo +51987654321 10 de cada mes (S/50🇵🇪)`"
            .to_string();
    }
    let outcomes = state.ledger.register_batch(raw).await;
    let added: Vec<&str> = outcomes
        .iter()
        .filter_map(|o| o.outcome.as_deref().ok())
        .collect();
    let failed: Vec<String> = outcomes
        .iter()
        .filter_map(|o| {
            o.outcome
                .as_ref()
                .err()
                .map(|e| format!("- {} ({})", o.line, e.user_message()))
        })
        .collect();

    let mut reply = format!(
        "✅ Clientes añadidos exitosamente ({}): {}.",
        added.len(),
        if added.is_empty() {
            "Ninguno".to_string()
        } else {
            added.join(", ")
        }
    );
    if !failed.is_empty() {
        reply.push_str(&format!(
            "\n\n❌ Falló la adición de los siguientes clientes ({}):\n{}",
            failed.len(),
            failed.join("\n")
        ));
    }
    reply
}

async fn remove_reply(state: &AppState, args: &str) -> String {
    let Some(number) = args.split_whitespace().next() else {
        return "*Uso incorrecto:*\n`eliminarcliente <+número>`".to_string();
    };
    match state.ledger.remove(number).await {
        Ok(record) => format!("✅ Cliente *{}* ({number}) eliminado exitosamente.", record.name),
        Err(e) => e.user_message(),
    }
}

fn list_reply(state: &AppState) -> String {
    let clients = state.ledger.list();
    if clients.is_empty() {
        return "❌ No hay clientes registrados en la base de datos de pagos.".to_string();
    }
    let mut out = String::from("📊 *Lista de Clientes y Pagos:*\n\n");
    for (number, record) in clients {
        out.push_str(&format!("*👤 Nombre:* {}\n", record.name));
        out.push_str(&format!("*📞 Número:* {number}\n"));
        out.push_str(&format!("*🗓️ Día de Pago:* {}\n", record.billing_day));
        out.push_str(&format!("*💰 Monto:* {}\n", record.amount_label));
        out.push_str(&format!("*🌎 Bandera:* {}\n", record.country_flag));
        if record.suspended {
            out.push_str("*⏸️ Recordatorios:* suspendidos\n");
        }
        out.push_str("----------------------------\n");
    }
    out
}

async fn suspend_reply(state: &AppState, args: &str, suspended: bool) -> String {
    let Some(number) = args.split_whitespace().next() else {
        return format!(
            "*Uso incorrecto:*\n`{}cliente <+número>`",
            if suspended { "suspender" } else { "activar" }
        );
    };
    match state.ledger.set_suspended(number, suspended).await {
        Ok(()) => {
            let name = state
                .ledger
                .display_name(number)
                .unwrap_or_else(|| number.to_string());
            if suspended {
                format!("⏸️ Recordatorios suspendidos para *{name}* ({number}).")
            } else {
                format!("▶️ Recordatorios reactivados para *{name}* ({number}).")
            }
        }
        Err(e) => e.user_message(),
    }
}

async fn reminder_reply(transport: &dyn Transport, state: &AppState, args: &str) -> String {
    let Some(number) = args.split_whitespace().next() else {
        return "*Uso incorrecto:*\n`recordatorio <+número>`".to_string();
    };
    let Some(record) = state.ledger.get(number) else {
        return EngineError::NotFound(format!("cliente {number} no registrado")).user_message();
    };
    if send_text_logged(transport, "manual_reminder", number, &compose_reminder(&record)).await {
        format!("✅ Recordatorio enviado a *{}* ({number}).", record.name)
    } else {
        "❌ No se pudo enviar el recordatorio. Intenta de nuevo más tarde.".to_string()
    }
}

async fn derivados_reply(state: &AppState, payload: &str) -> String {
    let (sub, rest) = match payload.split_once(char::is_whitespace) {
        Some((s, r)) => (s, r.trim()),
        None => (payload, ""),
    };
    match sub.to_lowercase().as_str() {
        "" => "*Uso correcto de derivados:*\n\
               `derivados añadir <nombre>` - Añade un nuevo derivado.\n\
               `derivados eliminar <nombre>` - Elimina un derivado.\n\
               `derivados ver` - Muestra todos los derivados registrados."
            .to_string(),
        "añadir" | "add" => {
            if rest.is_empty() {
                return "*Uso incorrecto:*\n`derivados añadir <nombre_del_derivado>`".to_string();
            }
            match state.derivados.add(rest).await {
                Ok(()) => format!("✅ Derivado *{rest}* añadido exitosamente."),
                Err(e) => e.user_message(),
            }
        }
        "eliminar" | "del" => {
            if rest.is_empty() {
                return "*Uso incorrecto:*\n`derivados eliminar <nombre_del_derivado>`".to_string();
            }
            match state.derivados.remove(rest).await {
                Ok(()) => format!("✅ Derivado *{rest}* eliminado exitosamente."),
                Err(e) => e.user_message(),
            }
        }
        "ver" | "list" => {
            let listed = state.derivados.list();
            if listed.is_empty() {
                return "ℹ️ No hay derivados registrados en este momento.".to_string();
            }
            let mut out = String::from("📊 *Lista de Derivados:*\n\n");
            for (i, d) in listed.iter().enumerate() {
                out.push_str(&format!(
                    "{}. *{}*\n   Fecha de Creación: {}\n   Clientes Asociados: {}\n",
                    i + 1,
                    d.name,
                    d.created,
                    d.clients.len()
                ));
            }
            out
        }
        _ => "*Subcomando inválido:*\nUsa `derivados añadir | eliminar | ver`.".to_string(),
    }
}
