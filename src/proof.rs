use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{ledger_key_for_sender, ClientLedger};
use crate::transport::{
    decision_buttons, send_media_logged, send_text_logged, InboundMessage, MessageKind,
    OutboundMedia, Transport,
};

/// Payment-intent vocabulary; a caption containing any of these marks the
/// attached media as a proof submission.
const PROOF_KEYWORDS: [&str; 10] = [
    "comprobante",
    "transferencia",
    "pago",
    "pagué",
    "deposito",
    "depósito",
    "recibo",
    "voucher",
    "captura",
    "abono",
];

/// Payloads this small are download failures, not proofs.
const MIN_MEDIA_BYTES: usize = 16;

const ACK_TEXT: &str = "✅ Recibí tu comprobante de pago. Lo estoy verificando. ¡Gracias!";
const FAIL_TEXT: &str =
    "❌ Ocurrió un error procesando tu comprobante. Intenta de nuevo o contacta a soporte.";

pub fn is_payment_proof(text: &str) -> bool {
    let lowered = text.to_lowercase();
    PROOF_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Proof intake: forward the submission to the admin destination with the
/// accept/reject decision pair and acknowledge the sender. Returns whether
/// the event was consumed; any failure past the group/kind checks still
/// consumes it (the sender gets an explicit failure notice instead).
///
/// This workflow never flips `awaiting_payment_response` — the caller that
/// decided a decision is pending does that before invoking it.
pub async fn handle_incoming_media(
    transport: &dyn Transport,
    ledger: &ClientLedger,
    admin_forward: &str,
    msg: &InboundMessage,
) -> bool {
    // group conversations are out of scope for proof intake
    if msg.is_group {
        return false;
    }
    let MessageKind::Media {
        media,
        media_ref,
        caption,
        file_name,
        mime_type,
    } = &msg.kind
    else {
        return false;
    };
    if !media.is_proof_candidate() {
        return false;
    }

    match forward_proof(
        transport,
        ledger,
        admin_forward,
        msg,
        *media,
        media_ref,
        caption.as_deref(),
        file_name.clone(),
        mime_type.clone(),
    )
    .await
    {
        Ok(()) => {
            send_text_logged(transport, "proof_ack", &msg.sender, ACK_TEXT).await;
        }
        Err(e) => {
            warn!("proof intake failed for {}: {e}", msg.sender);
            send_text_logged(transport, "proof_fail_notice", &msg.sender, FAIL_TEXT).await;
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
async fn forward_proof(
    transport: &dyn Transport,
    ledger: &ClientLedger,
    admin_forward: &str,
    msg: &InboundMessage,
    media: crate::transport::MediaKind,
    media_ref: &str,
    caption: Option<&str>,
    file_name: Option<String>,
    mime_type: Option<String>,
) -> EngineResult<()> {
    let key = ledger_key_for_sender(&msg.sender);
    let client_name = ledger
        .display_name(&key)
        .unwrap_or_else(|| "Un cliente desconocido".to_string());

    let mut admin_caption = format!("✅ Comprobante recibido de *{client_name}* ({key}).");
    if let Some(original) = caption.filter(|c| !c.is_empty()) {
        admin_caption.push_str(&format!("\n\n_Leyenda original: {original}_"));
    }

    let bytes = transport.fetch_media(media_ref).await?;
    if bytes.len() < MIN_MEDIA_BYTES {
        return Err(EngineError::Transport(
            "el archivo está vacío o falló la descarga".to_string(),
        ));
    }

    let request = OutboundMedia {
        media,
        bytes,
        caption: admin_caption,
        file_name: file_name.or_else(|| Some("comprobante.pdf".to_string())),
        mime_type,
        buttons: decision_buttons(&msg.sender, media_ref),
    };
    if !send_media_logged(transport, "proof_forward", admin_forward, request).await {
        return Err(EngineError::Transport(
            "no se pudo reenviar el comprobante al administrador".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;
    use crate::transport::{parse_decision_data, Decision, MediaKind};

    fn media_msg(sender: &str, media: MediaKind, caption: Option<&str>) -> InboundMessage {
        InboundMessage {
            sender: sender.to_string(),
            chat: sender.to_string(),
            is_group: false,
            sender_name: Some("Victoria".to_string()),
            kind: MessageKind::Media {
                media,
                media_ref: "m-1".to_string(),
                caption: caption.map(str::to_string),
                file_name: None,
                mime_type: Some("image/jpeg".to_string()),
            },
        }
    }

    fn ledger(dir: &tempfile::TempDir) -> ClientLedger {
        ClientLedger::open(dir.path().join("pagos.json")).unwrap()
    }

    #[test]
    fn classifier_matches_vocabulary() {
        assert!(is_payment_proof("Aquí está mi comprobante de pago"));
        assert!(is_payment_proof("TRANSFERENCIA realizada"));
        assert!(is_payment_proof("ya hice el depósito"));
        assert!(!is_payment_proof("hola, cómo estás"));
        assert!(!is_payment_proof(""));
    }

    #[tokio::test]
    async fn forwards_approval_request_and_acks_sender() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        ledger
            .register("+569292929292", "Victoria", 21, "$3000", "🇨🇱")
            .await
            .unwrap();
        let transport = MockTransport::new();
        transport.put_media("m-1", vec![9u8; 128]);

        let msg = media_msg("+569292929292", MediaKind::Image, Some("mi comprobante"));
        let handled =
            handle_incoming_media(&transport, &ledger, "+5217771303481", &msg).await;
        assert!(handled);

        let media = transport.sent_media();
        assert_eq!(media.len(), 1);
        let (to, request) = &media[0];
        assert_eq!(to, "+5217771303481");
        assert!(request.caption.contains("Victoria"));
        assert!(request.caption.contains("Leyenda original: mi comprobante"));
        assert_eq!(request.buttons.len(), 2);
        let (decision, who, proof) = parse_decision_data(&request.buttons[0].data).unwrap();
        assert_eq!(decision, Decision::Accept);
        assert_eq!(who, "+569292929292");
        assert_eq!(proof, "m-1");

        let texts = transport.sent_texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, "+569292929292");
        assert!(texts[0].1.contains("Recibí tu comprobante"));
    }

    #[tokio::test]
    async fn unknown_sender_gets_fallback_name() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        let transport = MockTransport::new();
        transport.put_media("m-1", vec![9u8; 128]);

        let msg = media_msg("+5215550001111", MediaKind::Document, Some("pago listo"));
        assert!(handle_incoming_media(&transport, &ledger, "+52177", &msg).await);

        let media = transport.sent_media();
        assert!(media[0].1.caption.contains("Un cliente desconocido"));
        assert_eq!(media[0].1.file_name.as_deref(), Some("comprobante.pdf"));
    }

    #[tokio::test]
    async fn group_messages_are_not_handled() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        let transport = MockTransport::new();

        let mut msg = media_msg("+569292929292", MediaKind::Image, Some("comprobante"));
        msg.is_group = true;
        assert!(!handle_incoming_media(&transport, &ledger, "+52177", &msg).await);
        assert!(transport.sent_media().is_empty());
        assert!(transport.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn stickers_and_audio_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        let transport = MockTransport::new();

        for kind in [MediaKind::Sticker, MediaKind::Audio] {
            let msg = media_msg("+569292929292", kind, Some("comprobante"));
            assert!(!handle_incoming_media(&transport, &ledger, "+52177", &msg).await);
        }
        assert!(transport.sent_media().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_notifies_sender_and_consumes_event() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        let transport = MockTransport::new(); // no media registered: fetch fails

        let msg = media_msg("+569292929292", MediaKind::Image, Some("comprobante"));
        assert!(handle_incoming_media(&transport, &ledger, "+52177", &msg).await);

        assert!(transport.sent_media().is_empty());
        let texts = transport.sent_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].1.contains("error procesando tu comprobante"));
    }

    #[tokio::test]
    async fn undersized_payload_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir);
        let transport = MockTransport::new();
        transport.put_media("m-1", vec![1u8; 4]);

        let msg = media_msg("+569292929292", MediaKind::Image, Some("comprobante"));
        assert!(handle_incoming_media(&transport, &ledger, "+52177", &msg).await);
        assert!(transport.sent_media().is_empty());
        assert!(transport.sent_texts()[0].1.contains("error"));
    }
}
