use serde::Deserialize;
use tracing::debug;

use crate::config::ResponderConfig;
use crate::error::EngineResult;

const DEFAULT_PERSONA: &str = "Eres un amable y eficiente asistente virtual de pagos. \
Tu objetivo es ayudar a los usuarios a entender y agilizar sus procesos de pago, \
respondiendo de forma servicial, profesional y concisa. Si no puedes resolver una duda \
concreta, indica al usuario que contacte al propietario.";

/// A reply containing any of these signals the assistant deflected the
/// question to the owner; the engine escalates.
const DEFAULT_DEFLECTION_PHRASES: [&str; 14] = [
    "contacta al propietario",
    "necesitas hablar con el propietario",
    "no puedo ayudarte con eso",
    "supera mi capacidad",
    "no tengo información detallada sobre eso",
    "para eso, por favor, consulta con el propietario",
    "no puedo resolver eso directamente",
    "lo siento, no tengo esa información",
    "para casos específicos",
    "requiere la atención del propietario",
    "no puedo proporcionar esa información",
    "fuera de mi alcance",
    "no tengo acceso a esa información",
    "necesitarías contactar directamente",
];

#[derive(Debug, Clone)]
pub struct ResponderReply {
    pub reply: String,
    pub escalate: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: bool,
    response: Option<String>,
}

/// Narrow client for the opaque conversational service: prompt text in,
/// reply plus an escalation signal out. Its internals stay external.
pub struct ResponderClient {
    http: reqwest::Client,
    api_url: String,
    persona: String,
    deflection_phrases: Vec<String>,
}

impl ResponderClient {
    pub fn from_config(cfg: &ResponderConfig) -> Option<Self> {
        if !cfg.enabled.unwrap_or(true) {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            api_url: cfg.api_url.clone(),
            persona: cfg
                .persona
                .clone()
                .unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            deflection_phrases: cfg.deflection_phrases.clone().unwrap_or_else(|| {
                DEFAULT_DEFLECTION_PHRASES
                    .iter()
                    .map(|p| p.to_string())
                    .collect()
            }),
        })
    }

    fn detect_escalation(&self, reply: &str) -> bool {
        let lowered = reply.to_lowercase();
        self.deflection_phrases
            .iter()
            .any(|p| lowered.contains(&p.to_lowercase()))
    }

    /// `Ok(None)` means the service declined to answer; the caller stays
    /// silent, exactly as with no responder configured.
    pub async fn query(&self, text: &str) -> EngineResult<Option<ResponderReply>> {
        let resp: ApiResponse = self
            .http
            .get(&self.api_url)
            .query(&[("content", self.persona.as_str()), ("text", text)])
            .send()
            .await?
            .json()
            .await?;

        if !resp.status {
            debug!("responder declined (status=false)");
            return Ok(None);
        }
        let Some(reply) = resp.response.filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        let escalate = self.detect_escalation(&reply);
        Ok(Some(ResponderReply { reply, escalate }))
    }
}

/// Urgent-consultation notice sent to the owner when the responder deflects.
pub fn owner_escalation_notice(
    user_name: &str,
    user_number: &str,
    question: &str,
    reply: &str,
) -> String {
    format!(
        "❗ *Atención: Consulta Urgente del Chatbot*\n\n\
         El chatbot ha derivado una consulta que no pudo resolver. \
         El usuario ha sido informado de que debe contactar al propietario.\n\n\
         *👤 Usuario:* {user_name}\n\
         *📞 Número:* {user_number}\n\
         *💬 Última pregunta:* `{question}`\n\
         *🤖 Respuesta que motivó la derivación:* `{reply}`"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ResponderClient {
        ResponderClient::from_config(&ResponderConfig {
            enabled: Some(true),
            api_url: "http://localhost/responder".to_string(),
            persona: None,
            deflection_phrases: None,
        })
        .unwrap()
    }

    #[test]
    fn disabled_config_yields_no_client() {
        assert!(ResponderClient::from_config(&ResponderConfig {
            enabled: Some(false),
            api_url: "http://x".to_string(),
            persona: None,
            deflection_phrases: None,
        })
        .is_none());
    }

    #[test]
    fn escalation_phrase_detection() {
        let c = client();
        assert!(c.detect_escalation("Para eso, CONTACTA AL PROPIETARIO por favor"));
        assert!(c.detect_escalation("eso está fuera de mi alcance"));
        assert!(!c.detect_escalation("Tu pago vence el día 21, puedes enviar el comprobante aquí"));
    }

    #[test]
    fn escalation_notice_carries_context() {
        let notice = owner_escalation_notice("Ana", "+52100", "¿puedo pagar en euros?", "no tengo esa información");
        assert!(notice.contains("Ana"));
        assert!(notice.contains("+52100"));
        assert!(notice.contains("¿puedo pagar en euros?"));
    }
}
