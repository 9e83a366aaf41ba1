//! Request and response bodies for the provider's messages endpoint.

use serde::{Deserialize, Serialize};

/// POST body for `/{phone_number_id}/messages`.
#[derive(Debug, Serialize)]
pub struct TemplateMessageRequest<'a> {
    pub messaging_product: &'static str,
    pub to: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub template: Template<'a>,
}

#[derive(Debug, Serialize)]
pub struct Template<'a> {
    pub name: &'a str,
    pub language: Language<'a>,
    pub components: Vec<Component>,
}

#[derive(Debug, Serialize)]
pub struct Language<'a> {
    pub code: &'a str,
}

#[derive(Debug, Serialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Serialize)]
pub struct Parameter {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl<'a> TemplateMessageRequest<'a> {
    pub fn new(
        to: &'a str,
        template_name: &'a str,
        language: &'a str,
        parameters: &[String],
    ) -> Self {
        let components = if parameters.is_empty() {
            Vec::new()
        } else {
            vec![Component {
                kind: "body",
                parameters: parameters
                    .iter()
                    .map(|p| Parameter {
                        kind: "text",
                        text: p.clone(),
                    })
                    .collect(),
            }]
        };

        Self {
            messaging_product: "whatsapp",
            to,
            kind: "template",
            template: Template {
                name: template_name,
                language: Language { code: language },
                components,
            },
        }
    }
}

/// Success body: the provider echoes one message id per accepted recipient.
#[derive(Debug, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub messages: Vec<SentMessageId>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessageId {
    pub id: String,
}

impl SendResponse {
    pub fn first_message_id(&self) -> Option<&str> {
        self.messages.first().map(|m| m.id.as_str())
    }
}

/// Error body on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: i64,
}

impl ErrorResponse {
    pub fn describe(&self) -> String {
        match &self.error {
            Some(detail) => format!("{} (code {})", detail.message, detail.code),
            None => "no error body".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let request = TemplateMessageRequest::new(
            "34600111222",
            "alerta_critica",
            "es",
            &["Pump offline".to_string(), "critical".to_string()],
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["messaging_product"], "whatsapp");
        assert_eq!(json["to"], "34600111222");
        assert_eq!(json["type"], "template");
        assert_eq!(json["template"]["name"], "alerta_critica");
        assert_eq!(json["template"]["language"]["code"], "es");
        assert_eq!(json["template"]["components"][0]["type"], "body");
        assert_eq!(
            json["template"]["components"][0]["parameters"][1]["text"],
            "critical"
        );
    }

    #[test]
    fn parameterless_request_has_no_components() {
        let request = TemplateMessageRequest::new("34600111222", "ping", "es", &[]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["template"]["components"], serde_json::json!([]));
    }

    #[test]
    fn response_extracts_first_id() {
        let body = r#"{"messaging_product":"whatsapp","messages":[{"id":"wamid.A1"}]}"#;
        let parsed: SendResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.first_message_id(), Some("wamid.A1"));
    }

    #[test]
    fn empty_response_has_no_id() {
        let parsed: SendResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.first_message_id(), None);
    }

    #[test]
    fn error_body_describes() {
        let body = r#"{"error":{"message":"Invalid parameter","code":131009}}"#;
        let parsed: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.describe(), "Invalid parameter (code 131009)");
    }
}
