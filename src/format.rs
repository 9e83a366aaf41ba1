//! Channel-specific message formatting with minijinja.
//!
//! One formatter renders every outbound representation of an alert:
//! plain text for chat-style channels, subject + HTML for email, and a
//! structured JSON payload for push. Render failures never abort dispatch;
//! they fall back to an unstyled summary line.

use chrono::{DateTime, Utc};
use minijinja::{context, Environment};

use crate::model::Alert;

const TEXT_TEMPLATE: &str = "\
[{{ severity | upper }}] {{ title }}
{{ description }}
Estado: {{ status }} | Nivel de escalado: {{ level }}
Origen: {{ source_type }}{% if source_id %} ({{ source_id }}){% endif %}
Creada: {{ created_at }}";

const EMAIL_SUBJECT_TEMPLATE: &str = "[{{ severity | upper }}] {{ title }}";

const EMAIL_HTML_TEMPLATE: &str = "\
<html><body>
<h2>[{{ severity | upper }}] {{ title }}</h2>
<p>{{ description }}</p>
<table>
<tr><td>Estado</td><td>{{ status }}</td></tr>
<tr><td>Nivel de escalado</td><td>{{ level }}</td></tr>
<tr><td>Origen</td><td>{{ source_type }}{% if source_id %} ({{ source_id }}){% endif %}</td></tr>
<tr><td>Creada</td><td>{{ created_at }}</td></tr>
</table>
</body></html>";

/// Message renderer shared by all channels.
pub struct MessageFormatter {
    env: Environment<'static>,
}

/// Fully rendered email content.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl MessageFormatter {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("text", TEXT_TEMPLATE)
            .expect("static template parses");
        env.add_template("email_subject", EMAIL_SUBJECT_TEMPLATE)
            .expect("static template parses");
        env.add_template("email_html", EMAIL_HTML_TEMPLATE)
            .expect("static template parses");
        Self { env }
    }

    fn render(&self, name: &str, alert: &Alert, level: usize) -> Option<String> {
        let template = self.env.get_template(name).ok()?;
        template
            .render(context! {
                title => alert.title,
                description => alert.description,
                severity => alert.severity.as_str(),
                status => alert.status.as_str(),
                level => level,
                source_type => alert.source_type,
                source_id => alert.source_id,
                created_at => format_timestamp(alert.created_at),
            })
            .map_err(|e| {
                tracing::warn!(template = name, error = %e, "Template render failed, using fallback");
                e
            })
            .ok()
    }

    fn fallback(&self, alert: &Alert, level: usize) -> String {
        format!(
            "[{}] {} (level {}): {}",
            alert.severity.as_str().to_uppercase(),
            alert.title,
            level,
            alert.description
        )
    }

    /// Plain-text body for chat-style channels (whatsapp, sms).
    pub fn text(&self, alert: &Alert, level: usize) -> String {
        self.render("text", alert, level)
            .unwrap_or_else(|| self.fallback(alert, level))
    }

    /// Subject, plain-text and HTML bodies for the email channel.
    pub fn email(&self, alert: &Alert, level: usize) -> RenderedEmail {
        RenderedEmail {
            subject: self
                .render("email_subject", alert, level)
                .unwrap_or_else(|| self.fallback(alert, level)),
            text: self.text(alert, level),
            html: self
                .render("email_html", alert, level)
                .unwrap_or_else(|| self.fallback(alert, level)),
        }
    }

    /// Structured payload for the push channel.
    pub fn push(&self, alert: &Alert, level: usize) -> serde_json::Value {
        serde_json::json!({
            "alert_id": alert.id,
            "title": alert.title,
            "body": alert.description,
            "severity": alert.severity.as_str(),
            "status": alert.status.as_str(),
            "escalation_level": level,
            "source_type": alert.source_type,
            "source_id": alert.source_id,
            "created_at": alert.created_at.to_rfc3339(),
        })
    }
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
