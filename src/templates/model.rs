//! Message templates and the default sequence set.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DEFAULT_DELAY_DAYS;

pub const WELCOME: &str = "Welcome";
pub const RE_ENGAGEMENT: &str = "Re-engagement";
pub const CONVERSION: &str = "Conversion";
pub const LIMITED_TIME_OFFER: &str = "Limited Time Offer";

/// A named, ordered message template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    /// Unique lookup key used by the scheduler.
    pub name: String,
    pub subject: String,
    pub html_body: String,
    /// Order 0 is the Welcome template sent at launch.
    pub order: i64,
    /// Days until the next follow-up after this template is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_days: Option<u32>,
}

impl Template {
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        order: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            subject: subject.into(),
            html_body: html_body.into(),
            order,
            delay_days: None,
        }
    }

    /// Builder: set delay in days.
    pub fn with_delay_days(mut self, days: u32) -> Self {
        self.delay_days = Some(days);
        self
    }

    /// Configured delay, or `fallback` when unset.
    pub fn delay_or(&self, fallback: u32) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.delay_days.unwrap_or(fallback)))
    }
}

/// Fields accepted when creating or updating a template through the admin surface.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateInput {
    pub name: String,
    pub subject: String,
    pub html_body: String,
    pub order: i64,
    #[serde(default)]
    pub delay_days: Option<u32>,
}

impl TemplateInput {
    pub fn into_template(self, id: Uuid) -> Template {
        Template {
            id,
            name: self.name,
            subject: self.subject,
            html_body: self.html_body,
            order: self.order,
            delay_days: self.delay_days,
        }
    }
}

/// The four templates seeded into an empty store.
pub fn default_templates() -> Vec<Template> {
    vec![
        Template::new(
            WELCOME,
            "Quick question for you, {{name}}",
            r#"<div style="font-family: Arial, sans-serif; padding: 20px; line-height: 1.6; color: #333;">
  <p>Hi {{name}},</p>
  <p>I came across your brand online and think there is room to turn more of your visitors into customers.</p>
  <p>We build high-conversion websites and apps that are designed to drive revenue.</p>
  <p>Would you be open to a 5-minute chat about it?</p>
  <p>Best,<br>The Outreach Team</p>
</div>"#,
            0,
        )
        .with_delay_days(2),
        Template::new(
            RE_ENGAGEMENT,
            "Did you see my last email, {{name}}?",
            r#"<div style="font-family: Arial, sans-serif; padding: 20px; line-height: 1.6; color: #333;">
  <p>Hey {{name}},</p>
  <p>Just sliding this back to the top of your inbox.</p>
  <p>If you'd like to see a few recent case studies, hit reply.</p>
  <p>Cheers,<br>The Outreach Team</p>
</div>"#,
            1,
        )
        .with_delay_days(DEFAULT_DELAY_DAYS),
        Template::new(
            CONVERSION,
            "Exclusive strategy for {{name}}",
            r#"<div style="font-family: Arial, sans-serif; padding: 20px; line-height: 1.6; color: #333;">
  <p>Hi {{name}},</p>
  <p>Great to hear from you! I've put together a <strong>free 15-minute audit</strong> for your brand.</p>
  <p>Reply with "YES" to book your session.</p>
  <p>Talk soon,<br>The Outreach Team</p>
</div>"#,
            2,
        )
        .with_delay_days(DEFAULT_DELAY_DAYS),
        Template::new(
            LIMITED_TIME_OFFER,
            "Last chance: 50% off for {{name}}",
            r#"<div style="font-family: Arial, sans-serif; padding: 20px; line-height: 1.6; color: #333;">
  <p>Hi {{name}},</p>
  <p>This is my final email about this offer: <strong>50% off</strong> our standard fee if you sign up in the next 48 hours.</p>
  <p>Last call,<br>The Outreach Team</p>
</div>"#,
            3,
        )
        .with_delay_days(DEFAULT_DELAY_DAYS),
    ]
}
