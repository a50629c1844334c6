//! Fixed, non-generated text the assistant speaks with: greeting, fallbacks and the
//! system instruction sent with every request.

use crate::chat::FailureKind;

pub const DEFAULT_ASSISTANT_NAME: &str = "HSB Assistant";
pub const DEFAULT_FIRM_NAME: &str = "HSB Accounting & Finance";
pub const DEFAULT_BOOKING_URL: &str = "https://calendly.com/abdulhbwork/30min";
pub const DEFAULT_CONTACT_PHONE: &str = "(555) 123-4567";
pub const DEFAULT_CONTACT_EMAIL: &str = "contact@hsbaccounting.com";
pub const DEFAULT_GREETING: &str =
    "Hello! I am the HSB Smart Assistant. How can I help with your accounting questions today?";
pub const TRANSPORT_FALLBACK: &str =
    "I'm having trouble connecting right now. Please try again later.";

/// Services the assistant is allowed to talk about.
pub const SERVICES: [&str; 4] = [
    "Tax Preparation",
    "Bookkeeping",
    "Payroll",
    "Financial Consulting",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub assistant_name: String,
    pub firm_name: String,
    pub greeting: String,
    pub booking_url: String,
    pub contact_phone: String,
    pub contact_email: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            firm_name: DEFAULT_FIRM_NAME.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            booking_url: DEFAULT_BOOKING_URL.to_string(),
            contact_phone: DEFAULT_CONTACT_PHONE.to_string(),
            contact_email: DEFAULT_CONTACT_EMAIL.to_string(),
        }
    }
}

impl Persona {
    /// Shown when no credential is configured. Always carries a direct contact path and
    /// the booking link.
    pub fn unconfigured_fallback(&self) -> String {
        format!(
            "I'm sorry, I cannot connect to the server right now. Please contact the office \
             directly at {} or {}, or book a call at {}",
            self.contact_phone, self.contact_email, self.booking_url
        )
    }

    pub fn transport_fallback(&self) -> &str {
        TRANSPORT_FALLBACK
    }

    pub fn fallback_for(&self, kind: FailureKind) -> String {
        match kind {
            FailureKind::Unconfigured => self.unconfigured_fallback(),
            FailureKind::Transport => self.transport_fallback().to_string(),
        }
    }

    pub fn system_instruction(&self) -> String {
        format!(
            "You are \"{name}\", a helpful, professional, and concise AI assistant for {firm}.\n\
             Your goal is to answer basic accounting, tax, bookkeeping, and payroll questions for \
             potential clients. Politely decline topics outside that domain.\n\
             \n\
             IMPORTANT:\n\
             - If the user asks to book a meeting, call, or consultation, ALWAYS provide this link: {url}\n\
             - Keep answers brief (under 100 words) and easy to understand.\n\
             - Do not give specific legal or binding financial advice; always suggest booking a \
             consultation at {url} for specific cases.\n\
             - Tone: Professional, trustworthy, warm.\n\
             - If asked about services, mention: {services}.\n",
            name = self.assistant_name,
            firm = self.firm_name,
            url = self.booking_url,
            services = SERVICES.join(", "),
        )
    }
}
