//! System prompts and prompt assembly for the assistant modes

/// System prompt for the pre-ticket triage conversation
pub const TRIAGE_SYSTEM_PROMPT: &str = "You are a support triage assistant for an IT help desk. \
The user describes a problem before a ticket is opened. Ask short, specific clarifying \
questions one at a time, suggest safe self-service steps when they are likely to help, \
and never invent account details. Keep every answer under 150 words.";

/// System prompt for free-form assistant chat
pub const GENERIC_CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant for a support \
ticket system. Answer concisely and say so when you are not sure.";

/// Build the opening user turn of a triage conversation
pub fn triage_problem_description(title: &str, description: &str, urgency: Option<&str>) -> String {
    let mut text = format!("Title: {}\nDescription: {}", title.trim(), description.trim());
    if let Some(urgency) = urgency.map(str::trim).filter(|u| !u.is_empty()) {
        text.push_str("\nUrgency: ");
        text.push_str(urgency);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_description_layout() {
        assert_eq!(
            triage_problem_description(" VPN down ", "Cannot connect since 9am", Some("high")),
            "Title: VPN down\nDescription: Cannot connect since 9am\nUrgency: high"
        );
        assert_eq!(
            triage_problem_description("Printer", "Jams", Some("  ")),
            "Title: Printer\nDescription: Jams"
        );
    }
}
