/// Placeholder substituted with the first user message.
pub const MESSAGE_PLACEHOLDER: &str = "{message}";

/// Instruction wrapped around the first user message when asking for a title.
pub const TITLE_PROMPT: &str = r#"Write a short title (at most six words) for a conversation that begins with the message below.
Reply with the title only and nothing else: no quotes, no punctuation at the end, no explanation.

Message:
{message}"#;

/// Fill a title template with the seed text.
pub fn render_title_prompt(template: &str, seed: &str) -> String {
    template.replace(MESSAGE_PLACEHOLDER, seed)
}
