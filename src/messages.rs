use crate::protocol::RetryAfter;

pub const WELCOME_TEXT: &str = "
Hi, I'm DietMate. Ask me about nutrition, meal ideas or healthy eating.

/attach <path>  Attach a csv, json, xml, html, xls(x) or txt file
/help           Show the help dialogue
/quit           Quit the application
";

pub const HELP_TEXT: &str = "
DietMate chat

/attach <path>  Attach a file to the next message
/detach         Remove the attached file
/copy [n]       Copy the nth code block of the last reply (default 1)
/reset          Clear the conversation and start a new session
/help           Show this help dialogue
/quit           Quit the application

Enter sends, Shift+Enter adds a line, Ctrl+T toggles the @ prefix
";

pub const GENERATING: &str = "Generating...";
pub const SESSION_EXPIRED: &str = "Your session has expired. Please reset the conversation to start a new one.";
pub const NO_RESPONSE: &str = "Something went wrong. The server did not return a response.";
pub const FETCH_FAILED: &str = "Failed to fetch data from the server. Please try again.";
pub const NO_SESSION: &str = "No session is available yet. Retrying, please send again in a moment.";
pub const CONVERSATION_RESET: &str = "Conversation reset.";

pub fn rate_limited(retry_after: Option<&RetryAfter>) -> String {
    match retry_after {
        Some(RetryAfter::Seconds(secs)) => format!(
            "Rate limit exceeded. Please try again in {} seconds.",
            secs
        ),
        Some(RetryAfter::Number(number)) => format!(
            "Rate limit exceeded. Please try again in {} seconds.",
            number
        ),
        Some(RetryAfter::Text(text)) => {
            format!("Rate limit exceeded. Please try again in {}.", text)
        }
        None => "Rate limit exceeded. Please try again later.".to_string(),
    }
}

/// The text shown for a user turn that carries a file.
pub fn with_attachment_marker(prompt: &str, file_name: &str) -> String {
    let marker = format!("[Uploaded file: {}]", file_name);
    if prompt.is_empty() {
        marker
    } else {
        format!("{}\n\n{}", prompt, marker)
    }
}
