/// Phrases that mean the participant is ending the call
pub const FAREWELL_PHRASES: &[&str] = &[
    "goodbye",
    "bye",
    "thank you so much",
    "thanks so much",
    "have a good day",
    "have a great day",
    "talk to you later",
    "that's all i needed",
    "that's everything",
];

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `text` says goodbye
///
/// Matches whole words so "bye" does not fire inside "abbey".
pub fn is_farewell(text: &str) -> bool {
    let said = words(text);
    FAREWELL_PHRASES.iter().any(|phrase| {
        let phrase = words(phrase);
        said.windows(phrase.len()).any(|window| window == phrase.as_slice())
    })
}
