//! Quote-aware input tokenisation.
//!
//! Whitespace separates tokens; double quotes group whitespace-containing
//! text, and adjacent quoted and unquoted segments concatenate into one
//! token. The first token is the command name, the rest its argv.

/// One tokenised input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub name: String,
    pub argv: Vec<String>,
}

/// The line ended inside a quoted segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnclosedQuote;

/// Tokenise one input line. Returns `Ok(None)` for a blank line.
pub fn tokenize(input: &str) -> Result<Option<CommandLine>, UnclosedQuote> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut in_quotes = false;

    for ch in input.chars() {
        if in_quotes {
            if ch == '"' {
                in_quotes = false;
            } else {
                current.get_or_insert_with(String::new).push(ch);
            }
        } else if ch == '"' {
            in_quotes = true;
            // An opening quote starts a token even if it closes empty.
            current.get_or_insert_with(String::new);
        } else if ch == ' ' || ch == '\t' {
            if let Some(token) = current.take() {
                tokens.push(token);
            }
        } else {
            current.get_or_insert_with(String::new).push(ch);
        }
    }

    if in_quotes {
        return Err(UnclosedQuote);
    }
    if let Some(token) = current.take() {
        tokens.push(token);
    }

    let mut parts = tokens.into_iter();
    Ok(parts.next().map(|name| CommandLine {
        name,
        argv: parts.collect(),
    }))
}
