//! Interactive prompts

use std::io::{self, Write};

use anyhow::Result;

/// Ask a yes/no question
///
/// Without a terminal on stdin the answer is always no.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(is_yes(&input))
}

/// Prompt showing the current value; `None` keeps it
pub fn with_default(prompt: &str, current: &str) -> Result<Option<String>> {
    if current.is_empty() {
        print!("{}: ", prompt);
    } else {
        print!("{} [{}]: ", prompt, current);
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    if input.is_empty() {
        Ok(None)
    } else {
        Ok(Some(input.to_string()))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
