//! Operator prompts for irreversible steps

use std::io::{self, BufRead, Write};

use crate::errors::ScriptError;

/// Ask the operator a yes/no question on the terminal, defaulting to no
pub fn confirm(prompt: &str) -> Result<bool, ScriptError> {
    let stdin = io::stdin();
    confirm_with(prompt, &mut stdin.lock(), &mut io::stdout())
}

/// Ask a yes/no question over the given streams, defaulting to no.
///
/// End of input counts as a no.
pub fn confirm_with<R: BufRead, W: Write>(
    prompt: &str,
    input: &mut R,
    output: &mut W,
) -> Result<bool, ScriptError> {
    loop {
        write!(output, "{} [y/N]: ", prompt).map_err(|e| ScriptError::Prompt(e.to_string()))?;
        output
            .flush()
            .map_err(|e| ScriptError::Prompt(e.to_string()))?;

        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .map_err(|e| ScriptError::Prompt(e.to_string()))?;
        if read == 0 {
            return Ok(false);
        }

        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "" | "n" | "no" => return Ok(false),
            _ => writeln!(output, "Please answer y or n.")
                .map_err(|e| ScriptError::Prompt(e.to_string()))?,
        }
    }
}
