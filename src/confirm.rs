use std::io::{self, BufRead, Write};

/// Capability for the single operator confirmation that gates deletion.
/// Abstracted so the purge driver is testable without a terminal.
pub trait Confirm {
    /// Present the prompt and block for one line of input. Only an explicit
    /// affirmative returns true; everything else is a decline.
    fn confirm(&mut self, prompt: &str) -> io::Result<bool>;
}

/// Reads the confirmation from the interactive input stream. Affirmative iff
/// the trimmed line equals "y", case-insensitively; empty input declines.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        print!("{prompt}");
        io::stdout().flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(is_affirmative(&line))
    }
}

fn is_affirmative(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("y")
}

#[cfg(test)]
mod tests {
    use super::is_affirmative;

    #[test]
    fn only_a_bare_y_affirms() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative("Y"));
        assert!(is_affirmative("  y\n"));

        assert!(!is_affirmative(""));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative("yes"));
        assert!(!is_affirmative("yy"));
    }
}
