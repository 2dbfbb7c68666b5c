use anyhow::{Context, Result};
use console::{Term, style};

const BANNER_WIDTH: usize = 100;

/// Format a bannerized message
pub fn banner(description: &str) -> String {
    let width = description
        .lines()
        .map(str::len)
        .max()
        .unwrap_or_default()
        .min(BANNER_WIDTH);
    let line = "*".repeat(width);
    format!("\n{}\n{}\n{}\n", line, description, line)
}

/// Explains the deployment steps and waits for the user
pub struct Demo {
    enabled: bool,
    force: bool,
}

impl Demo {
    /// Create a new demo, `force` skips waiting for confirmation
    pub fn new(enabled: bool, force: bool) -> Self {
        Self { enabled, force }
    }

    /// Returns true if demo mode is active
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Display some information and wait for confirmation
    pub fn show(&self, title: &str, description: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let term = Term::stdout();
        term.write_line(&banner(&format!(
            "{}\n{}\n{}",
            style("DEMO").cyan().bold(),
            style(title).bold(),
            description
        )))?;

        if self.force {
            term.write_line("Demo: Continuing with Demo")?;
        } else {
            term.write_str("Press Enter to continue with demo...")?;
            term.read_line().context("Unable to read demo confirmation")?;
        }
        Ok(())
    }

    /// Print the output of an informational command
    pub fn print(&self, output: &str) {
        if self.enabled {
            println!("{}", output.trim_end());
        }
    }
}
