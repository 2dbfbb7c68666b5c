use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, info};
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};

/// The progress bar shared between the logger and the progress reporter
pub type ProgressSlot = Arc<RwLock<Option<ProgressBar>>>;

/// Receives human readable progress of a deployment
pub trait Reporter {
    /// Advance to the next step and announce it
    fn step(&mut self, component: &str, msg: &str);

    /// Announce an intermediate status without advancing
    fn status(&mut self, msg: &str);

    /// Start counting from zero again towards a new final step count
    fn reset(&mut self, total: u64);
}

/// A monotonic step counter with a fixed final value
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressCounter {
    position: u64,
    total: u64,
}

impl ProgressCounter {
    /// Create a new counter at zero
    pub fn new(total: u64) -> Self {
        Self { position: 0, total }
    }

    /// Increment the counter and return the new position
    pub fn advance(&mut self) -> u64 {
        self.position += 1;
        self.position
    }

    /// Set the counter back to zero with a new final value
    pub fn reset(&mut self, total: u64) {
        self.position = 0;
        self.total = total;
    }

    /// The current position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The final value
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Format a step line for the current position
    pub fn label(&self, component: &str, msg: &str) -> String {
        format!(
            "({:02}/{:02}) {} - {}",
            self.position, self.total, component, msg
        )
    }
}

/// The terminal progress reporter
pub struct Progress {
    counter: ProgressCounter,
    slot: ProgressSlot,
}

impl Progress {
    /// Create a new progress reporter, the bar is only shown if info
    /// messages are logged at all
    pub fn new(total: u64, level: LevelFilter, slot: ProgressSlot) -> Self {
        if level >= LevelFilter::Info {
            let bar = ProgressBar::new(total);
            if let Ok(s) = ProgressStyle::default_bar().template(&format!(
                "{}{}{} {}",
                style("[").white().dim(),
                "{spinner:.green} {elapsed:>3}",
                style("]").white().dim(),
                "{bar:25.green/blue} {pos:>2}/{len} {msg}",
            )) {
                bar.set_style(s);
            }
            bar.enable_steady_tick(Duration::from_millis(100));
            *slot.write() = Some(bar);
        }
        Self {
            counter: ProgressCounter::new(total),
            slot,
        }
    }

    /// The underlying counter
    pub fn counter(&self) -> &ProgressCounter {
        &self.counter
    }

    /// Remove the bar from the terminal
    pub fn finish(&self) {
        if let Some(bar) = self.slot.write().take() {
            bar.finish_and_clear();
        }
    }
}

impl Reporter for Progress {
    fn step(&mut self, component: &str, msg: &str) {
        self.counter.advance();
        if let Some(bar) = self.slot.read().as_ref() {
            bar.set_position(self.counter.position());
            bar.set_message(msg.to_owned());
        }
        info!("{}", self.counter.label(component, msg));
    }

    fn status(&mut self, msg: &str) {
        info!("  {}", msg);
    }

    fn reset(&mut self, total: u64) {
        self.counter.reset(total);
        if let Some(bar) = self.slot.read().as_ref() {
            bar.set_length(total);
            bar.set_position(0);
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// A reporter which only records what it was told
    #[derive(Default)]
    pub struct Recorder {
        pub steps: Vec<String>,
        pub statuses: Vec<String>,
        pub counter: ProgressCounter,
    }

    impl Reporter for Recorder {
        fn step(&mut self, component: &str, msg: &str) {
            self.counter.advance();
            self.steps.push(self.counter.label(component, msg));
        }

        fn status(&mut self, msg: &str) {
            self.statuses.push(msg.into());
        }

        fn reset(&mut self, total: u64) {
            self.counter.reset(total);
        }
    }

    #[test]
    fn counter_label() {
        let mut c = ProgressCounter::new(15);
        c.advance();
        c.advance();
        assert_eq!(c.label("Kubernetes", "Setup NTP"), "(02/15) Kubernetes - Setup NTP");
    }

    #[test]
    fn counter_reset() {
        let mut c = ProgressCounter::new(3);
        assert_eq!(c.advance(), 1);
        c.reset(7);
        assert_eq!(c.position(), 0);
        assert_eq!(c.total(), 7);
    }

    #[test]
    fn progress_without_bar() {
        let slot = ProgressSlot::default();
        let mut p = Progress::new(2, LevelFilter::Error, slot.clone());
        assert!(slot.read().is_none());
        p.step("Kubernetes", "one");
        p.reset(4);
        assert_eq!(p.counter().position(), 0);
        assert_eq!(p.counter().total(), 4);
    }

    #[test]
    fn progress_with_bar() {
        let slot = ProgressSlot::default();
        let mut p = Progress::new(2, LevelFilter::Info, slot.clone());
        assert!(slot.read().is_some());
        p.step("Kubernetes", "one");
        assert_eq!(p.counter().position(), 1);
        p.finish();
        assert!(slot.read().is_none());
    }
}
