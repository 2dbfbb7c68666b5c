use crate::progress::ProgressSlot;
use console::{Color, style};
use log::{Level, LevelFilter, Log, Metadata, Record, set_max_level};
use std::io::{Write, stderr};

/// The main logging facade
pub struct Logger {
    level: LevelFilter,
    progress: ProgressSlot,
}

impl Logger {
    /// Create a new logger which prints above the progress bar of the slot
    pub fn new(level: LevelFilter, progress: ProgressSlot) -> Box<Self> {
        set_max_level(level);
        Self { level, progress }.into()
    }

    fn format(record: &Record<'_>) -> String {
        let (level_name, level_color) = match record.level() {
            Level::Error => ("ERROR", Color::Red),
            Level::Warn => ("WARN ", Color::Yellow),
            Level::Info => ("INFO ", Color::Green),
            Level::Debug => ("DEBUG", Color::Cyan),
            Level::Trace => ("TRACE", Color::Magenta),
        };
        format!(
            "{}{}{} {}",
            style("[").white().dim(),
            style(level_name).fg(level_color),
            style("]").white().dim(),
            style(record.args()),
        )
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let msg = Self::format(record);
        match self.progress.read().as_ref() {
            Some(pb) => pb.println(msg),
            None => {
                writeln!(stderr(), "{}", msg).ok();
            }
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressBar;
    use log::MetadataBuilder;

    #[test]
    fn logger_success() {
        let l = Logger::new(LevelFilter::Info, ProgressSlot::default());
        let record = Record::builder()
            .args(format_args!("Error!"))
            .level(Level::Error)
            .build();
        l.log(&record);
        let err_metadata = MetadataBuilder::new().level(Level::Error).build();
        assert!(l.enabled(&err_metadata));
        let dbg_metadata = MetadataBuilder::new().level(Level::Debug).build();
        assert!(!l.enabled(&dbg_metadata));
        l.flush();
    }

    #[test]
    fn logger_with_progress_bar() {
        let slot = ProgressSlot::default();
        *slot.write() = Some(ProgressBar::hidden());
        let l = Logger::new(LevelFilter::Debug, slot);
        let record = Record::builder()
            .args(format_args!("Deploying"))
            .level(Level::Info)
            .build();
        l.log(&record);
    }
}
