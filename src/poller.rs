//! Waiting for the cluster to reach a condition
//!
//! A [`PollTarget`] describes what to wait for: a query command, how to turn
//! its output into a single integer signal and the [`Condition`] the signal
//! has to satisfy. The [`Poller`] repeatedly runs the query until the
//! condition holds or the target's timeout is exhausted.
//!
//! Elapsed time is accounted in retry intervals, not wall clock time. A busy
//! control plane (for example etcd reporting `request timed out`) is retried
//! after a longer backoff without charging the wait budget.
use crate::{
    command::{Cmd, CommandOutput, Runner},
    progress::Reporter,
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use regex::Regex;
use std::{fmt, thread, time::Duration};
use thiserror::Error;

/// The default interval between two queries
pub const RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// The default wait budget
pub const TIMEOUT: Duration = Duration::from_secs(1000);

/// The default backoff after a busy control plane reply
pub const BUSY_BACKOFF: Duration = Duration::from_secs(15);

const BUSY_PATTERN: &str =
    r"(?i)request timed out|etcdserver: (busy|leader changed|too many requests)";

/// The predicate the parsed signal has to satisfy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    /// The signal equals the value exactly
    Equals(u64),

    /// The signal is greater than or equal to the value
    AtLeast(u64),

    /// The signal is zero
    Zero,
}

impl Condition {
    /// Returns true if the signal satisfies the condition
    pub fn is_met(&self, signal: u64) -> bool {
        match *self {
            Condition::Equals(n) => signal == n,
            Condition::AtLeast(n) => signal >= n,
            Condition::Zero => signal == 0,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Equals(n) => write!(f, "{}", n),
            Condition::AtLeast(n) => write!(f, "{}+", n),
            Condition::Zero => write!(f, "0"),
        }
    }
}

/// Turns the raw query output into a signal
#[derive(Clone, Debug)]
pub enum Parser {
    /// Count the non empty lines, optionally skipping a header line
    Rows {
        /// The first line is a header
        header: bool,
    },

    /// Count the non empty lines matching the pattern
    Matching(Regex),

    /// Count the non empty lines not matching the pattern
    NotMatching(Regex),

    /// The trimmed output is a single integer
    Integer,
}

impl Parser {
    /// Count the lines matching a case insensitive literal
    pub fn matching(literal: &str) -> Result<Self> {
        Ok(Parser::Matching(Self::case_insensitive(literal)?))
    }

    /// Count the lines not matching a case insensitive literal
    pub fn not_matching(literal: &str) -> Result<Self> {
        Ok(Parser::NotMatching(Self::case_insensitive(literal)?))
    }

    fn case_insensitive(literal: &str) -> Result<Regex> {
        Regex::new(&format!("(?i){}", regex::escape(literal)))
            .with_context(|| format!("Unable to build pattern for '{}'", literal))
    }

    /// Parse the signal from the output
    pub fn parse(&self, output: &str) -> Result<u64> {
        let mut lines = output.lines().filter(|l| !l.trim().is_empty());
        let count = match self {
            Parser::Rows { header } => {
                if *header {
                    lines.next();
                }
                lines.count()
            }
            Parser::Matching(r) => lines.filter(|l| r.is_match(l)).count(),
            Parser::NotMatching(r) => lines.filter(|l| !r.is_match(l)).count(),
            Parser::Integer => {
                let trimmed = output.trim();
                return trimmed
                    .parse()
                    .with_context(|| format!("Unable to parse '{}' as integer", trimmed));
            }
        };
        Ok(count as u64)
    }
}

/// The condition being awaited
#[derive(Clone, Debug)]
pub struct PollTarget {
    name: String,
    query: Cmd,
    parser: Parser,
    condition: Condition,
    interval: Duration,
    timeout: Duration,
}

impl PollTarget {
    /// Create a new target with the default interval and timeout
    pub fn new(name: impl Into<String>, query: Cmd, parser: Parser, condition: Condition) -> Self {
        Self {
            name: name.into(),
            query: query.quiet(),
            parser,
            condition,
            interval: RETRY_INTERVAL,
            timeout: TIMEOUT,
        }
    }

    /// Set the interval between two queries
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the overall wait budget
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The human readable name of the target
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The query command
    pub fn query(&self) -> &Cmd {
        &self.query
    }

    /// The predicate the signal has to satisfy
    pub fn condition(&self) -> Condition {
        self.condition
    }
}

/// The phase of a single wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// The condition has not been met yet
    Waiting,

    /// The condition has been met
    Satisfied,

    /// The wait budget is exhausted
    TimedOut,
}

/// The state of a single wait
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollState {
    /// The wait budget consumed so far
    pub elapsed: Duration,

    /// The interval between two queries
    pub interval: Duration,

    /// The wait budget
    pub timeout: Duration,

    /// The most recently parsed signal
    pub last_signal: Option<u64>,

    /// Where the wait currently is
    pub phase: Phase,
}

impl PollState {
    fn new(target: &PollTarget) -> Self {
        Self {
            elapsed: Duration::ZERO,
            interval: target.interval,
            timeout: target.timeout,
            last_signal: None,
            phase: Phase::Waiting,
        }
    }
}

/// The target did not reach its condition in time
#[derive(Debug, Error)]
#[error(
    "{target} did not become ready within {} seconds (last signal: {}, expected: {condition})",
    .elapsed.as_secs(),
    .last_signal.map_or_else(|| "none".to_owned(), |s| s.to_string())
)]
pub struct NotReady {
    /// The name of the target
    pub target: String,

    /// The consumed wait budget
    pub elapsed: Duration,

    /// The most recently parsed signal
    pub last_signal: Option<u64>,

    /// The awaited condition
    pub condition: Condition,

    /// The raw output of the last query
    pub output: String,
}

/// What a single query told us
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reading {
    Signal(u64),
    Busy,
    Unavailable,
}

/// Sleeps between two queries
pub trait Sleeper {
    /// Block for the provided duration
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration)
    }
}

/// Waits for poll targets to be satisfied
pub struct Poller<S = ThreadSleeper> {
    busy: Regex,
    busy_backoff: Duration,
    sleeper: S,
}

impl Poller<ThreadSleeper> {
    /// Create a new poller sleeping the current thread
    pub fn new(busy_backoff: Duration) -> Result<Self> {
        Self::with_sleeper(busy_backoff, ThreadSleeper)
    }
}

impl<S: Sleeper> Poller<S> {
    /// Create a new poller using the provided sleeper
    pub fn with_sleeper(busy_backoff: Duration, sleeper: S) -> Result<Self> {
        Ok(Self {
            busy: Regex::new(BUSY_PATTERN).context("Unable to build busy pattern")?,
            busy_backoff,
            sleeper,
        })
    }

    /// The sleeper used between two queries
    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Block until the target is satisfied. A [`NotReady`] error is returned
    /// once the wait budget is exhausted.
    ///
    /// Busy readings are never charged against the budget, so a control plane
    /// which stays busy keeps this call blocked.
    pub fn wait(
        &mut self,
        target: &PollTarget,
        runner: &dyn Runner,
        reporter: &mut dyn Reporter,
    ) -> Result<PollState> {
        debug!(
            "Waiting for {} (expected {}, timeout {}s)",
            target.name(),
            target.condition(),
            target.timeout.as_secs()
        );
        let mut state = PollState::new(target);

        loop {
            let output = runner.output(target.query())?;
            let reading = self.read(target, &output)?;

            let signal = match reading {
                Reading::Busy => {
                    debug!(
                        "Kubernetes - control plane is busy, retrying after {}s",
                        self.busy_backoff.as_secs()
                    );
                    self.sleeper.sleep(self.busy_backoff);
                    continue;
                }
                Reading::Unavailable => None,
                Reading::Signal(s) => Some(s),
            };

            if let Some(s) = signal {
                if target.condition().is_met(s) {
                    state.last_signal = Some(s);
                    state.phase = Phase::Satisfied;
                    info!(
                        "  {} ready ({}/{}) after {} seconds",
                        target.name(),
                        s,
                        target.condition(),
                        state.elapsed.as_secs()
                    );
                    return Ok(state);
                }
            }

            if state.elapsed >= state.timeout {
                state.phase = Phase::TimedOut;
                if signal.is_some() {
                    state.last_signal = signal;
                }
                warn!("Last output of `{}`:\n{}", target.query(), output.stdout.trim_end());
                return Err(NotReady {
                    target: target.name().into(),
                    elapsed: state.elapsed,
                    last_signal: state.last_signal,
                    condition: target.condition(),
                    output: output.stdout,
                }
                .into());
            }

            match signal {
                Some(s) if state.last_signal != Some(s) => {
                    reporter.status(&format!(
                        "*{} status after {} seconds {}:{}*",
                        target.name(),
                        state.elapsed.as_secs(),
                        s,
                        target.condition()
                    ));
                    state.last_signal = Some(s);
                }
                Some(_) => {}
                None => debug!(
                    "Query `{}` failed: {}",
                    target.query(),
                    output.stderr.trim()
                ),
            }

            self.sleeper.sleep(state.interval);
            state.elapsed += state.interval;
        }
    }

    fn read(&self, target: &PollTarget, output: &CommandOutput) -> Result<Reading> {
        if self.busy.is_match(&output.stdout) || self.busy.is_match(&output.stderr) {
            return Ok(Reading::Busy);
        }
        if !output.success() {
            return Ok(Reading::Unavailable);
        }
        let signal = target
            .parser
            .parse(&output.stdout)
            .with_context(|| format!("Unable to read signal for {}", target.name()))?;
        Ok(Reading::Signal(signal))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::{
        command::tests::ScriptedRunner,
        progress::tests::Recorder,
    };

    /// A sleeper which only records the requested durations
    #[derive(Default)]
    pub struct RecordingSleeper {
        pub slept: Vec<Duration>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration)
        }
    }

    fn poller() -> Result<Poller<RecordingSleeper>> {
        Poller::with_sleeper(BUSY_BACKOFF, RecordingSleeper::default())
    }

    fn pods(n: usize) -> CommandOutput {
        CommandOutput::ok(
            (0..n)
                .map(|i| format!("pod-{} 1/1 Running 0 1m\n", i))
                .collect::<String>(),
        )
    }

    fn target(condition: Condition) -> PollTarget {
        PollTarget::new(
            "pods",
            Cmd::new("kubectl").args(["get", "pods", "--no-headers"]),
            Parser::Rows { header: false },
            condition,
        )
    }

    #[test]
    fn condition_is_met() {
        assert!(Condition::Equals(6).is_met(6));
        assert!(!Condition::Equals(6).is_met(7));
        assert!(Condition::AtLeast(6).is_met(7));
        assert!(!Condition::AtLeast(6).is_met(5));
        assert!(Condition::Zero.is_met(0));
        assert!(!Condition::Zero.is_met(1));
    }

    #[test]
    fn parser_rows() -> Result<()> {
        let out = "NAME READY\na 1/1\n\nb 1/1\n";
        assert_eq!(Parser::Rows { header: true }.parse(out)?, 2);
        assert_eq!(Parser::Rows { header: false }.parse(out)?, 3);
        assert_eq!(Parser::Rows { header: true }.parse("")?, 0);
        Ok(())
    }

    #[test]
    fn parser_matching() -> Result<()> {
        let out = "canal-1 Running\ncanal-2 Pending\nkube-dns Running\n";
        assert_eq!(Parser::matching("CANAL")?.parse(out)?, 2);
        assert_eq!(Parser::not_matching("running")?.parse(out)?, 1);
        Ok(())
    }

    #[test]
    fn parser_integer() -> Result<()> {
        assert_eq!(Parser::Integer.parse(" 42\n")?, 42);
        assert!(Parser::Integer.parse("forty-two").is_err());
        Ok(())
    }

    #[test]
    fn wait_immediately_satisfied() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner.reply("get pods", pods(6));
        let mut reporter = Recorder::default();
        let mut p = poller()?;
        let state = p.wait(&target(Condition::AtLeast(6)), &runner, &mut reporter)?;
        assert_eq!(state.phase, Phase::Satisfied);
        assert_eq!(state.elapsed, Duration::ZERO);
        assert!(p.sleeper().slept.is_empty());
        assert!(reporter.statuses.is_empty());
        Ok(())
    }

    #[test]
    fn wait_exact_count() -> Result<()> {
        let runner = ScriptedRunner::default();
        for n in [2, 2, 4, 6] {
            runner.reply("get pods", pods(n));
        }
        let mut reporter = Recorder::default();
        let mut p = poller()?;
        let t = target(Condition::Equals(6))
            .every(Duration::from_secs(10))
            .timeout(Duration::from_secs(2000));
        let state = p.wait(&t, &runner, &mut reporter)?;
        assert_eq!(state.elapsed, Duration::from_secs(30));
        assert_eq!(state.last_signal, Some(6));
        assert_eq!(reporter.statuses.len(), 2);
        assert_eq!(runner.executed().len(), 4);
        Ok(())
    }

    #[test]
    fn wait_timeout() -> Result<()> {
        let runner = ScriptedRunner::default();
        for _ in 0..20 {
            runner.reply("get pods", pods(3));
        }
        let mut reporter = Recorder::default();
        let mut p = poller()?;
        let t = target(Condition::Zero)
            .every(Duration::from_secs(3))
            .timeout(Duration::from_secs(30));
        let err = p
            .wait(&t, &runner, &mut reporter)
            .expect_err("wait should time out");
        let not_ready = err.downcast_ref::<NotReady>().expect("NotReady error");
        assert_eq!(not_ready.elapsed, Duration::from_secs(30));
        assert_eq!(not_ready.last_signal, Some(3));
        assert_eq!(not_ready.output.lines().count(), 3);
        assert_eq!(reporter.statuses.len(), 1);
        assert_eq!(p.sleeper().slept.len(), 10);
        Ok(())
    }

    #[test]
    fn wait_busy_is_not_charged() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner
            .reply("get pods", pods(5))
            .reply(
                "get pods",
                CommandOutput::failed(1, "Error from server: etcdserver: request timed out"),
            )
            .reply("get pods", pods(8));
        let mut reporter = Recorder::default();
        let mut p = poller()?;
        let t = target(Condition::AtLeast(8)).every(Duration::from_secs(3));
        let state = p.wait(&t, &runner, &mut reporter)?;
        assert_eq!(state.elapsed, Duration::from_secs(3));
        assert_eq!(
            p.sleeper().slept,
            vec![Duration::from_secs(3), BUSY_BACKOFF]
        );
        assert_eq!(reporter.statuses.len(), 1);
        Ok(())
    }

    #[test]
    fn wait_unavailable_is_charged() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner
            .reply("get pods", CommandOutput::failed(1, "connection refused"))
            .reply("get pods", CommandOutput::ok(""));
        let mut reporter = Recorder::default();
        let mut p = poller()?;
        let state = p.wait(&target(Condition::Zero), &runner, &mut reporter)?;
        assert_eq!(state.elapsed, RETRY_INTERVAL);
        assert!(reporter.statuses.is_empty());
        Ok(())
    }

    #[test]
    fn wait_parse_failure_propagates() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner.reply("count", CommandOutput::ok("garbage"));
        let mut reporter = Recorder::default();
        let t = PollTarget::new(
            "count",
            Cmd::new("count"),
            Parser::Integer,
            Condition::Zero,
        );
        assert!(poller()?.wait(&t, &runner, &mut reporter).is_err());
        Ok(())
    }
}
