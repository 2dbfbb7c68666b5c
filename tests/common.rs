#![allow(dead_code)]
use anyhow::Result;
use kubeup::{Cmd, CommandOutput, Reporter, Runner, Sleeper};
use std::{cell::RefCell, collections::VecDeque, time::Duration};

/// Replies with the queued outputs in order, the last one is repeated forever
pub struct QueueRunner {
    outputs: RefCell<VecDeque<CommandOutput>>,
    last: RefCell<CommandOutput>,
    pub calls: RefCell<usize>,
}

impl QueueRunner {
    pub fn new(outputs: Vec<CommandOutput>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into()),
            last: RefCell::new(CommandOutput::ok("")),
            calls: RefCell::new(0),
        }
    }
}

impl Runner for QueueRunner {
    fn output(&self, _: &Cmd) -> Result<CommandOutput> {
        *self.calls.borrow_mut() += 1;
        if let Some(next) = self.outputs.borrow_mut().pop_front() {
            *self.last.borrow_mut() = next;
        }
        Ok(self.last.borrow().clone())
    }
}

/// Records the requested sleeps instead of blocking
#[derive(Default)]
pub struct FakeSleeper {
    pub slept: Vec<Duration>,
}

impl Sleeper for FakeSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.slept.push(duration);
    }
}

/// Collects the status lines
#[derive(Default)]
pub struct Lines {
    pub statuses: Vec<String>,
}

impl Reporter for Lines {
    fn step(&mut self, _: &str, _: &str) {}

    fn status(&mut self, msg: &str) {
        self.statuses.push(msg.into());
    }

    fn reset(&mut self, _: u64) {}
}

/// Render `n` pod table rows
pub fn pods(n: usize, state: &str) -> CommandOutput {
    CommandOutput::ok(
        (0..n)
            .map(|i| format!("kube-system pod-{} 1/1 {} 0 1m\n", i, state))
            .collect::<String>(),
    )
}
