//! Structured external command execution
use anyhow::{Context, Result, bail};
use log::{debug, trace};
use nix::unistd::getuid;
use std::{
    ffi::OsStr,
    fmt,
    io::ErrorKind,
    path::Path,
    process::{Command, Output},
};

const SUDO: &str = "sudo";

/// The exit code shells use for a missing executable
const NOT_FOUND_CODE: i32 = 127;

/// A single external command as program plus argument list
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    privileged: bool,
    allow_failure: bool,
    quiet: bool,
}

impl Cmd {
    /// Create a new command for the provided program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Create a new command which needs root privileges
    pub fn privileged(program: impl Into<String>) -> Self {
        Self {
            privileged: true,
            ..Self::new(program)
        }
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Append multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Append a path argument
    pub fn path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Do not fail if the command exits unsuccessfully
    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Do not echo the command in demo mode
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// The program to be executed
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments passed to the program
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Returns true if the command needs root privileges
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Returns true if an unsuccessful exit is tolerated
    pub fn is_failure_allowed(&self) -> bool {
        self.allow_failure
    }

    /// Returns true if the command should not be echoed
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            write!(f, "{} ", SUDO)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// The captured result of an executed command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Everything the command wrote to stdout
    pub stdout: String,

    /// Everything the command wrote to stderr
    pub stderr: String,

    /// The exit code, `None` if the process got terminated by a signal
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Create a successful output with the provided stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: Some(0),
        }
    }

    /// Create a failed output with the provided stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            code: Some(code),
        }
    }

    /// Returns true if the command exited with zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        }
    }
}

/// Something able to execute commands
pub trait Runner {
    /// Execute the command and return its output, regardless of the exit status
    fn output(&self, cmd: &Cmd) -> Result<CommandOutput>;

    /// Execute the command and fail if it did not succeed, unless the
    /// command allows a failure
    fn run(&self, cmd: &Cmd) -> Result<CommandOutput> {
        let output = self.output(cmd)?;
        if !output.success() && !cmd.is_failure_allowed() {
            bail!(
                "Command `{}` failed ({}): {}",
                cmd,
                output
                    .code
                    .map_or_else(|| "killed".into(), |c| format!("exit code {}", c)),
                output.stderr.trim()
            );
        }
        Ok(output)
    }
}

/// The runner executing commands on the local system
pub struct SystemRunner {
    sudo: bool,
    demo: bool,
}

impl SystemRunner {
    /// Create a new runner, `sudo` is only used if not already root
    pub fn new(demo: bool) -> Self {
        Self {
            sudo: !getuid().is_root(),
            demo,
        }
    }

    fn command(&self, cmd: &Cmd) -> Command {
        if cmd.is_privileged() && self.sudo {
            let mut c = Command::new(SUDO);
            c.arg(cmd.program()).args(cmd.arguments());
            c
        } else {
            let mut c = Command::new(cmd.program());
            c.args(cmd.arguments());
            c
        }
    }
}

impl Runner for SystemRunner {
    fn output(&self, cmd: &Cmd) -> Result<CommandOutput> {
        if self.demo && !cmd.is_quiet() {
            println!("DEMO: CMD: \"{}\"", cmd);
        }
        trace!("Running {:?} {:?}", cmd.program(), cmd.arguments());

        let output: CommandOutput = match self.command(cmd).output() {
            Ok(output) => output.into(),
            Err(e) if e.kind() == ErrorKind::NotFound && cmd.is_failure_allowed() => {
                debug!("{} not found, tolerating: {}", cmd.program(), e);
                CommandOutput::failed(NOT_FOUND_CODE, e.to_string())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Unable to execute '{}'", cmd.program()));
            }
        };

        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            debug!("{} stdout: {}", cmd.program(), stdout);
        }
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            debug!("{} stderr: {}", cmd.program(), stderr);
        }
        Ok(output)
    }
}
