use std::{
    collections::BTreeMap,
    io::Write,
    process::{Command, Stdio},
    thread,
};

use log::debug;

use crate::{keepsake_error, Result};

/// What an external tool sees on its standard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinFeed {
    Null,
    /// Writes the line over and over until the child stops reading. Used to
    /// confirm every interactive prompt a tool raises.
    Repeat(&'static str),
}

/// A single external program invocation.
///
/// `env` is layered on top of the inherited environment of this process for
/// this child only; the parent environment is never modified.
#[derive(Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stdin: StdinFeed,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("stdin", &self.stdin)
            .finish()
    }
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            stdin: StdinFeed::Null,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, feed: StdinFeed) -> Self {
        self.stdin = feed;
        self
    }

    /// `program arg1 arg2`, for log and error messages. Never includes env values.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }

    /// Human readable exit status: `exit code 2` or `killed by signal`.
    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "killed by signal".to_string(),
        }
    }
}

/// Runs external programs. Implementations block until the program exits.
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        debug!("Running {}", invocation.command_line());

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(match invocation.stdin {
                StdinFeed::Null => Stdio::null(),
                StdinFeed::Repeat(_) => Stdio::piped(),
            });

        let spawn_error = |source| {
            keepsake_error!(ToolError {
                program: invocation.program.clone(),
                source: source,
            })
        };

        let mut child = command.spawn().map_err(spawn_error)?;

        let feeder = match (invocation.stdin.clone(), child.stdin.take()) {
            (StdinFeed::Repeat(line), Some(mut stdin)) => Some(
                thread::Builder::new()
                    .name("stdin-feeder".to_string())
                    .spawn(move || {
                        // Ends with a broken pipe once the child exits or
                        // closes its end.
                        while stdin.write_all(line.as_bytes()).is_ok() {}
                    })
                    .map_err(spawn_error)?,
            ),
            _ => None,
        };

        let output = child.wait_with_output().map_err(spawn_error)?;
        if let Some(feeder) = feeder {
            let _ = feeder.join();
        }

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{cell::RefCell, collections::VecDeque};

    use super::*;

    type Handler = Box<dyn Fn(&Invocation) -> Result<ToolOutput>>;

    /// A runner that records every invocation and answers from a handler.
    pub(crate) struct ScriptedRunner {
        handler: Handler,
        pub(crate) calls: RefCell<Vec<Invocation>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new(handler: impl Fn(&Invocation) -> Result<ToolOutput> + 'static) -> Self {
            Self {
                handler: Box::new(handler),
                calls: RefCell::new(Vec::new()),
            }
        }

        /// Answers invocations in order from a fixed queue, then succeeds silently.
        pub(crate) fn queued(outputs: Vec<ToolOutput>) -> Self {
            let queue = RefCell::new(VecDeque::from(outputs));
            Self::new(move |_| Ok(queue.borrow_mut().pop_front().unwrap_or_else(ok)))
        }

        pub(crate) fn command_lines(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(Invocation::command_line)
                .collect()
        }
    }

    impl ToolRunner for ScriptedRunner {
        fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
            self.calls.borrow_mut().push(invocation.clone());
            (self.handler)(invocation)
        }
    }

    pub(crate) fn ok() -> ToolOutput {
        ToolOutput {
            code: Some(0),
            ..Default::default()
        }
    }

    pub(crate) fn ok_with(stdout: &str) -> ToolOutput {
        ToolOutput {
            code: Some(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    pub(crate) fn failed(code: i32, stderr: &str) -> ToolOutput {
        ToolOutput {
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_hides_env() {
        let invocation = Invocation::new("bw", ["login", "--apikey"])
            .env("BW_CLIENTSECRET", "hunter2")
            .env("BW_CLIENTID", "user.123");
        assert_eq!(invocation.command_line(), "bw login --apikey");
        let rendered = format!("{invocation:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("BW_CLIENTSECRET"));
    }

    #[test]
    fn test_status_text() {
        assert_eq!(testing::failed(2, "").status_text(), "exit code 2");
        let killed = ToolOutput::default();
        assert!(!killed.success());
        assert_eq!(killed.status_text(), "killed by signal");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_passes_env_and_captures_output() {
        let invocation =
            Invocation::new("sh", ["-c", "printf %s \"$KEEPSAKE_TEST_VALUE\"; echo oops >&2"])
                .env("KEEPSAKE_TEST_VALUE", "from-env");
        let output = SystemRunner.run(&invocation).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_text(), "from-env");
        assert_eq!(output.stderr_text(), "oops");
        assert!(std::env::var("KEEPSAKE_TEST_VALUE").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_answers_prompts() {
        let invocation =
            Invocation::new("sh", ["-c", "read a; read b; echo \"$a$b\""]).stdin(StdinFeed::Repeat("y\n"));
        let output = SystemRunner.run(&invocation).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_text(), "yy\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_reports_exit_code() {
        let output = SystemRunner
            .run(&Invocation::new("sh", ["-c", "exit 3"]))
            .unwrap();
        assert_eq!(output.code, Some(3));
    }

    #[test]
    fn test_system_runner_missing_program() {
        let err = SystemRunner
            .run(&Invocation::new("keepsake-no-such-program", Vec::<String>::new()))
            .unwrap_err();
        assert!(format!("{err}").starts_with("Failed to run keepsake-no-such-program"));
    }
}
