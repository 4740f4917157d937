//! Script execution.
//!
//! `run <script> [p1..p4]` starts a task that feeds the script's lines into
//! the command plane one at a time, waiting for each reply before reading
//! the next line. Scripts live on the RAM filesystem; four built-ins are
//! interpreted locally instead of being dispatched:
//!
//! - `stop` ends the current script (a caller resumes),
//! - `call <script> [args...]` runs another script and returns,
//! - `pause <seconds>` sleeps wall-clock time,
//! - `repeat` seeks back to the first line.
//!
//! `$0`..`$3` expand to the positional parameters; an out-of-range index
//! expands to nothing.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use thiserror::Error;
use tokio::{sync::{mpsc, oneshot}, task::JoinHandle};

use crate::{
    logring::{SharedLog, unix_now},
    pipeline::{InboundFrame, ReplyRoute, Source},
    ramfs::Ramfs,
};

/// Positional parameters per script invocation.
pub const SCRIPT_PARAMS: usize = 4;

/// Script startup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The named script is on neither filesystem.
    #[error("script {0} not found")]
    NotFound(String),

    /// A `call` target is missing; the whole run aborts.
    #[error("script {0} in call statement not found")]
    CallNotFound(String),
}

/// Named tasks started by `run`, listed by `process-list` and aborted by
/// `process-stop`.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    inner: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl ProcessTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a task under a name, replacing any finished task of that name.
    pub fn register(&self, name: &str, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.inner.lock() {
            tasks.insert(name.to_string(), handle);
        }
    }

    /// Remove a task entry once it has run to completion.
    pub fn forget(&self, name: &str) {
        if let Ok(mut tasks) = self.inner.lock() {
            if tasks.get(name).is_some_and(JoinHandle::is_finished) {
                tasks.remove(name);
            }
        }
    }

    /// Names with their running/finished state.
    #[must_use]
    pub fn list(&self) -> Vec<(String, bool)> {
        self.inner.lock().map_or_else(
            |_| Vec::new(),
            |tasks| {
                let mut out: Vec<(String, bool)> =
                    tasks.iter().map(|(name, h)| (name.clone(), !h.is_finished())).collect();
                out.sort();
                out
            },
        )
    }

    /// Abort a task by name; reports whether it existed.
    pub fn stop(&self, name: &str) -> bool {
        let Ok(mut tasks) = self.inner.lock() else {
            return false;
        };

        match tasks.remove(name) {
            Some(handle) => {
                handle.abort();
                true
            },
            None => false,
        }
    }
}

/// One frame of the script call stack.
#[derive(Debug)]
struct ScriptFrame {
    name: String,
    lines: Vec<String>,
    pos: usize,
    params: [String; SCRIPT_PARAMS],
}

/// Spawns script tasks; cloneable so the dispatcher and the runtime share
/// one process table.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    ramfs: Ramfs,
    intake: mpsc::Sender<InboundFrame>,
    log: SharedLog,
    processes: ProcessTable,
}

impl ScriptRunner {
    /// Wire the runner to its collaborators.
    #[must_use]
    pub fn new(
        ramfs: Ramfs,
        intake: mpsc::Sender<InboundFrame>,
        log: SharedLog,
        processes: ProcessTable,
    ) -> Self {
        Self { ramfs, intake, log, processes }
    }

    /// The shared process table.
    #[must_use]
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Start a script task. The task runs until the script (and everything
    /// it calls) completes or `process-stop` aborts it.
    pub fn spawn(&self, script: &str, params: [String; SCRIPT_PARAMS]) {
        let runner = self.clone();
        let name = script.to_string();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            runner.run(&task_name, params).await;
        });

        self.processes.register(&name, handle);
    }

    fn load(&self, script: &str) -> Result<Vec<String>, ScriptError> {
        let bytes = self
            .ramfs
            .read_file(script)
            .map_err(|_| ScriptError::NotFound(script.to_string()))?;

        Ok(String::from_utf8_lossy(&bytes).lines().map(str::to_string).collect())
    }

    async fn run(&self, script: &str, params: [String; SCRIPT_PARAMS]) {
        let first = match self.load(script) {
            Ok(lines) => {
                ScriptFrame { name: script.to_string(), lines, pos: 0, params }
            },
            Err(e) => {
                self.log.append(unix_now(), &format!("run script: {e}"));
                return;
            },
        };

        if let Err(e) = self.run_stack(first).await {
            self.log.append(unix_now(), &format!("run script: {e}"));
        }

        self.processes.forget(script);
    }

    async fn run_stack(&self, first: ScriptFrame) -> Result<(), ScriptError> {
        let mut stack: VecDeque<ScriptFrame> = VecDeque::new();
        stack.push_front(first);

        while let Some(mut frame) = stack.pop_front() {
            while frame.pos < frame.lines.len() {
                let line = expand_parameters(&frame.lines[frame.pos], &frame.params);
                frame.pos += 1;

                let (command, rest) = match line.split_once(' ') {
                    Some((c, r)) => (c, r),
                    None => (line.as_str(), ""),
                };

                match command {
                    "stop" => {
                        self.log.append(unix_now(), &format!("{}: STOP", frame.name));
                        break;
                    },

                    "call" => {
                        let mut tokens = rest.split_whitespace();
                        let Some(callee) = tokens.next() else {
                            continue;
                        };

                        let mut params: [String; SCRIPT_PARAMS] = Default::default();
                        for slot in &mut params {
                            match tokens.next() {
                                Some(token) => *slot = token.to_string(),
                                None => break,
                            }
                        }

                        let lines = self
                            .load(callee)
                            .map_err(|_| ScriptError::CallNotFound(callee.to_string()))?;

                        stack.push_front(frame);
                        frame = ScriptFrame {
                            name: callee.to_string(),
                            lines,
                            pos: 0,
                            params,
                        };
                    },

                    "pause" => {
                        let seconds: f32 = rest.trim().parse().unwrap_or(1.0);
                        let millis = (seconds * 1000.0) as u64;
                        if millis >= 10 {
                            tokio::time::sleep(Duration::from_millis(millis)).await;
                        }
                    },

                    "repeat" => {
                        frame.pos = 0;
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    },

                    _ => {
                        self.submit(&frame.name, &line).await;
                    },
                }
            }
        }

        Ok(())
    }

    /// Dispatch one script line and block until its reply has been routed.
    async fn submit(&self, script: &str, line: &str) {
        let (waiter, reply) = oneshot::channel();

        let frame = InboundFrame {
            source: Source::Script,
            mtu: 0,
            payload: Bytes::from(line.to_string().into_bytes()),
            route: ReplyRoute::Script { name: script.to_string(), waiter },
        };

        if self.intake.send(frame).await.is_err() {
            return;
        }

        let _ = reply.await;
    }
}

/// Replace `$0`..`$3` with the positional parameters; a bare `$` or an
/// out-of-range index vanishes.
fn expand_parameters(line: &str, params: &[String; SCRIPT_PARAMS]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some(d) if d.is_ascii_digit() => {
                let index = (*d as u8 - b'0') as usize;
                chars.next();
                if let Some(param) = params.get(index) {
                    out.push_str(param);
                }
            },
            _ => {},
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(values: &[&str]) -> [String; SCRIPT_PARAMS] {
        let mut out: [String; SCRIPT_PARAMS] = Default::default();
        for (slot, v) in out.iter_mut().zip(values) {
            *slot = (*v).to_string();
        }
        out
    }

    #[test]
    fn parameter_expansion() {
        let p = params(&["one", "two"]);
        assert_eq!(expand_parameters("say $0 and $1", &p), "say one and two");
        assert_eq!(expand_parameters("$2 is empty", &p), " is empty");
        assert_eq!(expand_parameters("cost $9 nothing", &p), "cost  nothing");
        assert_eq!(expand_parameters("trailing $", &p), "trailing ");
        assert_eq!(expand_parameters("$x stays", &p), "x stays");
    }

    #[test]
    fn process_table_lifecycle() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().expect("rt");

        rt.block_on(async {
            let table = ProcessTable::new();

            let handle = tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
            table.register("blink", handle);

            assert_eq!(table.list(), vec![("blink".to_string(), true)]);
            assert!(table.stop("blink"));
            assert!(!table.stop("blink"));
        });
    }
}
