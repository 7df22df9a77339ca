//! Blocking hand-offs to the person running the experiment.

use crate::error::{OptResult, OptobotError};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared flag that aborts whatever blocking step is in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub trait Operator {
    /// Blocks until the operator confirms `step` is done.
    ///
    /// Fails with `Timeout` once `timeout` elapses and with `Cancelled` when
    /// `cancel` is set or the operator declines.
    fn confirm(
        &mut self,
        step: &str,
        prompt: &str,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> OptResult<()>;
}

/// Confirms immediately, unless already cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Operator for AutoConfirm {
    fn confirm(
        &mut self,
        step: &str,
        _prompt: &str,
        _timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> OptResult<()> {
        if cancel.is_cancelled() {
            return Err(OptobotError::Cancelled(step.to_string()));
        }
        Ok(())
    }
}

/// Asks on stdout and waits for a line on stdin. Typing `abort` cancels.
///
/// Stdin is read on a background thread that lives as long as the process,
/// so a timed-out prompt does not leave a half-read line behind.
#[derive(Debug, Default)]
pub struct ConsoleOperator {
    lines: Option<Receiver<String>>,
}

impl ConsoleOperator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lines(&mut self) -> &Receiver<String> {
        self.lines.get_or_insert_with(|| {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
            rx
        })
    }
}

impl Operator for ConsoleOperator {
    fn confirm(
        &mut self,
        step: &str,
        prompt: &str,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> OptResult<()> {
        let lines = self.lines();
        // Drop anything typed before the prompt appeared.
        while lines.try_recv().is_ok() {}

        println!("{} (press Enter to continue, type 'abort' to cancel)", prompt);
        let _ = io::stdout().flush();

        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(OptobotError::Cancelled(step.to_string()));
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    warn!("⏱️  No confirmation for '{}' after {:?}", step, limit);
                    return Err(OptobotError::Timeout {
                        step: step.to_string(),
                        after: limit,
                    });
                }
            }
            match lines.recv_timeout(POLL_INTERVAL) {
                Ok(line) if line.trim().eq_ignore_ascii_case("abort") => {
                    return Err(OptobotError::Cancelled(format!(
                        "{} aborted by operator",
                        step
                    )));
                }
                Ok(_) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(OptobotError::Cancelled(format!(
                        "stdin closed while waiting for {}",
                        step
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_confirm_honours_cancel() {
        let token = CancelToken::new();
        let mut op = AutoConfirm;
        assert!(op.confirm("dispense", "", None, &token).is_ok());

        token.cancel();
        assert!(matches!(
            op.confirm("dispense", "", None, &token),
            Err(OptobotError::Cancelled(_))
        ));
        token.reset();
        assert!(!token.is_cancelled());
    }
}
