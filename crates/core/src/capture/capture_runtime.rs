use std::time::Instant;

use crossbeam_channel::Receiver;

use crate::camera::domain::frame_source::AcquisitionError;
use crate::capture::domain::session::{Phase, SessionSnapshot};
use crate::capture::session_logger::SessionLogger;
use crate::capture::session_state_machine::SessionStateMachine;
use crate::detection::domain::detection_dispatch::DetectionEvent;
use crate::detection::infrastructure::detection_worker::DetectionSubmitter;

/// User intents delivered to the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserCommand {
    Start,
    Cancel,
    Reset,
    Quit,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Start capturing immediately and return once a session completes.
    pub auto: bool,
}

/// Event loop driving a [`SessionStateMachine`].
///
/// Multiplexes user commands, detection events and the dwell deadline on a
/// single thread, so the machine never needs locking.
pub struct CaptureRuntime {
    machine: SessionStateMachine,
    events: Receiver<DetectionEvent>,
    logger: Box<dyn SessionLogger>,
    submitter: Option<DetectionSubmitter>,
    options: RuntimeOptions,
    completed: usize,
}

impl CaptureRuntime {
    pub fn new(
        machine: SessionStateMachine,
        events: Receiver<DetectionEvent>,
        logger: Box<dyn SessionLogger>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            machine,
            events,
            logger,
            submitter: None,
            options,
            completed: 0,
        }
    }

    /// Reports the submitter's dropped-frame count as a metric.
    pub fn with_submitter(mut self, submitter: DetectionSubmitter) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn machine(&self) -> &SessionStateMachine {
        &self.machine
    }

    /// Runs until [`UserCommand::Quit`], the command channel closes, or (in
    /// auto mode) the first session completes.
    ///
    /// `on_snapshot` is called with the initial state and after every change.
    /// Returns the number of completed sessions. In auto mode a failed camera
    /// acquisition ends the run with the error.
    pub fn run<F>(
        &mut self,
        commands: &Receiver<UserCommand>,
        mut on_snapshot: F,
    ) -> Result<usize, AcquisitionError>
    where
        F: FnMut(&SessionSnapshot),
    {
        let mut last = self.machine.snapshot();
        on_snapshot(&last);

        if self.options.auto {
            self.observe(|runtime| runtime.machine.start())?;
            self.publish(&mut last, &mut on_snapshot);
        }

        loop {
            if self.options.auto && self.machine.phase() == Phase::Complete {
                break;
            }

            let events = self.events.clone();
            let deadline = match self.machine.next_deadline() {
                Some(at) => crossbeam_channel::at(at),
                None => crossbeam_channel::never(),
            };

            crossbeam_channel::select! {
                recv(commands) -> cmd => match cmd {
                    Ok(UserCommand::Quit) | Err(_) => break,
                    Ok(cmd) => {
                        if let Err(e) = self.apply(cmd) {
                            log::warn!("{e}");
                        }
                    }
                },
                recv(events) -> event => match event {
                    Ok(event) => self.on_detection(event),
                    Err(_) => {
                        // A dead worker never clears its in-flight slot, so
                        // no further frame will be answered.
                        self.events = crossbeam_channel::never();
                        self.on_detection(DetectionEvent::EngineUnavailable(
                            "detection worker exited".into(),
                        ));
                    }
                },
                recv(deadline) -> _ => {
                    self.observe(|runtime| {
                        runtime.machine.tick(Instant::now());
                    });
                }
            }

            self.publish(&mut last, &mut on_snapshot);
        }

        self.logger.summary();
        Ok(self.completed)
    }

    fn apply(&mut self, cmd: UserCommand) -> Result<(), AcquisitionError> {
        match cmd {
            UserCommand::Start => self.observe(|runtime| runtime.machine.start()),
            UserCommand::Cancel => {
                self.observe(|runtime| runtime.machine.cancel());
                Ok(())
            }
            UserCommand::Reset => {
                self.observe(|runtime| runtime.machine.reset());
                Ok(())
            }
            UserCommand::Quit => Ok(()),
        }
    }

    fn on_detection(&mut self, event: DetectionEvent) {
        match event {
            DetectionEvent::Response(response) => {
                self.logger
                    .timing("detect", response.latency.as_secs_f64() * 1000.0);
                self.observe(|runtime| {
                    runtime.machine.handle_detection(response, Instant::now());
                });
            }
            DetectionEvent::Failed { session, error } => {
                log::debug!("Detection failed for session {session}: {error}");
            }
            DetectionEvent::EngineUnavailable(reason) => {
                self.logger.info(&format!("Face detection unavailable: {reason}"));
                self.machine.engine_unavailable(&reason);
            }
        }
        if let Some(submitter) = &self.submitter {
            self.logger
                .metric("frames_dropped", submitter.frames_dropped() as f64);
        }
    }

    /// Runs `op` against the machine and reports any phase change.
    fn observe<T>(&mut self, op: impl FnOnce(&mut Self) -> T) -> T {
        let session = self.machine.session_id();
        let before = self.machine.phase();
        let out = op(self);
        let after = self.machine.phase();
        if before != after {
            self.logger.transition(session, before, after);
            if after == Phase::Complete {
                self.completed += 1;
            }
        }
        out
    }

    fn publish<F>(&self, last: &mut SessionSnapshot, on_snapshot: &mut F)
    where
        F: FnMut(&SessionSnapshot),
    {
        let current = self.machine.snapshot();
        if current != *last {
            on_snapshot(&current);
            *last = current;
        }
    }
}
