//! Async driver for a [`Session`]
//!
//! Reads host commands from a channel, sleeps until the scheduler's next
//! deadline, runs recognition jobs on the current task and forwards every
//! session event to the host. The in-flight call is never cancelled; a result
//! that went stale is handed to the session, which discards it.

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use snipocr_ocr::{RecognitionAdapter, RecognitionBackend, RecognitionResult};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::message::{CoreEvent, HostCommand};
use crate::scheduler::TokioClock;
use crate::session::{Job, Session, SessionSettings};

/// Wake-up interval when nothing is scheduled
const IDLE_WAKE: Duration = Duration::from_secs(3600);

type InFlight = LocalBoxFuture<'static, (u64, snipocr_ocr::Result<RecognitionResult>)>;

pub struct SessionRunner<B> {
    session: Session<TokioClock>,
    adapter: Rc<RecognitionAdapter<B>>,
}

impl<B: RecognitionBackend + 'static> SessionRunner<B> {
    pub fn new(settings: SessionSettings, backend: B) -> Self {
        Self {
            session: Session::new(settings, TokioClock),
            adapter: Rc::new(RecognitionAdapter::new(backend)),
        }
    }

    /// Run until the command channel is closed and all scheduled work has
    /// finished, or until the event receiver goes away.
    pub async fn run(mut self, mut commands: mpsc::Receiver<HostCommand>, events: mpsc::Sender<CoreEvent>) {
        info!("session started with {} backend", self.adapter.backend().name());
        let mut in_flight: FuturesUnordered<InFlight> = FuturesUnordered::new();
        let mut commands_open = true;

        loop {
            if let Some(job) = self.session.poll() {
                in_flight.push(self.start(job));
            }

            for event in self.session.take_events() {
                if events.send(event).await.is_err() {
                    debug!("event receiver dropped, stopping session");
                    return;
                }
            }

            if !commands_open && in_flight.is_empty() && self.session.is_quiescent() {
                info!("session finished");
                return;
            }

            let wake_at = self
                .session
                .next_deadline()
                .map(Instant::from_std)
                .unwrap_or_else(|| Instant::now() + IDLE_WAKE);

            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.session.handle(command),
                    None => {
                        debug!("command channel closed");
                        commands_open = false;
                    }
                },
                Some((generation, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    self.session.complete(generation, result);
                }
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    fn start(&self, job: Job) -> InFlight {
        let adapter = Rc::clone(&self.adapter);
        async move {
            let result = adapter.recognize(&job.image, &job.options).await;
            (job.generation, result)
        }
        .boxed_local()
    }
}
