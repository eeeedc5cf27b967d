//! Setup progress events and the channel carrying them.
//!
//! A setup run owns a [`ProgressReporter`] and the caller holds the
//! matching [`SetupProgressStream`]. `finish` consumes the reporter, so
//! the terminal event is always the last one sent and the stream ends
//! right after it.

use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::ErrorDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressStatus {
    Executing,
    Success,
    Failed,
}

/// One milestone of a setup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupProgress {
    pub service_name: String,
    pub step: String,
    pub status: ProgressStatus,
    pub debug_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

impl SetupProgress {
    pub fn is_terminal(&self) -> bool {
        self.status != ProgressStatus::Executing
    }
}

/// Create a reporter/stream pair with room for `capacity` events.
pub fn progress_channel(
    service_name: impl Into<String>,
    capacity: usize,
) -> (ProgressReporter, SetupProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressReporter {
            service_name: service_name.into(),
            tx,
        },
        SetupProgressStream { rx, done: false },
    )
}

/// Producer half held by the setup routine.
#[derive(Debug)]
pub struct ProgressReporter {
    service_name: String,
    tx: mpsc::Sender<SetupProgress>,
}

impl ProgressReporter {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Report a step in progress.
    pub async fn executing(&self, step: &str, message: impl Into<String>) {
        self.send(step, ProgressStatus::Executing, message.into(), None)
            .await;
    }

    /// Report the terminal event and close the channel.
    pub async fn finish(self, step: &str, outcome: Result<String, (String, ErrorDetails)>) {
        match outcome {
            Ok(message) => {
                self.send(step, ProgressStatus::Success, message, None).await;
            }
            Err((message, details)) => {
                self.send(step, ProgressStatus::Failed, message, Some(details))
                    .await;
            }
        }
    }

    async fn send(
        &self,
        step: &str,
        status: ProgressStatus,
        debug_message: String,
        error_details: Option<ErrorDetails>,
    ) {
        let event = SetupProgress {
            service_name: self.service_name.clone(),
            step: step.to_string(),
            status,
            debug_message,
            error_details,
        };
        // a dropped consumer does not stop the run
        let _ = self.tx.send(event).await;
    }
}

/// Consumer half: yields events until the terminal one, then `None`.
#[derive(Debug)]
pub struct SetupProgressStream {
    rx: mpsc::Receiver<SetupProgress>,
    done: bool,
}

impl SetupProgressStream {
    pub async fn next(&mut self) -> Option<SetupProgress> {
        if self.done {
            return None;
        }
        let event = self.rx.recv().await;
        self.observe(&event);
        event
    }

    /// Drain the stream to the end.
    pub async fn collect(mut self) -> Vec<SetupProgress> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    fn observe(&mut self, event: &Option<SetupProgress>) {
        match event {
            Some(event) if event.is_terminal() => {
                self.done = true;
                self.rx.close();
            }
            None => self.done = true,
            _ => {}
        }
    }
}

impl Stream for SetupProgressStream {
    type Item = SetupProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(event) => {
                self.observe(&event);
                Poll::Ready(event)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_stream_ends_after_terminal_event() {
        let (reporter, stream) = progress_channel("ai-backend", 8);
        reporter.executing("start", "preparing").await;
        reporter.executing("install", "installing").await;
        reporter.finish("end", Ok("done".into())).await;

        let events = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events.last().unwrap().status, ProgressStatus::Success);
    }

    #[tokio::test]
    async fn test_failed_terminal_carries_details() {
        let (reporter, mut stream) = progress_channel("comfyui-backend", 4);
        reporter
            .finish(
                "end",
                Err(("boom".into(), ErrorDetails::message("boom"))),
            )
            .await;
        let event = stream.next().await.unwrap();
        assert_eq!(event.status, ProgressStatus::Failed);
        assert_eq!(event.error_details.unwrap().message, "boom");
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_consumer_does_not_block_producer() {
        let (reporter, stream) = progress_channel("x", 1);
        drop(stream);
        reporter.executing("a", "one").await;
        reporter.executing("b", "two").await;
        reporter.finish("end", Ok(String::new())).await;
    }

    #[tokio::test]
    async fn test_as_futures_stream() {
        let (reporter, stream) = progress_channel("x", 4);
        tokio::spawn(async move {
            reporter.executing("a", "one").await;
            reporter.finish("end", Ok("ok".into())).await;
        });
        let statuses: Vec<ProgressStatus> = stream.map(|e| e.status).collect().await;
        assert_eq!(
            statuses,
            vec![ProgressStatus::Executing, ProgressStatus::Success]
        );
    }
}
