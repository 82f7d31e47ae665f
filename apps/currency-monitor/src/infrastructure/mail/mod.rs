//! Alert Mail Delivery
//!
//! - [`SendmailMailSink`] pipes each alert to a sendmail-compatible binary
//!   (`sendmail -t -i`), bounded by a timeout.
//! - [`AlertDispatcher`] owns the alert queue and a worker that delivers
//!   alerts one at a time, so a slow mail server never stalls the feed.
//!
//! Failed deliveries are logged and not retried; the next breach after the
//! throttle interval produces a fresh alert.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AlertMessage, MailError, MailSink};
use crate::infrastructure::config::MailSettings;
use crate::infrastructure::metrics;

/// Default alert queue capacity.
pub const ALERT_QUEUE_CAPACITY: usize = 64;

// =============================================================================
// Sendmail Sink
// =============================================================================

/// Mail sink backed by a local sendmail binary.
#[derive(Debug, Clone)]
pub struct SendmailMailSink {
    settings: MailSettings,
}

impl SendmailMailSink {
    /// Create a new sink.
    #[must_use]
    pub const fn new(settings: MailSettings) -> Self {
        Self { settings }
    }

    async fn deliver(&self, message: &str) -> Result<(), MailError> {
        let mut child = Command::new(&self.settings.sendmail_path)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MailError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A mailer that exits early reports through its exit status.
            if let Err(e) = stdin.write_all(message.as_bytes()).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(e.into());
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(MailError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl MailSink for SendmailMailSink {
    async fn send(&self, alert: &AlertMessage) -> Result<(), MailError> {
        let message = compose(&self.settings, alert);
        tokio::time::timeout(self.settings.timeout, self.deliver(&message))
            .await
            .map_err(|_| MailError::Timeout(self.settings.timeout))?
    }
}

/// Render an alert as a message for `sendmail -t`.
#[must_use]
pub fn compose(settings: &MailSettings, alert: &AlertMessage) -> String {
    format!(
        "From: {}\nTo: {}\nSubject: {}\n\n{}\n",
        header_value(&settings.from),
        header_value(&alert.recipient),
        header_value(&settings.subject),
        alert.body
    )
}

fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ").trim().to_string()
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Alert queue worker.
pub struct AlertDispatcher {
    sink: Arc<dyn MailSink>,
    receiver: mpsc::Receiver<AlertMessage>,
    cancel: CancellationToken,
}

impl AlertDispatcher {
    /// Create a dispatcher with the default queue capacity.
    #[must_use]
    pub fn new(
        sink: Arc<dyn MailSink>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Sender<AlertMessage>) {
        Self::with_capacity(sink, ALERT_QUEUE_CAPACITY, cancel)
    }

    /// Create a dispatcher with a custom queue capacity.
    #[must_use]
    pub fn with_capacity(
        sink: Arc<dyn MailSink>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Sender<AlertMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Self {
            sink,
            receiver: rx,
            cancel,
        };
        (dispatcher, tx)
    }

    /// Deliver queued alerts until cancelled or every sender is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let dropped = self.receiver.len();
                    if dropped > 0 {
                        tracing::warn!(dropped, "Mail worker stopping with alerts queued");
                    }
                    break;
                }
                alert = self.receiver.recv() => {
                    let Some(alert) = alert else {
                        break;
                    };
                    self.deliver(&alert).await;
                }
            }
        }
        tracing::debug!("Mail worker stopped");
    }

    async fn deliver(&self, alert: &AlertMessage) {
        match self.sink.send(alert).await {
            Ok(()) => {
                tracing::info!(
                    symbol = %alert.symbol,
                    recipient = %alert.recipient,
                    "Alert mail delivered"
                );
            }
            Err(e) => {
                tracing::warn!(
                    symbol = %alert.symbol,
                    recipient = %alert.recipient,
                    error = %e,
                    "Alert mail delivery failed"
                );
                metrics::record_alert_failed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use chrono::Utc;

    use crate::application::ports::MockMailSink;

    fn alert(symbol: &str) -> AlertMessage {
        AlertMessage {
            recipient: "ops@example.com".to_string(),
            symbol: symbol.to_string(),
            body: format!("{symbol}: 10000.00>=9999.99"),
            timestamp: Utc::now(),
        }
    }

    fn settings(path: &str) -> MailSettings {
        MailSettings {
            sendmail_path: PathBuf::from(path),
            timeout: Duration::from_secs(5),
            ..MailSettings::default()
        }
    }

    #[test]
    fn compose_writes_headers_then_body() {
        let message = compose(&MailSettings::default(), &alert("btcusdt"));
        assert_eq!(
            message,
            "From: currency-monitor\nTo: ops@example.com\nSubject: Currency Monitor\n\nbtcusdt: 10000.00>=9999.99\n"
        );
    }

    #[test]
    fn compose_strips_header_injection() {
        let mut injected = alert("btcusdt");
        injected.recipient = "ops@example.com\nBcc: evil@example.com".to_string();
        let message = compose(&MailSettings::default(), &injected);
        assert!(message.contains("To: ops@example.com Bcc: evil@example.com\n"));
        assert!(!message.contains("\nBcc:"));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let sink = SendmailMailSink::new(settings("/nonexistent/sendmail"));
        let result = sink.send(&alert("btcusdt")).await;
        assert!(matches!(result, Err(MailError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_is_reported() {
        let ok = SendmailMailSink::new(settings("/bin/true"));
        assert!(ok.send(&alert("btcusdt")).await.is_ok());

        let failing = SendmailMailSink::new(settings("/bin/false"));
        assert!(matches!(
            failing.send(&alert("btcusdt")).await,
            Err(MailError::Exit { .. })
        ));
    }

    #[tokio::test]
    async fn dispatcher_delivers_in_order() {
        let mut sink = MockMailSink::new();
        let mut seq = mockall::Sequence::new();
        sink.expect_send()
            .withf(|a| a.symbol == "btcusdt")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_send()
            .withf(|a| a.symbol == "ethusdt")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let (dispatcher, tx) = AlertDispatcher::new(Arc::new(sink), CancellationToken::new());
        tx.try_send(alert("btcusdt")).unwrap();
        tx.try_send(alert("ethusdt")).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), dispatcher.run())
            .await
            .expect("worker should stop once senders are gone");
    }

    #[tokio::test]
    async fn delivery_failure_does_not_stop_worker() {
        let mut sink = MockMailSink::new();
        sink.expect_send()
            .times(2)
            .returning(|_| Err(MailError::Timeout(Duration::from_secs(1))));

        let (dispatcher, tx) = AlertDispatcher::new(Arc::new(sink), CancellationToken::new());
        tx.try_send(alert("btcusdt")).unwrap();
        tx.try_send(alert("btcusdt")).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), dispatcher.run())
            .await
            .expect("worker should keep draining after failures");
    }

    #[tokio::test]
    async fn cancellation_stops_worker() {
        let sink = MockMailSink::new();
        let cancel = CancellationToken::new();
        let (dispatcher, _tx) = AlertDispatcher::new(Arc::new(sink), cancel.clone());

        let handle = tokio::spawn(dispatcher.run());
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok(), "worker should stop on cancellation");
    }
}
