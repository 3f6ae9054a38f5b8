use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, sync::mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, msg: &Notification) -> anyhow::Result<()>;
}

/// Stand-in for real email: appends one line per message to a file.
pub struct FileMailer {
    path: PathBuf,
}

impl FileMailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Mailer for FileMailer {
    async fn send(&self, msg: &Notification) -> anyhow::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open {}", self.path.display()))?;
        let line = format!(
            "notification for {}: {} - {}\n",
            msg.recipient, msg.subject, msg.body
        );
        file.write_all(line.as_bytes())
            .await
            .context("write notification")?;
        info!(recipient = %msg.recipient, subject = %msg.subject, "notification written");
        Ok(())
    }
}

/// Handle to the background delivery worker. Enqueueing never blocks and
/// never fails the caller; undeliverable messages are logged and dropped.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(rx, mailer));
        Self { tx }
    }

    /// Returns whether the message was queued.
    pub fn enqueue(&self, msg: Notification) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => {
                debug!("notification queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(recipient = %msg.recipient, "notification queue full; dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                warn!(recipient = %msg.recipient, "notification worker gone; dropping");
                false
            }
        }
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Notification>, mailer: Arc<dyn Mailer>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = mailer.send(&msg).await {
            warn!(error = %e, recipient = %msg.recipient, "notification delivery failed");
        }
    }
    debug!("notification worker stopped");
}


#[cfg(test)]
mod tests {
    use super::testing::channel_notifier;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn msg(to: &str) -> Notification {
        Notification {
            recipient: to.into(),
            subject: "Hello".into(),
            body: "World".into(),
        }
    }

    /// Fails the first delivery, forwards the rest.
    struct FlakyMailer {
        attempts: AtomicUsize,
        delivered: mpsc::UnboundedSender<Notification>,
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn send(&self, msg: &Notification) -> anyhow::Result<()> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("smtp down");
            }
            self.delivered.send(msg.clone())?;
            Ok(())
        }
    }

    /// Never finishes a delivery.
    struct StuckMailer;

    #[async_trait]
    impl Mailer for StuckMailer {
        async fn send(&self, _msg: &Notification) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn queued_message_is_delivered() {
        let (notifier, mut rx) = channel_notifier();
        notifier.enqueue(msg("a@example.com"));
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivered in time")
            .expect("channel open");
        assert_eq!(got, msg("a@example.com"));
    }

    #[tokio::test]
    async fn delivery_failure_does_not_stop_worker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mailer = FlakyMailer {
            attempts: AtomicUsize::new(0),
            delivered: tx,
        };
        let notifier = Notifier::spawn(Arc::new(mailer), 4);
        assert!(notifier.enqueue(msg("a@example.com")));
        assert!(notifier.enqueue(msg("b@example.com")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(notifier.enqueue(msg("c@example.com")));

        let mut recipients = Vec::new();
        for _ in 0..2 {
            let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("delivered in time")
                .expect("channel open");
            recipients.push(got.recipient);
        }
        assert_eq!(recipients, vec!["b@example.com", "c@example.com"]);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let notifier = Notifier::spawn(Arc::new(StuckMailer), 1);
        let queued: Vec<bool> = tokio::time::timeout(Duration::from_secs(1), async {
            (0..5)
                .map(|i| notifier.enqueue(msg(&format!("u{i}@example.com"))))
                .collect()
        })
        .await
        .expect("enqueue never waits");
        assert!(queued[0]);
        assert!(!queued[4]);
        assert!(queued.iter().filter(|q| !**q).count() >= 3);
        assert_eq!(notifier.tx.capacity(), 0);
    }

    #[tokio::test]
    async fn file_mailer_appends_lines() {
        let path = std::env::temp_dir().join(format!("userbase-mail-{}.log", uuid::Uuid::new_v4()));
        let mailer = FileMailer::new(&path);
        mailer.send(&msg("a@example.com")).await.unwrap();
        mailer.send(&msg("b@example.com")).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("notification for a@example.com: Hello - World"));
        let _ = tokio::fs::remove_file(&path).await;
    }
}
