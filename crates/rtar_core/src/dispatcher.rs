//! Bounded worker pool for reply generation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::context::ContextEntry;
use crate::error::{CoreError, Result};
use crate::generation::{GenerationRequest, ResponseGenerator};
use crate::message::Message;

/// Runs generation jobs on at most `max_workers` concurrent tasks and gives
/// each caller at most `timeout` to get its answer.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    generator: Arc<dyn ResponseGenerator>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        generator: Arc<dyn ResponseGenerator>,
        max_workers: usize,
        timeout: Duration,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            generator,
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            timeout,
        }
    }

    /// Generate a reply for `message` against a context snapshot.
    ///
    /// Single attempt. On timeout the job is cancelled and
    /// [`CoreError::GenerationTimeout`] returned; nothing is retried.
    pub async fn generate(&self, message: Message, context: Vec<ContextEntry>) -> Result<String> {
        let message_id = message.id.clone();
        let generator = self.generator.clone();
        let workers = self.workers.clone();
        let request = GenerationRequest { message, context };

        let job = tokio::spawn(async move {
            let _permit = workers.acquire_owned().await.map_err(|_| {
                CoreError::generation_msg(generator.name(), "", "worker pool is shut down")
            })?;
            generator.generate(&request).await
        });
        let abort = job.abort_handle();

        match tokio::time::timeout(self.timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(CoreError::generation_msg(
                self.generator.name(),
                "",
                format!("generation worker failed: {}", join_error),
            )),
            Err(_) => {
                abort.abort();
                Err(CoreError::GenerationTimeout {
                    message_id,
                    timeout_secs: self.timeout.as_secs_f64(),
                })
            }
        }
    }

    /// Stop accepting jobs. Jobs already running are not waited for.
    pub fn shutdown(&self) {
        self.workers.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.workers.is_closed()
    }

    /// Jobs currently holding a worker
    pub fn busy_workers(&self) -> usize {
        self.max_workers
            .saturating_sub(self.workers.available_permits())
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageClass;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct SlowGenerator {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ResponseGenerator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("re: {}", request.message.text))
        }
    }

    #[derive(Debug)]
    struct FailingGenerator;

    #[async_trait]
    impl ResponseGenerator for FailingGenerator {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Err(CoreError::generation_msg("failing", "none", "rate limited"))
        }
    }

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            sender_name: "Alice".to_string(),
            sender_id: None,
            text: format!("text {id}"),
            timestamp: 0.0,
            class: MessageClass::User,
            is_self: false,
        }
    }

    fn slow(delay: Duration) -> Arc<SlowGenerator> {
        Arc::new(SlowGenerator {
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_generates_within_timeout() {
        let dispatcher = Dispatcher::new(slow(Duration::from_secs(1)), 2, Duration::from_secs(5));
        let reply = dispatcher.generate(message("1"), vec![]).await.unwrap();
        assert_eq!(reply, "re: text 1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_drops_job() {
        let generator = slow(Duration::from_secs(60));
        let dispatcher = Dispatcher::new(generator.clone(), 2, Duration::from_secs(5));

        let err = dispatcher.generate(message("1"), vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::GenerationTimeout { ref message_id, .. } if message_id == "1"
        ));

        // The cancelled job gives its worker back
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(dispatcher.busy_workers(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_is_returned() {
        let dispatcher = Dispatcher::new(Arc::new(FailingGenerator), 1, Duration::from_secs(5));
        let err = dispatcher.generate(message("1"), vec![]).await.unwrap_err();
        assert!(matches!(err, CoreError::GenerationFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_caps_concurrency() {
        let generator = slow(Duration::from_secs(1));
        let dispatcher = Dispatcher::new(generator.clone(), 2, Duration::from_secs(30));

        let jobs: Vec<_> = (0..5)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.generate(message(&i.to_string()), vec![]).await
                })
            })
            .collect();
        for job in jobs {
            job.await.unwrap().unwrap();
        }

        assert_eq!(generator.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs() {
        let dispatcher = Dispatcher::new(slow(Duration::ZERO), 1, Duration::from_secs(5));
        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());
        assert!(dispatcher.generate(message("1"), vec![]).await.is_err());
    }
}
