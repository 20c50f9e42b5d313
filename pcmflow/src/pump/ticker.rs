use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, info};

/// Dedicated thread that drives a pump at a fixed interval
///
/// The callback returns `false` to end the thread on its own, e.g. once the
/// stream stopped after a fatal error.
pub struct Ticker {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<F>(name: &str, interval: Duration, mut on_tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = interval.max(Duration::from_millis(1));
        let thread_name = name.to_string();

        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let ticks = tick(interval);
                loop {
                    select! {
                        recv(ticks) -> _ => {
                            if !on_tick() {
                                debug!(thread = %thread_name, "Pump finished");
                                break;
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
            })?;

        info!(thread = name, ?interval, "Pump ticker started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it, unless called from the thread itself
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::warn!("Pump ticker panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_ticker_runs_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let mut ticker = Ticker::spawn("test-ticker", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        ticker.stop();
        let seen = count.load(Ordering::SeqCst);
        assert!(seen > 0);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_ticker_ends_when_callback_declines() {
        let ticker = Ticker::spawn("test-ticker-once", Duration::from_millis(1), || false).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !ticker.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(ticker.is_finished());
    }
}
