//! Visualizer feed
//!
//! While capture is active, samples the analysis tap once per display
//! refresh and republishes the snapshot through a watch channel. Latest value
//! wins: there is no queue and no backpressure.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::analyser::{AnalysisTap, VisualizerFrame};

pub type FrameSender = watch::Sender<VisualizerFrame>;
pub type FrameReceiver = watch::Receiver<VisualizerFrame>;

pub fn create_frame_channel() -> (FrameSender, FrameReceiver) {
    watch::channel(VisualizerFrame::empty())
}

/// Publish `frame` unless the feed has been cancelled.
///
/// The cancellation check runs under the channel's write lock, so once the
/// owner has cancelled and cleared the frame no late snapshot can land.
fn publish(frames: &FrameSender, cancel: &CancellationToken, frame: VisualizerFrame) -> bool {
    frames.send_if_modified(|current| {
        if cancel.is_cancelled() {
            return false;
        }
        *current = frame;
        true
    })
}

/// Clear the published frame so stale visuals are never rendered.
pub fn clear_frame(frames: &FrameSender) {
    frames.send_replace(VisualizerFrame::empty());
}

/// Run the visualizer feed until `cancel` fires.
pub async fn run_visualizer_feed(
    tap: AnalysisTap,
    frames: FrameSender,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::debug!("Visualizer feed started ({:?} period)", period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("Visualizer feed received stop signal");
                break;
            }
            _ = tick.tick() => {
                if tap.is_closed() {
                    log::debug!("Visualizer feed stopping - analysis tap closed");
                    break;
                }
                publish(&frames, &cancel, tap.snapshot());
            }
        }
    }

    log::debug!("Visualizer feed stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::analyser::{Analyser, AnalyserSettings};

    fn tap_with_signal() -> AnalysisTap {
        let tap = AnalysisTap::new(Analyser::new(AnalyserSettings::default()).unwrap());
        tap.push(&[0.5; 256]);
        tap
    }

    #[test]
    fn publish_is_suppressed_after_cancel() {
        let (tx, rx) = create_frame_channel();
        let cancel = CancellationToken::new();
        let frame = VisualizerFrame { bins: vec![1, 2, 3] };

        assert!(publish(&tx, &cancel, frame.clone()));
        assert_eq!(*rx.borrow(), frame);

        cancel.cancel();
        clear_frame(&tx);
        assert!(!publish(&tx, &cancel, frame));
        assert!(rx.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn feed_publishes_until_cancelled() {
        let (tx, mut rx) = create_frame_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_visualizer_feed(
            tap_with_signal(),
            tx,
            Duration::from_millis(16),
            cancel.clone(),
        ));

        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_empty());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn feed_exits_when_tap_closes() {
        let (tx, _rx) = create_frame_channel();
        let tap = tap_with_signal();
        let task = tokio::spawn(run_visualizer_feed(
            tap.clone(),
            tx,
            Duration::from_millis(16),
            CancellationToken::new(),
        ));

        tap.close();
        tokio::time::advance(Duration::from_millis(50)).await;
        task.await.unwrap();
    }
}
