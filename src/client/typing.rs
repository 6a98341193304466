//! Typing coordinator — both halves of the typing indicator protocol.
//!
//! DESIGN
//! ======
//! Sending half (`TypingCoordinator`): per-chat state machine
//! `idle -> typing -> idle`. The first keystroke emits one `Start` signal;
//! further keystrokes are debounced but re-arm the idle timer. One timer per
//! chat key, cancel-and-replace on every keystroke — never a pile of stale
//! timers. An explicit stop (message sent) aborts the timer before emitting,
//! so no duplicate late-firing `Stop` ever follows.
//!
//! Receiving half (`TypingIndicators`): set of (user, chat) pairs currently
//! typing, fed by relayed events. Events from self (room echo) and events
//! for chats not currently open are ignored.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Idle period after the last keystroke before `Stop` fires on its own.
pub const TYPING_IDLE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Outbound signal for the transport layer to forward to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start(Uuid),
    Stop(Uuid),
}

// =============================================================================
// SENDING HALF
// =============================================================================

pub struct TypingCoordinator {
    idle_timeout: Duration,
    signals: mpsc::UnboundedSender<TypingSignal>,
    timers: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl TypingCoordinator {
    /// Coordinator with the production idle timeout. Returns the receiving
    /// end of the signal stream for the transport layer to drain.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TypingSignal>) {
        Self::with_idle_timeout(TYPING_IDLE_TIMEOUT)
    }

    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<TypingSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let coordinator = Self { idle_timeout, signals, timers: Arc::new(Mutex::new(HashMap::new())) };
        (coordinator, rx)
    }

    /// Record a keystroke in a chat's composer. Emits `Start` only on the
    /// idle→typing edge; every call re-arms the idle timer.
    pub fn keystroke(&self, chat_id: Uuid) {
        let Ok(mut timers) = self.timers.lock() else { return };

        let was_typing = match timers.remove(&chat_id) {
            Some(previous) => {
                previous.abort();
                true
            }
            None => false,
        };
        if !was_typing {
            let _ = self.signals.send(TypingSignal::Start(chat_id));
        }

        let signals = self.signals.clone();
        let shared_timers = Arc::clone(&self.timers);
        let idle_timeout = self.idle_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Ok(mut timers) = shared_timers.lock() {
                timers.remove(&chat_id);
            }
            let _ = signals.send(TypingSignal::Stop(chat_id));
        });
        timers.insert(chat_id, timer);
    }

    /// Explicit typing→idle edge (message sent). Cancels the idle timer so
    /// it cannot fire a duplicate late `Stop`, then emits exactly one.
    pub fn stop(&self, chat_id: Uuid) {
        let Ok(mut timers) = self.timers.lock() else { return };
        if let Some(timer) = timers.remove(&chat_id) {
            timer.abort();
            let _ = self.signals.send(TypingSignal::Stop(chat_id));
        }
    }

    #[must_use]
    pub fn is_typing(&self, chat_id: Uuid) -> bool {
        self.timers
            .lock()
            .map(|timers| timers.contains_key(&chat_id))
            .unwrap_or(false)
    }

    /// Abort every pending timer without emitting. Used on disconnect so no
    /// orphaned timer outlives the connection.
    pub fn shutdown(&self) {
        let Ok(mut timers) = self.timers.lock() else { return };
        for (_, timer) in timers.drain() {
            timer.abort();
        }
    }
}

impl Drop for TypingCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// RECEIVING HALF
// =============================================================================

#[derive(Debug)]
pub struct TypingIndicators {
    me: Uuid,
    active_chat: Option<Uuid>,
    typing: HashSet<(Uuid, Uuid)>,
}

impl TypingIndicators {
    #[must_use]
    pub fn new(me: Uuid) -> Self {
        Self { me, active_chat: None, typing: HashSet::new() }
    }

    /// Switch the open chat. Stale indicators from the previous chat are
    /// dropped wholesale.
    pub fn set_active_chat(&mut self, chat_id: Option<Uuid>) {
        if self.active_chat != chat_id {
            self.typing.clear();
        }
        self.active_chat = chat_id;
    }

    /// Apply a relayed `typing:start`. Ignored for self-authored events and
    /// for chats other than the one currently open.
    pub fn apply_start(&mut self, user_id: Uuid, chat_id: Uuid) -> bool {
        if user_id == self.me || self.active_chat != Some(chat_id) {
            return false;
        }
        self.typing.insert((user_id, chat_id))
    }

    /// Apply a relayed `typing:stop`.
    pub fn apply_stop(&mut self, user_id: Uuid, chat_id: Uuid) -> bool {
        self.typing.remove(&(user_id, chat_id))
    }

    #[must_use]
    pub fn is_typing(&self, user_id: Uuid, chat_id: Uuid) -> bool {
        self.typing.contains(&(user_id, chat_id))
    }

    /// Whether anyone is typing in the currently open chat.
    #[must_use]
    pub fn anyone_typing(&self) -> bool {
        !self.typing.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const TEST_IDLE: Duration = Duration::from_millis(50);

    async fn recv_signal(rx: &mut mpsc::UnboundedReceiver<TypingSignal>) -> TypingSignal {
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("signal receive timed out")
            .expect("signal channel closed")
    }

    async fn assert_no_signal(rx: &mut mpsc::UnboundedReceiver<TypingSignal>) {
        assert!(
            timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
            "expected no signal"
        );
    }

    #[tokio::test]
    async fn repeated_keystrokes_emit_one_start() {
        let (coordinator, mut rx) = TypingCoordinator::with_idle_timeout(TEST_IDLE);
        let chat = Uuid::new_v4();

        coordinator.keystroke(chat);
        coordinator.keystroke(chat);
        coordinator.keystroke(chat);

        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Start(chat));
        assert!(coordinator.is_typing(chat));
        // The debounce holds: next signal is the idle Stop, not another Start.
        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Stop(chat));
        assert!(!coordinator.is_typing(chat));
        assert_no_signal(&mut rx).await;
    }

    #[tokio::test]
    async fn idle_timeout_emits_exactly_one_stop() {
        let (coordinator, mut rx) = TypingCoordinator::with_idle_timeout(TEST_IDLE);
        let chat = Uuid::new_v4();

        coordinator.keystroke(chat);
        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Start(chat));

        tokio::time::sleep(TEST_IDLE * 3).await;
        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Stop(chat));
        assert_no_signal(&mut rx).await;
    }

    #[tokio::test]
    async fn keystroke_rearms_idle_timer() {
        let (coordinator, mut rx) = TypingCoordinator::with_idle_timeout(Duration::from_millis(120));
        let chat = Uuid::new_v4();

        coordinator.keystroke(chat);
        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Start(chat));

        // Keep typing past the original deadline; the timer must keep
        // resetting instead of firing mid-burst.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            coordinator.keystroke(chat);
            assert!(coordinator.is_typing(chat));
        }
        assert_no_signal(&mut rx).await;

        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Stop(chat));
    }

    #[tokio::test]
    async fn explicit_stop_cancels_timer_no_duplicate_stop() {
        let (coordinator, mut rx) = TypingCoordinator::with_idle_timeout(TEST_IDLE);
        let chat = Uuid::new_v4();

        coordinator.keystroke(chat);
        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Start(chat));

        coordinator.stop(chat);
        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Stop(chat));

        // Wait past the old deadline: the aborted timer must not fire again.
        tokio::time::sleep(TEST_IDLE * 3).await;
        assert_no_signal(&mut rx).await;
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let (coordinator, mut rx) = TypingCoordinator::with_idle_timeout(TEST_IDLE);
        coordinator.stop(Uuid::new_v4());
        assert_no_signal(&mut rx).await;
    }

    #[tokio::test]
    async fn chats_are_independent() {
        let (coordinator, mut rx) = TypingCoordinator::with_idle_timeout(TEST_IDLE);
        let chat_a = Uuid::new_v4();
        let chat_b = Uuid::new_v4();

        coordinator.keystroke(chat_a);
        coordinator.keystroke(chat_b);
        let first = recv_signal(&mut rx).await;
        let second = recv_signal(&mut rx).await;
        assert!(matches!(first, TypingSignal::Start(_)));
        assert!(matches!(second, TypingSignal::Start(_)));

        coordinator.stop(chat_a);
        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Stop(chat_a));
        assert!(coordinator.is_typing(chat_b));
    }

    #[tokio::test]
    async fn shutdown_aborts_without_signals() {
        let (coordinator, mut rx) = TypingCoordinator::with_idle_timeout(TEST_IDLE);
        let chat = Uuid::new_v4();
        coordinator.keystroke(chat);
        assert_eq!(recv_signal(&mut rx).await, TypingSignal::Start(chat));

        coordinator.shutdown();
        assert!(!coordinator.is_typing(chat));
        tokio::time::sleep(TEST_IDLE * 3).await;
        assert_no_signal(&mut rx).await;
    }

    #[test]
    fn indicators_filter_self_and_inactive_chats() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let open_chat = Uuid::new_v4();
        let other_chat = Uuid::new_v4();
        let mut indicators = TypingIndicators::new(me);
        indicators.set_active_chat(Some(open_chat));

        // Room echo of our own signal must not self-announce.
        assert!(!indicators.apply_start(me, open_chat));
        // Signals for a chat open elsewhere are ignored.
        assert!(!indicators.apply_start(peer, other_chat));
        assert!(!indicators.anyone_typing());

        assert!(indicators.apply_start(peer, open_chat));
        assert!(indicators.is_typing(peer, open_chat));
        assert!(indicators.apply_stop(peer, open_chat));
        assert!(!indicators.anyone_typing());
    }

    #[test]
    fn switching_chats_clears_stale_indicators() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let chat_a = Uuid::new_v4();
        let chat_b = Uuid::new_v4();
        let mut indicators = TypingIndicators::new(me);

        indicators.set_active_chat(Some(chat_a));
        indicators.apply_start(peer, chat_a);
        assert!(indicators.anyone_typing());

        indicators.set_active_chat(Some(chat_b));
        assert!(!indicators.anyone_typing());
        assert!(!indicators.is_typing(peer, chat_a));
    }
}
