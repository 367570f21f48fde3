//! UseCase: セッションの状態遷移
//!
//! One task owns a [`SessionStateMachine`] and feeds it user commands and
//! store events one at a time. The [`Phase`] is the only guard against
//! duplicate triggers: searches start from `Idle` only, and a join for the
//! room already joined is ignored.

use std::{future::pending, sync::Arc, time::Duration};

use pairchat_server::domain::{ChildAdded, SharedStore, Subscription, Value, ValueSnapshot};
use pairchat_shared::time::Clock;
use tokio::{
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::domain::{
    MatchAssignment, MessageRecord, Phase, RoomId, RoomStatus, SessionCommand, SessionConfig,
    SessionEvent, SessionStatus, UserId,
};

use super::{
    MailboxWatch, MatchMailbox, MatchOutcome, MessageDedup, Presence, RenderFilter,
    RoomLifecycle, SendError, SessionError, TypingIndicator, WaitingSlotArbiter,
};

/// Subscriptions and timers owned by the current phase
#[derive(Default)]
struct Listeners {
    mailbox: Option<MailboxWatch>,
    messages: Option<Subscription<ChildAdded>>,
    room_active: Option<Subscription<ValueSnapshot>>,
    peer_typing: Option<Subscription<ValueSnapshot>>,
    heartbeat: Option<Interval>,
    /// When set, the own typing flag is `true` until this instant
    typing_deadline: Option<Instant>,
    peer_is_typing: bool,
}

impl Listeners {
    fn is_empty(&self) -> bool {
        self.mailbox.is_none()
            && self.messages.is_none()
            && self.room_active.is_none()
            && self.peer_typing.is_none()
            && self.heartbeat.is_none()
            && self.typing_deadline.is_none()
    }

    fn detach(&mut self) {
        if let Some(mut watch) = self.mailbox.take() {
            watch.unsubscribe();
        }
        for mut subscription in [self.room_active.take(), self.peer_typing.take()]
            .into_iter()
            .flatten()
        {
            subscription.unsubscribe();
        }
        if let Some(mut messages) = self.messages.take() {
            messages.unsubscribe();
        }
        self.heartbeat = None;
        self.typing_deadline = None;
        self.peer_is_typing = false;
    }
}

/// セッション状態機械
pub struct SessionStateMachine {
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    store: Arc<dyn SharedStore>,
    arbiter: WaitingSlotArbiter,
    rooms: RoomLifecycle,
    mailbox: MatchMailbox,
    dedup: MessageDedup,
    typing: TypingIndicator,
    presence: Presence,
    events: mpsc::UnboundedSender<SessionEvent>,
    identity: Option<UserId>,
    phase: Phase,
    last_joined: Option<RoomId>,
    listeners: Listeners,
    render_filter: RenderFilter,
}

impl SessionStateMachine {
    pub fn new(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            arbiter: WaitingSlotArbiter::new(store.clone(), clock.clone(), config.stale_timeout_ms),
            rooms: RoomLifecycle::new(store.clone()),
            mailbox: MatchMailbox::new(store.clone()),
            dedup: MessageDedup::new(store.clone(), clock.clone(), &config),
            typing: TypingIndicator::new(store.clone()),
            presence: Presence::new(store.clone()),
            render_filter: RenderFilter::from_config(&config),
            store,
            clock,
            config,
            events,
            identity: None,
            phase: Phase::Idle,
            last_joined: None,
            listeners: Listeners::default(),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    /// `true` while any subscription or timer is attached
    pub fn has_active_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Obtain an identity and register the connection-loss cleanup of the own mailbox.
    pub async fn sign_in(&mut self) -> Result<UserId, SessionError> {
        self.emit(SessionEvent::Status(SessionStatus::SigningIn));
        let uid = UserId::new(self.store.sign_in_anonymously().await?)?;
        self.mailbox.register_disconnect_cleanup(&uid).await?;
        if let Err(e) = self.presence.announce(&uid).await {
            tracing::warn!("Failed to announce presence of '{}': {}", uid, e);
        }

        tracing::info!("Signed in as '{}'", uid);
        self.identity = Some(uid.clone());
        self.emit(SessionEvent::Status(SessionStatus::Ready));
        Ok(uid)
    }

    pub async fn handle_command(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        tracing::debug!("Command {:?} in phase '{}'", command, self.phase.name());
        match command {
            SessionCommand::Find => self.find().await,
            SessionCommand::Next => self.next().await,
            SessionCommand::Leave => self.leave().await,
            SessionCommand::Send(text) => self.send(&text).await,
            SessionCommand::Typing => self.typing().await,
        }
    }

    /// Start searching for a partner. Ignored unless idle.
    pub async fn find(&mut self) -> Result<(), SessionError> {
        match &self.phase {
            Phase::Idle => {}
            Phase::Connected { .. } => {
                self.emit(SessionEvent::Notice(
                    "Already chatting. Use /next for a new partner.".to_string(),
                ));
                return Ok(());
            }
            phase => {
                tracing::debug!("Ignoring find while {}", phase.name());
                return Ok(());
            }
        }

        let self_id = self.self_id()?;
        self.phase = Phase::Searching { waiting: false };
        self.emit(SessionEvent::Status(SessionStatus::Searching));
        self.search(&self_id).await
    }

    /// Leave the current chat or search, then search again.
    pub async fn next(&mut self) -> Result<(), SessionError> {
        if !self.phase.is_idle() {
            self.teardown(true).await;
        }
        self.find().await
    }

    pub async fn leave(&mut self) -> Result<(), SessionError> {
        if self.phase.is_idle() {
            return Ok(());
        }
        self.teardown(true).await;
        self.emit(SessionEvent::Status(SessionStatus::Ready));
        Ok(())
    }

    /// Send a chat message to the current room.
    ///
    /// Invalid text and rejected writes are reported as notices; only a lost
    /// connection is returned as an error.
    pub async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        let Phase::Connected { room_id, .. } = &self.phase else {
            self.emit(SessionEvent::Notice("Not in a chat. Use /find first.".to_string()));
            return Ok(());
        };
        let room_id = room_id.clone();
        let self_id = self.self_id()?;

        match self.dedup.send(&room_id, &self_id, text).await {
            Ok(outcome) => {
                tracing::debug!("Send outcome: {:?}", outcome);
                if self.listeners.typing_deadline.is_some() {
                    self.expire_typing().await;
                }
                Ok(())
            }
            Err(SendError::Invalid(e)) => {
                self.emit(SessionEvent::Notice(e.to_string()));
                Ok(())
            }
            Err(SendError::Store(e)) => {
                let error = SessionError::from(SendError::Store(e));
                if error.is_connection_lost() {
                    return Err(error);
                }
                tracing::warn!("Message to room '{}' rejected: {}", room_id, error);
                self.emit(SessionEvent::Notice(format!("Message not sent: {}", error)));
                Ok(())
            }
        }
    }

    /// The user is typing: raise the own flag until the idle timeout passes.
    pub async fn typing(&mut self) -> Result<(), SessionError> {
        let Phase::Connected { room_id, .. } = &self.phase else {
            return Ok(());
        };
        let room_id = room_id.clone();
        let self_id = self.self_id()?;

        if self.listeners.typing_deadline.is_none()
            && let Err(e) = self.typing.set_typing(&room_id, &self_id, true).await
        {
            tracing::debug!("Failed to raise typing flag: {}", e);
            return Ok(());
        }
        self.listeners.typing_deadline =
            Some(Instant::now() + Duration::from_millis(self.config.typing_idle_ms));
        Ok(())
    }

    /// Reset the own typing flag.
    pub(crate) async fn expire_typing(&mut self) {
        self.listeners.typing_deadline = None;
        let (Some(room_id), Some(self_id)) = (self.phase.room_id(), self.identity.as_ref()) else {
            return;
        };
        if let Err(e) = self.typing.set_typing(room_id, self_id, false).await {
            tracing::debug!("Failed to reset typing flag: {}", e);
        }
    }

    /// A match assignment arrived in the own mailbox.
    ///
    /// The watch is dropped and the mailbox cleared before joining. An
    /// assignment naming a missing or inactive room sends the session back to
    /// searching.
    pub async fn handle_mailbox(&mut self, assignment: MatchAssignment) -> Result<(), SessionError> {
        let self_id = self.self_id()?;
        if let Some(mut watch) = self.listeners.mailbox.take() {
            watch.unsubscribe();
        }
        self.mailbox.clear(&self_id).await?;

        if !self.phase.is_searching() {
            tracing::warn!(
                "Ignoring assignment to room '{}' while {}",
                assignment.room_id,
                self.phase.name()
            );
            return Ok(());
        }

        match self.rooms.room_status(&assignment.room_id).await? {
            RoomStatus::Active => self.join(assignment.room_id, assignment.peer_id).await,
            status => {
                tracing::error!(
                    "Assignment names room '{}' which is {:?}; searching again",
                    assignment.room_id,
                    status
                );
                let waiting = matches!(self.phase, Phase::Searching { waiting: true });
                self.listeners.detach();
                self.phase = Phase::Searching { waiting };
                self.search(&self_id).await
            }
        }
    }

    /// Enter `room_id` with `peer_id`. A second join for the same room is a no-op.
    pub async fn join(&mut self, room_id: RoomId, peer_id: UserId) -> Result<(), SessionError> {
        if self.last_joined.as_ref() == Some(&room_id) || self.phase.room_id() == Some(&room_id) {
            tracing::debug!("Room '{}' already joined", room_id);
            return Ok(());
        }
        let self_id = self.self_id()?;
        let was_waiting = matches!(self.phase, Phase::Searching { waiting: true });

        self.phase = Phase::Joining {
            room_id: room_id.clone(),
        };
        self.listeners.detach();
        self.render_filter.reset();
        self.last_joined = Some(room_id.clone());

        if was_waiting && let Err(e) = self.arbiter.clear_if_mine(&self_id).await {
            tracing::warn!("Failed to leave the waiting slot: {}", e);
        }

        self.listeners.messages = Some(
            self.dedup
                .subscribe(&room_id, self.config.history_limit)
                .await?,
        );
        self.listeners.room_active = Some(self.rooms.subscribe_active(&room_id).await?);
        self.listeners.peer_typing = Some(self.typing.subscribe_peer(&room_id, &peer_id).await?);
        self.mailbox.clear(&self_id).await?;
        self.typing.init(&room_id, &self_id).await?;

        tracing::info!("'{}' joined room '{}' with '{}'", self_id, room_id, peer_id);
        self.phase = Phase::Connected { room_id, peer_id };
        self.emit(SessionEvent::Status(SessionStatus::Connected));
        Ok(())
    }

    /// The room's `active` flag changed.
    pub async fn handle_room_active(&mut self, value: Option<Value>) -> Result<(), SessionError> {
        if !self.phase.is_connected() || RoomStatus::of_active_flag(value.as_ref()).is_active() {
            return Ok(());
        }
        self.end_from_remote().await;
        Ok(())
    }

    /// The peer ended the room.
    pub async fn end_from_remote(&mut self) {
        if let Some(room_id) = self.phase.room_id() {
            tracing::info!("Room '{}' was ended by the peer", room_id);
        }
        self.teardown(false).await;
        self.emit(SessionEvent::Status(SessionStatus::PeerLeft));
    }

    /// Periodic slot refresh while waiting.
    ///
    /// When the slot turns out to be lost, the session keeps watching its
    /// mailbox for one more period (the pairer may still be creating the
    /// room) and then searches again.
    pub async fn heartbeat(&mut self) -> Result<(), SessionError> {
        let Phase::Searching { waiting } = self.phase else {
            self.listeners.heartbeat = None;
            return Ok(());
        };
        let self_id = self.self_id()?;

        if waiting {
            if self.arbiter.heartbeat(&self_id).await? {
                return Ok(());
            }
            tracing::info!("'{}' no longer holds the waiting slot", self_id);
            self.phase = Phase::Searching { waiting: false };
            return Ok(());
        }

        tracing::info!("No assignment for '{}' arrived, searching again", self_id);
        self.search(&self_id).await
    }

    /// Handle every store event that has already been delivered, without waiting.
    ///
    /// Returns the number of events handled.
    pub async fn process_pending_events(&mut self) -> Result<usize, SessionError> {
        let mut handled = 0;
        loop {
            if let Some(assignment) = self
                .listeners
                .mailbox
                .as_mut()
                .and_then(MailboxWatch::try_next_assignment)
            {
                self.handle_mailbox(assignment).await?;
            } else if let Some(added) = self.listeners.messages.as_mut().and_then(Subscription::try_recv) {
                self.handle_message(added);
            } else if let Some(snapshot) =
                self.listeners.room_active.as_mut().and_then(Subscription::try_recv)
            {
                self.handle_room_active(snapshot.value).await?;
            } else if let Some(snapshot) =
                self.listeners.peer_typing.as_mut().and_then(Subscription::try_recv)
            {
                self.handle_peer_typing(snapshot.value);
            } else {
                return Ok(handled);
            }
            handled += 1;
        }
    }

    /// Drive the session until the command channel closes or the connection is lost.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<(), SessionError> {
        if self.identity.is_none() {
            self.sign_in().await?;
        }

        loop {
            let result = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("Command channel closed");
                        break;
                    }
                },
                assignment = next_assignment(&mut self.listeners.mailbox) => match assignment {
                    Some(assignment) => self.handle_mailbox(assignment).await,
                    None => Err(SessionError::SubscriptionClosed("mailbox")),
                },
                added = recv_from(&mut self.listeners.messages) => match added {
                    Some(added) => {
                        self.handle_message(added);
                        Ok(())
                    }
                    None => Err(SessionError::SubscriptionClosed("messages")),
                },
                snapshot = recv_from(&mut self.listeners.room_active) => match snapshot {
                    Some(snapshot) => self.handle_room_active(snapshot.value).await,
                    None => Err(SessionError::SubscriptionClosed("room")),
                },
                snapshot = recv_from(&mut self.listeners.peer_typing) => match snapshot {
                    Some(snapshot) => {
                        self.handle_peer_typing(snapshot.value);
                        Ok(())
                    }
                    None => Err(SessionError::SubscriptionClosed("typing")),
                },
                _ = tick(&mut self.listeners.heartbeat) => self.heartbeat().await,
                _ = sleep_until(self.listeners.typing_deadline) => {
                    self.expire_typing().await;
                    Ok(())
                }
            };

            if let Err(e) = result {
                self.recover(e).await?;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Leave whatever the session is doing and withdraw presence.
    pub async fn shutdown(&mut self) {
        if !self.phase.is_idle() {
            self.teardown(true).await;
        }
        if let Some(uid) = self.identity.as_ref()
            && let Err(e) = self.presence.withdraw(uid).await
        {
            tracing::debug!("Failed to withdraw presence: {}", e);
        }
    }

    async fn search(&mut self, self_id: &UserId) -> Result<(), SessionError> {
        match self.arbiter.try_match(self_id).await? {
            MatchOutcome::Pairer { peer_id } => {
                let room_id = self.rooms.create_room(self_id, &peer_id).await?;
                self.join(room_id, peer_id).await
            }
            MatchOutcome::Waiter => {
                self.phase = Phase::Searching { waiting: true };
                if self.listeners.mailbox.is_none() {
                    self.listeners.mailbox = Some(self.mailbox.subscribe(self_id).await?);
                }
                if self.listeners.heartbeat.is_none() {
                    self.listeners.heartbeat = Some(self.heartbeat_interval());
                }
                Ok(())
            }
        }
    }

    fn handle_message(&mut self, added: ChildAdded) {
        let Some(record) = MessageRecord::from_child(&added.key, &added.value) else {
            tracing::warn!("Ignoring malformed message '{}'", added.key);
            return;
        };
        if !self.render_filter.admit(&record, self.clock.now_millis()) {
            tracing::debug!("Message '{}' already rendered", record.id);
            return;
        }
        let own = self
            .identity
            .as_ref()
            .is_some_and(|uid| uid.as_str() == record.sender_id);
        self.emit(SessionEvent::Message {
            text: record.text,
            own,
        });
    }

    fn handle_peer_typing(&mut self, value: Option<Value>) {
        let typing = value == Some(Value::Bool(true));
        if typing != self.listeners.peer_is_typing {
            self.listeners.peer_is_typing = typing;
            self.emit(SessionEvent::PeerTyping(typing));
        }
    }

    /// Non-fatal errors send the session back to idle; a lost connection is returned.
    async fn recover(&mut self, error: SessionError) -> Result<(), SessionError> {
        if error.is_connection_lost() {
            tracing::error!("Connection to the store lost: {}", error);
            self.listeners.detach();
            self.phase = Phase::Idle;
            self.emit(SessionEvent::Status(SessionStatus::Error));
            return Err(error);
        }

        tracing::warn!("Session error while {}: {}", self.phase.name(), error);
        self.teardown(true).await;
        self.emit(SessionEvent::Notice(error.to_string()));
        self.emit(SessionEvent::Status(SessionStatus::Error));
        Ok(())
    }

    /// Best-effort exit from the current phase back to `Idle`.
    ///
    /// Subscriptions are detached first, then the own mailbox, slot entry and
    /// typing flag are cleared, and finally the room is ended when `end_room`.
    async fn teardown(&mut self, end_room: bool) {
        let previous = std::mem::replace(&mut self.phase, Phase::Leaving);
        self.listeners.detach();
        self.render_filter.reset();

        let Some(self_id) = self.identity.clone() else {
            self.phase = Phase::Idle;
            return;
        };

        if let Err(e) = self.mailbox.clear(&self_id).await {
            tracing::warn!("Failed to clear mailbox: {}", e);
        }
        if previous.is_searching()
            && let Err(e) = self.arbiter.clear_if_mine(&self_id).await
        {
            tracing::warn!("Failed to leave the waiting slot: {}", e);
        }
        if let Some(room_id) = previous.room_id() {
            if let Err(e) = self.typing.clear(room_id, &self_id).await {
                tracing::debug!("Typing flag of room '{}' not removed: {}", room_id, e);
            }
            if end_room && let Err(e) = self.rooms.end_room(room_id).await {
                tracing::warn!("Failed to end room '{}': {}", room_id, e);
            }
        }

        tracing::info!("Left phase '{}'", previous.name());
        self.phase = Phase::Idle;
    }

    fn heartbeat_interval(&self) -> Interval {
        let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    fn self_id(&self) -> Result<UserId, SessionError> {
        self.identity.clone().ok_or(SessionError::NotSignedIn)
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Session event receiver dropped");
        }
    }
}

async fn next_assignment(watch: &mut Option<MailboxWatch>) -> Option<MatchAssignment> {
    match watch {
        Some(watch) => watch.next_assignment().await,
        None => pending().await,
    }
}

async fn recv_from<T>(subscription: &mut Option<Subscription<T>>) -> Option<T> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}
