// src/surface.rs
use crate::agent::AgentBackend;
use crate::feed::MessageFeed;
use crate::models::chat::Message;
use crate::models::preferences::{Preferences, PreferencesPatch};
use crate::store::DocumentStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Literal bot-message text substituted for any agent backend failure.
pub const AGENT_ERROR_TEXT: &str = "Error: Could not get response from AI agent";

/// Bot replies are stamped 100ms after the triggering user message to
/// bias display ordering.
const BOT_TIMESTAMP_OFFSET_MS: i64 = 100;

/// Identity attributes consumed from the session store.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
}

/// Commands consumed by the surface task. The observed session state is
/// the sole source of truth: SignIn/SignOut are delivered by whoever
/// verified the session token, never inferred by the surface itself.
#[derive(Debug)]
pub enum Command {
    SignIn(SessionUser),
    SignOut,
    Send { text: String },
    UpdatePreferences(PreferencesPatch),
}

/// Events emitted toward the connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SurfaceEvent {
    #[serde(rename = "signed_in")]
    SignedIn {
        email: String,
        preferences: Preferences,
    },
    #[serde(rename = "signed_out")]
    SignedOut,
    /// Full thread snapshot, ascending by timestamp, re-emitted after
    /// every append the feed delivers.
    #[serde(rename = "messages")]
    Messages { messages: Vec<Message> },
    #[serde(rename = "preferences")]
    PreferencesUpdated { preferences: Preferences },
}

/// The chat surface: a two-state machine (signed-out / signed-in) whose
/// state lives on exactly one task and is mutated only by that task.
/// Messages reach the in-memory thread through the live feed, not
/// directly from the send path, so every subscriber renders the same
/// sequence of appends.
pub struct ChatSurface {
    store: Arc<dyn DocumentStore>,
    agent: Arc<dyn AgentBackend>,
    feed: MessageFeed,
    session: Option<SessionUser>,
    preferences: Preferences,
    messages: Vec<Message>,
    feed_rx: Option<broadcast::Receiver<Message>>,
    events: mpsc::UnboundedSender<SurfaceEvent>,
}

impl ChatSurface {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        agent: Arc<dyn AgentBackend>,
        feed: MessageFeed,
        events: mpsc::UnboundedSender<SurfaceEvent>,
    ) -> Self {
        Self {
            store,
            agent,
            feed,
            session: None,
            preferences: Preferences::default(),
            messages: Vec::new(),
            feed_rx: None,
            events,
        }
    }

    /// Spawn the surface task, returning its command queue. Dropping the
    /// sender terminates the task; the feed subscription drops with it.
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        agent: Arc<dyn AgentBackend>,
        feed: MessageFeed,
        events: mpsc::UnboundedSender<SurfaceEvent>,
    ) -> mpsc::UnboundedSender<Command> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let surface = ChatSurface::new(store, agent, feed, events);
        tokio::spawn(surface.run(cmd_rx));
        cmd_tx
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        enum Input {
            Command(Option<Command>),
            Feed(Result<Message, broadcast::error::RecvError>),
        }

        loop {
            let input = match self.feed_rx.as_mut() {
                Some(rx) => tokio::select! {
                    cmd = commands.recv() => Input::Command(cmd),
                    msg = rx.recv() => Input::Feed(msg),
                },
                None => Input::Command(commands.recv().await),
            };

            match input {
                Input::Command(Some(cmd)) => self.handle_command(cmd).await,
                Input::Command(None) => break,
                Input::Feed(Ok(message)) => self.on_feed_message(message),
                Input::Feed(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!("Feed subscription lagged, {} appends skipped", skipped);
                }
                Input::Feed(Err(broadcast::error::RecvError::Closed)) => {
                    self.feed_rx = None;
                }
            }
        }
        tracing::debug!("Chat surface task exiting");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SignIn(user) => self.sign_in(user).await,
            Command::SignOut => self.sign_out(),
            Command::Send { text } => self.send_message(text).await,
            Command::UpdatePreferences(patch) => self.update_preferences(patch).await,
        }
    }

    /// Entry to signed-in: load (or create) the preferences document,
    /// load and sort the message history, and subscribe to the live
    /// feed, replacing any prior subscription.
    async fn sign_in(&mut self, user: SessionUser) {
        self.feed_rx = Some(self.feed.subscribe(&user.user_id).await);

        let preferences = match self.store.load_preferences(&user.user_id).await {
            Ok(Some(prefs)) => prefs,
            Ok(None) => {
                let defaults = Preferences::default();
                if let Err(e) = self.store.create_preferences(&user.user_id, &defaults).await {
                    tracing::error!(
                        "Failed to create preferences document for user {}: {}",
                        user.user_id,
                        e
                    );
                }
                defaults
            }
            Err(e) => {
                tracing::error!("Failed to load preferences for user {}: {}", user.user_id, e);
                Preferences::default()
            }
        };
        self.preferences = preferences.clone();

        self.messages = match self.store.list_messages(&user.user_id).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!("Failed to load messages for user {}: {}", user.user_id, e);
                Vec::new()
            }
        };
        self.messages.sort_by_key(|m| m.timestamp);

        tracing::info!("User {} signed in to chat surface", user.user_id);
        let email = user.email.clone();
        self.session = Some(user);
        self.emit(SurfaceEvent::SignedIn { email, preferences });
        self.emit_messages();
    }

    /// Entry to signed-out: clear the in-memory thread and cancel the
    /// feed subscription. A later sign-in for a different account starts
    /// from that account's history only.
    fn sign_out(&mut self) {
        if let Some(user) = self.session.take() {
            tracing::info!("User {} signed out of chat surface", user.user_id);
        }
        self.messages.clear();
        self.feed_rx = None;
        self.emit(SurfaceEvent::SignedOut);
    }

    /// Send flow, guarded by non-empty trimmed input and signed-in.
    /// Exactly one user message and one bot message are appended per
    /// accepted send; persistence failures are logged and never
    /// propagated, and agent failures degrade to a synthetic bot
    /// message. No de-duplication: duplicate sends store duplicates.
    async fn send_message(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };

        let user_ts = chrono::Utc::now().timestamp_millis();
        let user_message = Message::user(text.clone(), user_ts);
        if let Err(e) = self.store.append_message(&session.user_id, &user_message).await {
            tracing::error!(
                "Failed to persist user message for {}: {}",
                session.user_id,
                e
            );
        }

        // No timeout here: a hung backend hangs this surface's send.
        let bot_ts = user_ts + BOT_TIMESTAMP_OFFSET_MS;
        let bot_message = match self.agent.send(&text, &session.user_id).await {
            Ok(reply) => Message::bot(reply, bot_ts),
            Err(e) => {
                tracing::error!("Agent backend failed for user {}: {}", session.user_id, e);
                Message::bot(AGENT_ERROR_TEXT, bot_ts)
            }
        };
        if let Err(e) = self.store.append_message(&session.user_id, &bot_message).await {
            tracing::error!(
                "Failed to persist bot message for {}: {}",
                session.user_id,
                e
            );
        }
    }

    /// Optimistic local merge first, then a merge-write to the store.
    /// A failed write is logged only; the local state is not rolled
    /// back. While signed out the merge stays purely local.
    async fn update_preferences(&mut self, patch: PreferencesPatch) {
        self.preferences = self.preferences.merged(&patch);
        self.emit(SurfaceEvent::PreferencesUpdated {
            preferences: self.preferences.clone(),
        });

        if let Some(session) = &self.session {
            if let Err(e) = self.store.merge_preferences(&session.user_id, &patch).await {
                tracing::error!(
                    "Failed to persist preferences for {}: {}",
                    session.user_id,
                    e
                );
            }
        }
    }

    fn on_feed_message(&mut self, message: Message) {
        self.messages.push(message);
        self.messages.sort_by_key(|m| m.timestamp);
        self.emit_messages();
    }

    fn emit_messages(&self) {
        self.emit(SurfaceEvent::Messages {
            messages: self.messages.clone(),
        });
    }

    fn emit(&self, event: SurfaceEvent) {
        // A closed receiver means the client disconnected; the task will
        // notice via its command queue.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::models::chat::Sender;
    use crate::models::preferences::Theme;
    use crate::store::testing::MemoryStore;
    use async_trait::async_trait;

    enum StubAgent {
        Reply(String),
        Unreachable,
    }

    #[async_trait]
    impl AgentBackend for StubAgent {
        async fn send(&self, _message: &str, _user_id: &str) -> Result<String, AgentError> {
            match self {
                StubAgent::Reply(text) => Ok(text.clone()),
                StubAgent::Unreachable => Err(AgentError::MalformedResponse),
            }
        }
    }

    struct Harness {
        commands: mpsc::UnboundedSender<Command>,
        events: mpsc::UnboundedReceiver<SurfaceEvent>,
        store: Arc<MemoryStore>,
        feed: MessageFeed,
    }

    fn harness(agent: StubAgent) -> Harness {
        let feed = MessageFeed::new();
        let store = Arc::new(MemoryStore::new(feed.clone()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let commands = ChatSurface::spawn(
            store.clone(),
            Arc::new(agent),
            feed.clone(),
            event_tx,
        );
        Harness {
            commands,
            events: event_rx,
            store,
            feed,
        }
    }

    fn user(id: &str) -> SessionUser {
        SessionUser {
            user_id: id.to_string(),
            email: format!("{}@example.com", id),
        }
    }

    async fn next_event(h: &mut Harness) -> SurfaceEvent {
        h.events.recv().await.expect("surface event")
    }

    /// Drain events until a Messages snapshot with the given length.
    async fn next_thread_of_len(h: &mut Harness, len: usize) -> Vec<Message> {
        loop {
            if let SurfaceEvent::Messages { messages } = next_event(h).await {
                if messages.len() == len {
                    return messages;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_send_appends_one_user_and_one_bot_message() {
        let mut h = harness(StubAgent::Reply("Hi there".to_string()));
        h.commands.send(Command::SignIn(user("1"))).unwrap();
        h.commands
            .send(Command::Send {
                text: "Hello".to_string(),
            })
            .unwrap();

        let thread = next_thread_of_len(&mut h, 2).await;
        assert_eq!(thread[0].text, "Hello");
        assert_eq!(thread[0].sender, Sender::User);
        assert_eq!(thread[1].text, "Hi there");
        assert_eq!(thread[1].sender, Sender::Bot);
        assert_eq!(thread[1].timestamp, thread[0].timestamp + 100);

        let stored = h.store.list_messages("1").await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_agent_failure_yields_synthetic_bot_message() {
        let mut h = harness(StubAgent::Unreachable);
        h.commands.send(Command::SignIn(user("1"))).unwrap();
        h.commands
            .send(Command::Send {
                text: "Hello".to_string(),
            })
            .unwrap();

        let thread = next_thread_of_len(&mut h, 2).await;
        assert_eq!(thread[0].sender, Sender::User);
        assert_eq!(thread[1].sender, Sender::Bot);
        assert_eq!(thread[1].text, "Error: Could not get response from AI agent");
    }

    #[tokio::test]
    async fn test_whitespace_input_appends_nothing() {
        let mut h = harness(StubAgent::Reply("unused".to_string()));
        h.commands.send(Command::SignIn(user("1"))).unwrap();
        h.commands
            .send(Command::Send {
                text: "   ".to_string(),
            })
            .unwrap();
        // Sequencing barrier: the preferences update is processed only
        // after the rejected send.
        h.commands
            .send(Command::UpdatePreferences(PreferencesPatch::default()))
            .unwrap();

        loop {
            if let SurfaceEvent::PreferencesUpdated { .. } = next_event(&mut h).await {
                break;
            }
        }
        assert!(h.store.list_messages("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_signed_out_is_ignored() {
        let mut h = harness(StubAgent::Reply("unused".to_string()));
        h.commands
            .send(Command::Send {
                text: "Hello".to_string(),
            })
            .unwrap();
        h.commands
            .send(Command::UpdatePreferences(PreferencesPatch::default()))
            .unwrap();

        loop {
            if let SurfaceEvent::PreferencesUpdated { .. } = next_event(&mut h).await {
                break;
            }
        }
        assert!(h.store.list_messages("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_thread_sorts_ascending_regardless_of_delivery_order() {
        let mut h = harness(StubAgent::Reply("unused".to_string()));
        h.commands.send(Command::SignIn(user("1"))).unwrap();
        // Wait for the surface to subscribe before publishing.
        loop {
            if let SurfaceEvent::SignedIn { .. } = next_event(&mut h).await {
                break;
            }
        }

        h.feed.publish("1", Message::bot("later", 200)).await;
        h.feed.publish("1", Message::user("earlier", 100)).await;

        let thread = next_thread_of_len(&mut h, 2).await;
        assert_eq!(thread[0].timestamp, 100);
        assert_eq!(thread[0].text, "earlier");
        assert_eq!(thread[1].timestamp, 200);
    }

    #[tokio::test]
    async fn test_account_switch_never_shows_previous_messages() {
        let mut h = harness(StubAgent::Reply("Hi there".to_string()));
        h.commands.send(Command::SignIn(user("1"))).unwrap();
        h.commands
            .send(Command::Send {
                text: "first account".to_string(),
            })
            .unwrap();
        next_thread_of_len(&mut h, 2).await;

        h.commands.send(Command::SignOut).unwrap();
        loop {
            if let SurfaceEvent::SignedOut = next_event(&mut h).await {
                break;
            }
        }

        h.commands.send(Command::SignIn(user("2"))).unwrap();
        loop {
            if let SurfaceEvent::Messages { messages } = next_event(&mut h).await {
                assert!(messages.is_empty());
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_first_sign_in_creates_default_preferences() {
        let mut h = harness(StubAgent::Reply("unused".to_string()));
        assert!(h.store.load_preferences("1").await.unwrap().is_none());

        h.commands.send(Command::SignIn(user("1"))).unwrap();
        loop {
            if let SurfaceEvent::SignedIn { preferences, .. } = next_event(&mut h).await {
                assert_eq!(preferences, Preferences::default());
                break;
            }
        }
        assert_eq!(
            h.store.load_preferences("1").await.unwrap(),
            Some(Preferences::default())
        );
    }

    #[tokio::test]
    async fn test_theme_update_preserves_language() {
        let mut h = harness(StubAgent::Reply("unused".to_string()));
        h.commands.send(Command::SignIn(user("1"))).unwrap();
        h.commands
            .send(Command::UpdatePreferences(PreferencesPatch {
                theme: None,
                language: Some("fr".to_string()),
            }))
            .unwrap();
        h.commands
            .send(Command::UpdatePreferences(PreferencesPatch {
                theme: Some(Theme::Dark),
                language: None,
            }))
            .unwrap();

        let mut last = None;
        for _ in 0..2 {
            loop {
                if let SurfaceEvent::PreferencesUpdated { preferences } =
                    next_event(&mut h).await
                {
                    last = Some(preferences);
                    break;
                }
            }
        }
        let prefs = last.unwrap();
        assert_eq!(prefs.theme, Theme::Dark);
        assert_eq!(prefs.language, "fr");

        let stored = h.store.load_preferences("1").await.unwrap().unwrap();
        assert_eq!(stored.theme, Theme::Dark);
        assert_eq!(stored.language, "fr");
    }

    #[tokio::test]
    async fn test_sign_in_replaces_existing_subscription() {
        let mut h = harness(StubAgent::Reply("unused".to_string()));
        h.commands.send(Command::SignIn(user("1"))).unwrap();
        loop {
            if let SurfaceEvent::SignedIn { .. } = next_event(&mut h).await {
                break;
            }
        }

        // Second sign-in for another account without an explicit
        // sign-out still replaces the subscription.
        h.commands.send(Command::SignIn(user("2"))).unwrap();
        loop {
            if let SurfaceEvent::SignedIn { email, .. } = next_event(&mut h).await {
                assert_eq!(email, "2@example.com");
                break;
            }
        }

        h.feed.publish("1", Message::user("stale", 50)).await;
        h.feed.publish("2", Message::user("fresh", 60)).await;

        let thread = next_thread_of_len(&mut h, 1).await;
        assert_eq!(thread[0].text, "fresh");
    }
}
