//! Wires the components together and pumps push events through them.
//!
//! Every push event is dispatched to the cache engine and the unread
//! tracker independently; both always see every event. The resulting
//! `CoreEvent`s fan out to the UI on a broadcast channel.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use crate::api::{ChatApi, HttpApi};
use crate::auth::{SessionManager, SessionSignal, TokenStore};
use crate::config::CoreConfig;
use crate::constants::CORE_EVENT_CHANNEL_CAPACITY;
use crate::error::SessionError;
use crate::events::CoreEvent;
use crate::models::{Conversation, Credential, Message};
use crate::socket::{ConnectionManager, ConnectionState, PushEvent, SocketTransport, WsTransport};
use crate::store::{CacheSyncEngine, MergeOutcome, UnreadTracker};

pub struct CoreRuntime {
    store: Arc<TokenStore>,
    session: Arc<SessionManager>,
    api: Arc<dyn ChatApi>,
    cache: Arc<CacheSyncEngine>,
    unread: Arc<UnreadTracker>,
    socket: Arc<ConnectionManager>,
    events_tx: broadcast::Sender<CoreEvent>,
    active_conversation: Arc<RwLock<Option<String>>>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
    push_rx: Mutex<Option<mpsc::UnboundedReceiver<PushEvent>>>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionSignal>>>,
}

impl CoreRuntime {
    pub fn new(config: CoreConfig) -> Self {
        let api: Arc<dyn ChatApi> = Arc::new(HttpApi::new(config.api_base_url.clone()));
        Self::with_parts(config, api, Arc::new(WsTransport))
    }

    /// Construction seam for tests: inject the API and socket transport.
    pub fn with_parts(
        config: CoreConfig,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn SocketTransport>,
    ) -> Self {
        let store = Arc::new(TokenStore::new());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let session = Arc::new(SessionManager::new(store.clone(), api.clone(), signal_tx));
        let cache = Arc::new(CacheSyncEngine::new(session.clone(), api.clone()));
        let unread = Arc::new(UnreadTracker::new());
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let socket = Arc::new(ConnectionManager::new(
            config.socket_url.clone(),
            config.backoff.clone(),
            transport,
            push_tx,
        ));
        let (events_tx, _) = broadcast::channel(CORE_EVENT_CHANNEL_CAPACITY);

        Self {
            store,
            session,
            api,
            cache,
            unread,
            socket,
            events_tx,
            active_conversation: Arc::new(RwLock::new(None)),
            pump: Mutex::new(None),
            push_rx: Mutex::new(Some(push_rx)),
            signal_rx: Mutex::new(Some(signal_rx)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events_tx.subscribe()
    }

    /// Connectivity signal for the UI collaborator.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.socket.subscribe_state()
    }

    pub fn token_store(&self) -> Arc<TokenStore> {
        self.store.clone()
    }

    /// Seed the session from a login response and bring the push socket
    /// up. Also starts the event pump on first call.
    pub fn login(&self, access_token: &str, refresh_token: &str) {
        let credential = Credential::from_token(access_token);
        info!(subject = ?credential.subject(), "session started");
        self.store.set(credential);
        self.store.set_refresh_token(refresh_token);
        self.socket.start(access_token);
        self.spawn_pump();
    }

    /// Tear the session down: best-effort server-side logout, then local
    /// cleanup.
    ///
    /// The logout call deliberately skips the refresh-and-retry path: a
    /// token the server already rejects needs no server-side logout, and
    /// refreshing a session only to end it would be wasted work. Local
    /// cleanup happens either way.
    pub async fn logout(&self) {
        if let Some(token) = self.store.token() {
            if let Err(err) = self.api.logout(&token).await {
                warn!("server-side logout failed: {err}");
            }
        }
        self.store.clear();
        self.socket.stop();
        self.cache.clear();
        self.unread.reset();
        *self.active_conversation.write() = None;
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        self.cache.list_conversations().await
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, SessionError> {
        self.cache.list_messages(conversation_id).await
    }

    pub fn unread_total(&self) -> u64 {
        self.unread.total()
    }

    pub fn is_unread(&self, conversation_id: &str) -> bool {
        self.unread.is_unread(conversation_id)
    }

    pub fn mark_read(&self, conversation_id: &str) {
        if self.unread.mark_read(conversation_id) {
            let _ = self.events_tx.send(CoreEvent::UnreadChanged {
                total: self.unread.total(),
            });
        }
    }

    /// Record which conversation the user is viewing; pushes into it are
    /// never counted unread.
    pub fn set_active_conversation(&self, conversation_id: Option<String>) {
        if let Some(id) = &conversation_id {
            self.mark_read(id);
        }
        *self.active_conversation.write() = conversation_id;
    }

    pub fn shutdown(&self) {
        self.socket.stop();
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    fn spawn_pump(&self) {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return;
        }
        let (Some(push_rx), Some(signal_rx)) =
            (self.push_rx.lock().take(), self.signal_rx.lock().take())
        else {
            return;
        };

        let ctx = PumpContext {
            store: self.store.clone(),
            session: self.session.clone(),
            cache: self.cache.clone(),
            unread: self.unread.clone(),
            socket: self.socket.clone(),
            events_tx: self.events_tx.clone(),
            active_conversation: self.active_conversation.clone(),
        };
        *pump = Some(tokio::spawn(run_pump(ctx, push_rx, signal_rx)));
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

struct PumpContext {
    store: Arc<TokenStore>,
    session: Arc<SessionManager>,
    cache: Arc<CacheSyncEngine>,
    unread: Arc<UnreadTracker>,
    socket: Arc<ConnectionManager>,
    events_tx: broadcast::Sender<CoreEvent>,
    active_conversation: Arc<RwLock<Option<String>>>,
}

impl PumpContext {
    fn emit(&self, event: CoreEvent) {
        // No subscribers is fine; the UI may not be listening yet
        let _ = self.events_tx.send(event);
    }
}

async fn run_pump(
    ctx: PumpContext,
    mut push_rx: mpsc::UnboundedReceiver<PushEvent>,
    mut signal_rx: mpsc::UnboundedReceiver<SessionSignal>,
) {
    loop {
        tokio::select! {
            event = push_rx.recv() => match event {
                Some(event) => handle_push(&ctx, event).await,
                None => break,
            },
            signal = signal_rx.recv() => match signal {
                Some(SessionSignal::Expired) => {
                    info!("session expired, forcing logout");
                    ctx.socket.stop();
                    ctx.cache.clear();
                    ctx.unread.reset();
                    *ctx.active_conversation.write() = None;
                    ctx.emit(CoreEvent::SessionExpired);
                }
                None => break,
            },
        }
    }
}

async fn handle_push(ctx: &PumpContext, event: PushEvent) {
    match event {
        PushEvent::Connect => {
            ctx.emit(CoreEvent::Connectivity { connected: true });
        }
        PushEvent::Disconnect { reason } => {
            info!("push socket disconnected: {reason}");
            ctx.emit(CoreEvent::Connectivity { connected: false });
        }
        PushEvent::ConnectError { message } => {
            // The socket never refreshes credentials itself; recover
            // through the session manager and restart it with the fresh
            // token. Terminal refresh failure arrives as a session signal.
            warn!("push handshake rejected ({message}), refreshing credential");
            ctx.emit(CoreEvent::Connectivity { connected: false });
            if let Ok(credential) = ctx.session.refresh().await {
                ctx.socket.start(credential.token);
            }
        }
        PushEvent::MessageCreated(msg) => {
            // Unread first: counters track pushes even when the cache
            // merge degrades to a no-op
            let local_user = ctx.store.subject();
            let active = ctx.active_conversation.read().clone();
            if ctx
                .unread
                .on_message_pushed(&msg, local_user.as_deref(), active.as_deref())
            {
                ctx.emit(CoreEvent::UnreadChanged { total: ctx.unread.total() });
            }

            if let MergeOutcome::Merged { conversation_id } =
                ctx.cache.apply_pushed_message(msg).await
            {
                ctx.emit(CoreEvent::MessagesUpdated { conversation_id });
                ctx.emit(CoreEvent::ConversationsUpdated);
            }
        }
        PushEvent::ConversationCreated(conversation) => {
            if ctx.cache.apply_pushed_conversation_created(conversation) {
                ctx.emit(CoreEvent::ConversationsUpdated);
            }
        }
        PushEvent::ConversationDeleted { conversation_id, deleted_by } => {
            let local_user = ctx.store.subject();
            let removed = ctx.cache.apply_pushed_conversation_deleted(
                &conversation_id,
                &deleted_by,
                local_user.as_deref(),
            );

            if ctx.unread.mark_read(&conversation_id) {
                ctx.emit(CoreEvent::UnreadChanged { total: ctx.unread.total() });
            }

            let was_active = ctx.active_conversation.read().as_deref() == Some(conversation_id.as_str());
            if was_active {
                *ctx.active_conversation.write() = None;
                ctx.emit(CoreEvent::ActiveConversationCleared);
            }

            if let Some(removed) = removed {
                ctx.emit(CoreEvent::ConversationRemoved {
                    conversation_id: removed.conversation_id,
                    notice: removed.notice,
                });
                ctx.emit(CoreEvent::ConversationsUpdated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RefreshResponse;
    use crate::error::ApiError;
    use crate::models::Participant;
    use crate::socket::PushStream;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn conv(id: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            participants: vec![
                Participant { id: "u1".into(), display_name: Some("Ada".into()) },
                Participant { id: "u2".into(), display_name: Some("Grace".into()) },
            ],
            name: None,
            last_message: None,
            last_activity: Utc.timestamp_opt(1_760_000_000, 0).unwrap(),
        }
    }

    fn msg(id: &str, conversation: &str, sender: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation.to_string(),
            sender_id: sender.to_string(),
            body: "hi".to_string(),
            created_at: Utc.timestamp_opt(1_760_000_100, 0).unwrap(),
        }
    }

    struct FakeApi {
        conversations: SyncMutex<Vec<Conversation>>,
        refresh_ok: bool,
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn fetch_conversations(&self, _token: &str) -> Result<Vec<Conversation>, ApiError> {
            Ok(self.conversations.lock().clone())
        }

        async fn fetch_conversation(
            &self,
            _token: &str,
            conversation_id: &str,
        ) -> Result<Conversation, ApiError> {
            self.conversations
                .lock()
                .iter()
                .find(|c| c.id == conversation_id)
                .cloned()
                .ok_or(ApiError::Status(404))
        }

        async fn fetch_messages(
            &self,
            _token: &str,
            _conversation_id: &str,
        ) -> Result<Vec<Message>, ApiError> {
            Ok(Vec::new())
        }

        async fn refresh_credential(
            &self,
            _refresh_token: &str,
        ) -> Result<RefreshResponse, ApiError> {
            if self.refresh_ok {
                Ok(RefreshResponse {
                    access_token: "fresh".into(),
                    refresh_token: None,
                })
            } else {
                Err(ApiError::Unauthorized)
            }
        }

        async fn logout(&self, _token: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    /// Transport that connects successfully and replays a scripted set of
    /// frames after the handshake.
    struct ScriptedTransport {
        frames: SyncMutex<VecDeque<PushEvent>>,
    }

    struct ScriptedStream {
        frames: VecDeque<PushEvent>,
        handshook: bool,
    }

    #[async_trait]
    impl PushStream for ScriptedStream {
        async fn next_event(&mut self) -> Result<Option<PushEvent>, crate::error::SocketError> {
            if !self.handshook {
                self.handshook = true;
                return Ok(Some(PushEvent::Connect));
            }
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(
            &self,
            _url: &str,
            _token: &str,
        ) -> Result<Box<dyn PushStream>, crate::error::SocketError> {
            Ok(Box::new(ScriptedStream {
                frames: std::mem::take(&mut *self.frames.lock()),
                handshook: false,
            }))
        }
    }

    fn runtime_with(
        frames: Vec<PushEvent>,
        conversations: Vec<Conversation>,
        refresh_ok: bool,
    ) -> CoreRuntime {
        let api = Arc::new(FakeApi {
            conversations: SyncMutex::new(conversations),
            refresh_ok,
        });
        let transport = Arc::new(ScriptedTransport {
            frames: SyncMutex::new(frames.into()),
        });
        CoreRuntime::with_parts(CoreConfig::default(), api, transport)
    }

    async fn next_event(rx: &mut broadcast::Receiver<CoreEvent>) -> CoreEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for core event")
            .expect("event channel closed")
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<CoreEvent>,
        pred: impl Fn(&CoreEvent) -> bool,
    ) -> CoreEvent {
        loop {
            let event = next_event(rx).await;
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_pushed_message_updates_cache_and_unread() {
        let runtime = runtime_with(
            vec![PushEvent::MessageCreated(msg("m1", "c1", "u2"))],
            vec![conv("c1")],
            true,
        );
        let mut rx = runtime.subscribe();
        // Seed the cache before the push arrives
        runtime.cache.apply_fetched_conversations(vec![conv("c1")]);
        runtime.cache.apply_fetched_messages("c1", Vec::new());

        runtime.login("opaque-token", "refresh-1");

        wait_for(&mut rx, |e| matches!(e, CoreEvent::MessagesUpdated { .. })).await;
        assert_eq!(runtime.unread_total(), 1);
        assert!(runtime.is_unread("c1"));
        let messages = runtime.messages("c1").await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_deleting_active_conversation_clears_selection() {
        let runtime = runtime_with(
            vec![PushEvent::ConversationDeleted {
                conversation_id: "c1".into(),
                deleted_by: "u2".into(),
            }],
            vec![conv("c1")],
            true,
        );
        let mut rx = runtime.subscribe();
        runtime.cache.apply_fetched_conversations(vec![conv("c1")]);
        runtime.set_active_conversation(Some("c1".into()));

        runtime.login("opaque-token", "refresh-1");

        wait_for(&mut rx, |e| matches!(e, CoreEvent::ActiveConversationCleared)).await;
        let removed =
            wait_for(&mut rx, |e| matches!(e, CoreEvent::ConversationRemoved { .. })).await;
        match removed {
            CoreEvent::ConversationRemoved { conversation_id, notice } => {
                assert_eq!(conversation_id, "c1");
                assert!(notice.is_some());
            }
            _ => unreachable!(),
        }
        assert!(runtime.conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_refresh_forces_logout() {
        // Handshake rejected and the refresh also fails: store cleared,
        // socket down, UI told to re-login
        let runtime = CoreRuntime::with_parts(
            CoreConfig::default(),
            Arc::new(FakeApi {
                conversations: SyncMutex::new(Vec::new()),
                refresh_ok: false,
            }),
            Arc::new(RejectingTransport),
        );
        let mut rx = runtime.subscribe();

        runtime.login("stale-token", "refresh-1");

        wait_for(&mut rx, |e| matches!(e, CoreEvent::SessionExpired)).await;
        assert!(runtime.token_store().get().is_none());
        // Give the stop a beat to land
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*runtime.connection_state().borrow(), ConnectionState::Disconnected);
    }

    struct RejectingTransport;

    #[async_trait]
    impl SocketTransport for RejectingTransport {
        async fn connect(
            &self,
            _url: &str,
            _token: &str,
        ) -> Result<Box<dyn PushStream>, crate::error::SocketError> {
            Err(crate::error::SocketError::AuthRejected("jwt expired".into()))
        }
    }

    #[tokio::test]
    async fn test_rejected_handshake_recovers_through_refresh() {
        // First connect rejected, refresh succeeds, restart connects
        struct FlakyTransport {
            attempts: SyncMutex<u32>,
        }

        #[async_trait]
        impl SocketTransport for FlakyTransport {
            async fn connect(
                &self,
                _url: &str,
                token: &str,
            ) -> Result<Box<dyn PushStream>, crate::error::SocketError> {
                let mut attempts = self.attempts.lock();
                *attempts += 1;
                if token == "fresh" {
                    Ok(Box::new(ScriptedStream {
                        frames: VecDeque::new(),
                        handshook: false,
                    }))
                } else {
                    Err(crate::error::SocketError::AuthRejected("jwt expired".into()))
                }
            }
        }

        let api = Arc::new(FakeApi {
            conversations: SyncMutex::new(Vec::new()),
            refresh_ok: true,
        });
        let transport = Arc::new(FlakyTransport { attempts: SyncMutex::new(0) });
        let runtime = CoreRuntime::with_parts(CoreConfig::default(), api, transport);
        let mut rx = runtime.subscribe();

        runtime.login("stale-token", "refresh-1");

        wait_for(&mut rx, |e| matches!(e, CoreEvent::Connectivity { connected: true })).await;
        assert_eq!(runtime.token_store().token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_mark_read_emits_unread_changed() {
        let runtime = runtime_with(
            vec![PushEvent::MessageCreated(msg("m1", "c1", "u2"))],
            vec![conv("c1")],
            true,
        );
        let mut rx = runtime.subscribe();
        runtime.cache.apply_fetched_conversations(vec![conv("c1")]);
        runtime.cache.apply_fetched_messages("c1", Vec::new());

        runtime.login("opaque-token", "refresh-1");
        wait_for(&mut rx, |e| matches!(e, CoreEvent::UnreadChanged { total: 1 })).await;

        runtime.mark_read("c1");
        wait_for(&mut rx, |e| matches!(e, CoreEvent::UnreadChanged { total: 0 })).await;
        assert!(!runtime.is_unread("c1"));
    }
}
