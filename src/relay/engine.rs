//! Relay engine: routes each inbound message and performs the delivery.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::relay::cache::IdentityCache;
use crate::relay::error::RelayError;
use crate::relay::message::{InboundMessage, Sender, sender_notice};
use crate::relay::routing::{Direction, Route, admin_reply_route, direction, user_route};
use crate::relay::transport::Transport;

/// Settings the engine needs; built once from the config at startup.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub admin_chat_id: i64,
    /// How long a private sender stays resolvable.
    pub entry_ttl: Duration,
    /// Confirmation replied to users after a successful relay. `None` disables it.
    pub acknowledgement: Option<String>,
    /// Prefix of the notice sent to the admin chat when a forward fails.
    pub failure_notice_prefix: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            admin_chat_id: 0,
            entry_ttl: Duration::from_secs(24 * 60 * 60),
            acknowledgement: None,
            failure_notice_prefix: "Ошибка у пользователя: ".to_string(),
        }
    }
}

/// What happened to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Admin reply copied to the user's chat.
    ToUser { chat_id: i64, route: Route },
    /// User message forwarded to the admin chat.
    ToAdmin { route: Route },
    /// Not something the relay handles.
    Ignored,
}

pub struct RelayEngine {
    settings: RelaySettings,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn IdentityCache>,
}

impl RelayEngine {
    pub fn new(settings: RelaySettings, transport: Arc<dyn Transport>, cache: Arc<dyn IdentityCache>) -> Self {
        Self {
            settings,
            transport,
            cache,
        }
    }

    pub fn admin_chat_id(&self) -> i64 {
        self.settings.admin_chat_id
    }

    /// Route and deliver one message.
    pub async fn handle(&self, msg: &InboundMessage) -> Result<Delivery, RelayError> {
        match direction(msg, self.settings.admin_chat_id) {
            Direction::AdminReply(replied) => {
                let route = admin_reply_route(replied)?;
                let chat_id = self.resolve_destination(&route).await?;
                info!("Admin reply to chat {chat_id}: \"{}\"", preview(msg.readable()));
                self.relay_to_user(chat_id, msg).await?;
                Ok(Delivery::ToUser { chat_id, route })
            }
            Direction::User(sender) => {
                let route = self.classify_user_message(msg, sender).await?;
                self.relay_to_admin(msg, sender).await?;
                Ok(Delivery::ToAdmin { route })
            }
            Direction::AdminChatter => {
                debug!("Ignoring non-reply message {} in admin chat", msg.message_id);
                Ok(Delivery::Ignored)
            }
            Direction::Anonymous => {
                debug!("Ignoring message {} without sender in chat {}", msg.message_id, msg.chat_id);
                Ok(Delivery::Ignored)
            }
        }
    }

    /// Destination chat for an admin reply route. User routes have no
    /// destination here and are rejected without touching the cache.
    async fn resolve_destination(&self, route: &Route) -> Result<i64, RelayError> {
        match route {
            Route::AdminReplyWithNativeSender { user_id } => Ok(*user_id),
            Route::AdminReplyNeedsCacheLookup { fingerprint } => {
                self.cache
                    .get(fingerprint)
                    .await?
                    .ok_or_else(|| RelayError::SenderNotFound {
                        fingerprint: fingerprint.to_string(),
                    })
            }
            Route::UserMessagePrivate { .. } | Route::UserMessagePublic => Err(RelayError::NotRelayed),
        }
    }

    /// Query the privacy flag and remember private senders.
    async fn classify_user_message(&self, msg: &InboundMessage, sender: &Sender) -> Result<Route, RelayError> {
        let is_private = self.transport.has_private_forwards(msg.chat_id).await?;
        let route = user_route(msg, sender, is_private);

        match route {
            Route::UserMessagePrivate { ref fingerprint } => {
                self.cache.set(fingerprint, msg.chat_id, self.settings.entry_ttl).await?;
                info!(
                    "{} {} {}: \"{}\"",
                    sender.first_name,
                    sender.last_name.as_deref().unwrap_or(""),
                    msg.unix_ts,
                    preview(msg.readable())
                );
            }
            _ => {
                info!(
                    "{} (username) {}: \"{}\"",
                    sender.username.as_deref().unwrap_or(&sender.first_name),
                    msg.unix_ts,
                    preview(msg.readable())
                );
            }
        }
        Ok(route)
    }

    /// Copy the admin's message to the user. Copy hides the admin's identity.
    pub async fn relay_to_user(&self, destination: i64, msg: &InboundMessage) -> Result<(), RelayError> {
        self.transport.copy(destination, msg.chat_id, msg.message_id).await?;
        Ok(())
    }

    /// Send the sender notice, forward the message, then acknowledge to the user.
    pub async fn relay_to_admin(&self, msg: &InboundMessage, sender: &Sender) -> Result<(), RelayError> {
        let admin = self.settings.admin_chat_id;
        self.transport.send_text(admin, &sender_notice(sender)).await?;

        if let Err(e) = self.transport.forward(admin, msg.chat_id, msg.message_id).await {
            let notice = format!("{}{}", self.settings.failure_notice_prefix, e);
            if let Err(notice_err) = self.transport.send_text(admin, &notice).await {
                warn!("Failed to report forward failure to admin: {notice_err}");
            }
            return Err(e.into());
        }

        if let Some(ref ack) = self.settings.acknowledgement
            && let Err(e) = self.transport.reply_text(msg.chat_id, msg.message_id, ack).await
        {
            warn!("Failed to acknowledge message {} in chat {}: {e}", msg.message_id, msg.chat_id);
        }
        Ok(())
    }
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::cache::CacheError;
    use crate::relay::fingerprint::Fingerprint;
    use crate::relay::message::{ForwardOrigin, MessageKind, RepliedMessage};
    use crate::relay::snapshot_cache::SnapshotIdentityCache;
    use crate::relay::transport::TransportError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADMIN: i64 = -100500;
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Send { chat_id: i64, text: String },
        Reply { chat_id: i64, message_id: i32, text: String },
        Forward { to: i64, from: i64, message_id: i32 },
        Copy { to: i64, from: i64, message_id: i32 },
    }

    /// Records every outbound call.
    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<Call>>,
        private_chats: Vec<i64>,
        fail_forward: bool,
        fail_copy: bool,
        fail_chat_lookup: bool,
    }

    impl MockTransport {
        fn with_private(chats: &[i64]) -> Self {
            Self {
                private_chats: chats.to_vec(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
            self.record(Call::Send { chat_id, text: text.to_string() });
            Ok(())
        }

        async fn reply_text(&self, chat_id: i64, message_id: i32, text: &str) -> Result<(), TransportError> {
            self.record(Call::Reply { chat_id, message_id, text: text.to_string() });
            Ok(())
        }

        async fn forward(&self, to: i64, from: i64, message_id: i32) -> Result<(), TransportError> {
            if self.fail_forward {
                return Err(TransportError::new("forward message", "Forbidden: bot was blocked"));
            }
            self.record(Call::Forward { to, from, message_id });
            Ok(())
        }

        async fn copy(&self, to: i64, from: i64, message_id: i32) -> Result<(), TransportError> {
            if self.fail_copy {
                return Err(TransportError::new("copy message", "Bad Request: chat not found"));
            }
            self.record(Call::Copy { to, from, message_id });
            Ok(())
        }

        async fn has_private_forwards(&self, chat_id: i64) -> Result<bool, TransportError> {
            if self.fail_chat_lookup {
                return Err(TransportError::new("get chat", "timed out"));
            }
            Ok(self.private_chats.contains(&chat_id))
        }
    }

    /// Wraps a cache and counts how often it is touched.
    struct CountingCache {
        inner: SnapshotIdentityCache,
        gets: AtomicUsize,
        sets: AtomicUsize,
    }

    impl CountingCache {
        fn new() -> Self {
            Self {
                inner: SnapshotIdentityCache::in_memory(),
                gets: AtomicUsize::new(0),
                sets: AtomicUsize::new(0),
            }
        }

        fn touches(&self) -> usize {
            self.gets.load(Ordering::SeqCst) + self.sets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityCache for CountingCache {
        async fn get(&self, key: &Fingerprint) -> Result<Option<i64>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn set(&self, key: &Fingerprint, chat_id: i64, ttl: Duration) -> Result<(), CacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, chat_id, ttl).await
        }
    }

    /// Cache whose backend is always down.
    struct UnreachableCache;

    #[async_trait]
    impl IdentityCache for UnreachableCache {
        async fn get(&self, _key: &Fingerprint) -> Result<Option<i64>, CacheError> {
            Err(CacheError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }

        async fn set(&self, _key: &Fingerprint, _chat_id: i64, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }
    }

    fn settings() -> RelaySettings {
        RelaySettings {
            admin_chat_id: ADMIN,
            entry_ttl: DAY,
            acknowledgement: Some("Ваше сообщение успешно отправлено администратору.".to_string()),
            ..Default::default()
        }
    }

    fn engine(transport: Arc<MockTransport>, cache: Arc<dyn IdentityCache>) -> RelayEngine {
        RelayEngine::new(settings(), transport, cache)
    }

    fn ali() -> Sender {
        Sender {
            user_id: 555,
            first_name: "Ali".to_string(),
            last_name: None,
            username: None,
        }
    }

    fn user_msg(text: &str) -> InboundMessage {
        InboundMessage {
            chat_id: 555,
            message_id: 10,
            sender: Some(ali()),
            kind: MessageKind::Text,
            text: text.to_string(),
            caption: String::new(),
            unix_ts: 1000,
            reply_to: None,
        }
    }

    fn admin_reply(origin: Option<ForwardOrigin>) -> InboundMessage {
        InboundMessage {
            chat_id: ADMIN,
            message_id: 20,
            sender: Some(Sender {
                user_id: 1,
                first_name: "Admin".to_string(),
                last_name: None,
                username: None,
            }),
            kind: MessageKind::Text,
            text: "Wa alaykum as-salam".to_string(),
            caption: String::new(),
            unix_ts: 2000,
            reply_to: Some(RepliedMessage {
                origin,
                text: "Hello".to_string(),
                caption: String::new(),
            }),
        }
    }

    fn hidden_ali() -> Option<ForwardOrigin> {
        Some(ForwardOrigin::HiddenUser {
            sender_name: "Ali".to_string(),
            unix_ts: 1000,
        })
    }

    #[tokio::test]
    async fn test_private_user_round_trip() {
        let transport = Arc::new(MockTransport::with_private(&[555]));
        let cache = Arc::new(CountingCache::new());
        let engine = engine(transport.clone(), cache.clone());

        let delivery = engine.handle(&user_msg("Hello")).await.unwrap();
        let expected_key = Fingerprint::build("Ali", "", "Hello", "", 1000);
        assert_eq!(
            delivery,
            Delivery::ToAdmin {
                route: Route::UserMessagePrivate {
                    fingerprint: expected_key.clone()
                }
            }
        );
        assert_eq!(cache.get(&expected_key).await.unwrap(), Some(555));

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(&calls[0], Call::Send { chat_id: ADMIN, text } if text.contains("ID: 555")));
        assert_eq!(calls[1], Call::Forward { to: ADMIN, from: 555, message_id: 10 });
        assert!(matches!(&calls[2], Call::Reply { chat_id: 555, message_id: 10, .. }));

        let delivery = engine.handle(&admin_reply(hidden_ali())).await.unwrap();
        assert_eq!(
            delivery,
            Delivery::ToUser {
                chat_id: 555,
                route: Route::AdminReplyNeedsCacheLookup { fingerprint: expected_key }
            }
        );
        assert_eq!(
            transport.calls().last(),
            Some(&Call::Copy { to: 555, from: ADMIN, message_id: 20 })
        );
    }

    #[tokio::test]
    async fn test_public_user_is_not_cached() {
        let transport = Arc::new(MockTransport::default());
        let cache = Arc::new(CountingCache::new());
        let engine = engine(transport.clone(), cache.clone());

        let delivery = engine.handle(&user_msg("Hello")).await.unwrap();
        assert_eq!(delivery, Delivery::ToAdmin { route: Route::UserMessagePublic });
        assert_eq!(cache.touches(), 0);
        assert!(transport.calls().contains(&Call::Forward { to: ADMIN, from: 555, message_id: 10 }));
    }

    #[tokio::test]
    async fn test_native_sender_skips_cache() {
        let transport = Arc::new(MockTransport::default());
        let cache = Arc::new(CountingCache::new());
        let engine = engine(transport.clone(), cache.clone());

        let origin = Some(ForwardOrigin::User {
            user_id: 777,
            username: Some("bob".to_string()),
        });
        let delivery = engine.handle(&admin_reply(origin)).await.unwrap();

        assert_eq!(
            delivery,
            Delivery::ToUser {
                chat_id: 777,
                route: Route::AdminReplyWithNativeSender { user_id: 777 }
            }
        );
        assert_eq!(cache.touches(), 0);
        assert_eq!(transport.calls(), vec![Call::Copy { to: 777, from: ADMIN, message_id: 20 }]);
    }

    #[tokio::test]
    async fn test_missing_entry_delivers_nothing() {
        let transport = Arc::new(MockTransport::default());
        let cache = Arc::new(CountingCache::new());
        let engine = engine(transport.clone(), cache.clone());

        let err = engine.handle(&admin_reply(hidden_ali())).await.unwrap_err();
        assert!(matches!(err, RelayError::SenderNotFound { .. }));
        assert!(err.is_resolution_failure());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_expired_entry_delivers_nothing() {
        let transport = Arc::new(MockTransport::default());
        let cache = Arc::new(CountingCache::new());
        cache
            .set(&Fingerprint::build("Ali", "", "Hello", "", 1000), 555, Duration::ZERO)
            .await
            .unwrap();
        let engine = engine(transport.clone(), cache);

        let err = engine.handle(&admin_reply(hidden_ali())).await.unwrap_err();
        assert!(matches!(err, RelayError::SenderNotFound { .. }));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reply_to_sender_notice_is_not_relayed() {
        let transport = Arc::new(MockTransport::default());
        let cache = Arc::new(CountingCache::new());
        let engine = engine(transport.clone(), cache.clone());

        let err = engine.handle(&admin_reply(None)).await.unwrap_err();
        assert!(matches!(err, RelayError::NotRelayed));
        assert_eq!(cache.touches(), 0);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_user_routes_have_no_reply_destination() {
        let cache = Arc::new(CountingCache::new());
        let engine = engine(Arc::new(MockTransport::default()), cache.clone());

        let private = Route::UserMessagePrivate {
            fingerprint: Fingerprint::build("Ali", "", "Hello", "", 1000),
        };
        for route in [private, Route::UserMessagePublic] {
            let err = engine.resolve_destination(&route).await.unwrap_err();
            assert!(matches!(err, RelayError::NotRelayed), "{route:?} resolved to {err}");
        }
        assert_eq!(cache.touches(), 0);
    }

    #[tokio::test]
    async fn test_admin_chatter_is_ignored() {
        let transport = Arc::new(MockTransport::default());
        let engine = engine(transport.clone(), Arc::new(CountingCache::new()));

        let mut msg = admin_reply(None);
        msg.reply_to = None;
        assert_eq!(engine.handle(&msg).await.unwrap(), Delivery::Ignored);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_forward_failure_notifies_admin() {
        let transport = Arc::new(MockTransport {
            fail_forward: true,
            ..Default::default()
        });
        let engine = engine(transport.clone(), Arc::new(CountingCache::new()));

        let err = engine.handle(&user_msg("Hello")).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[1], Call::Send { chat_id: ADMIN, text } if text.starts_with("Ошибка у пользователя: ")));
        // No acknowledgement when the forward failed
        assert!(!calls.iter().any(|c| matches!(c, Call::Reply { .. })));
    }

    #[tokio::test]
    async fn test_copy_failure_is_reported() {
        let transport = Arc::new(MockTransport {
            fail_copy: true,
            ..Default::default()
        });
        let engine = engine(transport.clone(), Arc::new(CountingCache::new()));

        let origin = Some(ForwardOrigin::User { user_id: 777, username: None });
        let err = engine.handle(&admin_reply(origin)).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
        assert!(!err.is_resolution_failure());
    }

    #[tokio::test]
    async fn test_chat_lookup_failure_drops_message() {
        let transport = Arc::new(MockTransport {
            fail_chat_lookup: true,
            ..Default::default()
        });
        let cache = Arc::new(CountingCache::new());
        let engine = engine(transport.clone(), cache.clone());

        let err = engine.handle(&user_msg("Hello")).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
        assert!(transport.calls().is_empty());
        assert_eq!(cache.touches(), 0);
    }

    #[tokio::test]
    async fn test_store_outage_drops_message() {
        let transport = Arc::new(MockTransport::with_private(&[555]));
        let engine = engine(transport.clone(), Arc::new(UnreachableCache));

        let err = engine.handle(&user_msg("Hello")).await.unwrap_err();
        assert!(matches!(err, RelayError::Cache(CacheError::Redis(_))));
        assert!(transport.calls().is_empty());

        let err = engine.handle(&admin_reply(hidden_ali())).await.unwrap_err();
        assert!(matches!(err, RelayError::Cache(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_media_caption_feeds_fingerprint() {
        let transport = Arc::new(MockTransport::with_private(&[555]));
        let cache = Arc::new(CountingCache::new());
        let engine = engine(transport.clone(), cache.clone());

        let mut photo = user_msg("");
        photo.kind = MessageKind::Media;
        photo.caption = "my receipt".to_string();
        engine.handle(&photo).await.unwrap();

        let mut reply = admin_reply(hidden_ali());
        if let Some(ref mut replied) = reply.reply_to {
            replied.text = String::new();
            replied.caption = "my receipt".to_string();
        }
        let delivery = engine.handle(&reply).await.unwrap();
        assert!(matches!(delivery, Delivery::ToUser { chat_id: 555, .. }));
    }

    #[tokio::test]
    async fn test_acknowledgement_can_be_disabled() {
        let transport = Arc::new(MockTransport::default());
        let mut settings = settings();
        settings.acknowledgement = None;
        let engine = RelayEngine::new(settings, transport.clone(), Arc::new(CountingCache::new()));

        engine.handle(&user_msg("Hello")).await.unwrap();
        assert!(!transport.calls().iter().any(|c| matches!(c, Call::Reply { .. })));
    }
}
