use {
    switchboard_common::{ChatType, MsgContext},
    switchboard_config::{SessionConfig, SessionScope},
    switchboard_sessions::key::{
        DEFAULT_MAIN_KEY, GLOBAL_KEY, GroupKey, GroupKind, LEGACY_GROUP_PREFIX, UNKNOWN_KEY,
        is_known_surface,
    },
    tracing::trace,
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, labels, routing as routing_metrics};

/// Group-domain marker used by WhatsApp group JIDs.
const GROUP_DOMAIN_MARKER: &str = "@g.us";

/// Session scoping, from `[session]` config.
#[derive(Debug, Clone)]
pub struct SessionRouting {
    pub scope: SessionScope,
    pub main_key: String,
}

impl Default for SessionRouting {
    fn default() -> Self {
        Self {
            scope: SessionScope::PerSender,
            main_key: DEFAULT_MAIN_KEY.into(),
        }
    }
}

impl SessionRouting {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            scope: config.scope,
            main_key: config.main_key().to_string(),
        }
    }

    pub fn main_key(&self) -> &str {
        let key = self.main_key.trim();
        if key.is_empty() { DEFAULT_MAIN_KEY } else { key }
    }
}

/// A group address resolved from an inbound context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGroup {
    pub group: GroupKey,
    /// Canonical key, surface-qualified whenever a surface is known.
    pub key: String,
    /// `group:<id>` when the input used a legacy form and the canonical key differs.
    pub legacy_key: Option<String>,
    pub chat_type: ChatType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSessionKey {
    pub key: String,
    pub chat_type: ChatType,
    pub legacy_key: Option<String>,
    pub group: Option<GroupKey>,
}

fn is_group_context(ctx: &MsgContext, lower_from: &str) -> bool {
    ctx.chat_type
        .as_deref()
        .and_then(ChatType::parse)
        .is_some_and(ChatType::is_group_like)
        || lower_from.starts_with(LEGACY_GROUP_PREFIX)
        || lower_from.contains(GROUP_DOMAIN_MARKER)
        || lower_from.contains(":group:")
        || lower_from.contains(":channel:")
}

fn is_surface(segment: &str, hint: Option<&str>) -> bool {
    !segment.is_empty()
        && (is_known_surface(segment) || hint.is_some_and(|h| h.eq_ignore_ascii_case(segment)))
}

/// Resolve the group addressed by `ctx`, or `None` for direct traffic.
pub fn resolve_group_key(ctx: &MsgContext) -> Option<ResolvedGroup> {
    let from = ctx.from.trim();
    let lower = from.to_ascii_lowercase();
    if !is_group_context(ctx, &lower) {
        return None;
    }

    let hint = ctx.surface_lower();
    let explicit_room = ctx.chat_type.as_deref().and_then(ChatType::parse) == Some(ChatType::Room);

    let mut legacy = false;
    let mut rest = from;
    if lower.starts_with(LEGACY_GROUP_PREFIX) {
        legacy = true;
        rest = &from[LEGACY_GROUP_PREFIX.len()..];
    }

    let mut surface: Option<String> = None;
    let mut kind: Option<GroupKind> = None;
    let mut id = rest;

    // surface:kind:id | kind:id | surface:id | id
    if let Some((first, tail)) = rest.split_once(':') {
        if is_surface(first, hint.as_deref()) {
            surface = Some(first.to_ascii_lowercase());
            id = tail;
            if let Some((second, tail)) = tail.split_once(':')
                && let Some(k) = GroupKind::parse(second)
            {
                kind = Some(k);
                id = tail;
            }
        } else if let Some(k) = GroupKind::parse(first) {
            kind = Some(k);
            id = tail;
        }
    }

    if surface.is_none() && lower.contains(GROUP_DOMAIN_MARKER) {
        legacy = true;
    }

    let id = match id.trim() {
        "" => UNKNOWN_KEY.to_string(),
        id => id.to_string(),
    };

    let kind = kind.unwrap_or(if explicit_room {
        GroupKind::Channel
    } else {
        GroupKind::Group
    });
    let group = GroupKey {
        surface: surface.or(hint),
        kind,
        id,
    };
    let key = group.render();
    let legacy_key = Some(group.legacy_key()).filter(|k| legacy && *k != key);

    Some(ResolvedGroup {
        chat_type: kind.chat_type(),
        key,
        legacy_key,
        group,
    })
}

/// Pick the session key for an inbound message.
pub fn resolve_session_key(ctx: &MsgContext, routing: &SessionRouting) -> ResolvedSessionKey {
    let group = resolve_group_key(ctx);
    let resolved = match (routing.scope, group) {
        (SessionScope::Global, group) => ResolvedSessionKey {
            key: GLOBAL_KEY.into(),
            chat_type: group.as_ref().map_or(ChatType::Direct, |g| g.chat_type),
            legacy_key: None,
            group: group.map(|g| g.group),
        },
        (SessionScope::PerSender, Some(g)) => ResolvedSessionKey {
            key: g.key,
            chat_type: g.chat_type,
            legacy_key: g.legacy_key,
            group: Some(g.group),
        },
        (SessionScope::PerSender, None) => ResolvedSessionKey {
            key: routing.main_key().to_string(),
            chat_type: ChatType::Direct,
            legacy_key: None,
            group: None,
        },
    };

    trace!(from = %ctx.from, session_key = %resolved.key, chat_type = %resolved.chat_type, "resolved session key");
    #[cfg(feature = "metrics")]
    {
        counter!(routing_metrics::RESOLUTIONS_TOTAL, labels::CHAT_TYPE => resolved.chat_type.as_str())
            .increment(1);
        if resolved.legacy_key.is_some() {
            counter!(routing_metrics::LEGACY_KEYS_TOTAL).increment(1);
        }
    }
    resolved
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    fn ctx(from: &str, surface: Option<&str>, chat_type: Option<&str>) -> MsgContext {
        MsgContext {
            from: from.into(),
            surface: surface.map(Into::into),
            chat_type: chat_type.map(Into::into),
            body: "hi".into(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("whatsapp:group:123@g.us", None, None, "whatsapp:group:123@g.us", None)]
    #[case("123@g.us", Some("whatsapp"), None, "whatsapp:group:123@g.us", Some("group:123@g.us"))]
    #[case("123@g.us", None, None, "group:123@g.us", None)]
    #[case("group:abc", None, None, "group:abc", None)]
    #[case("group:abc", Some("Signal"), None, "signal:group:abc", Some("group:abc"))]
    #[case("group:telegram:group:-100", None, None, "telegram:group:-100", Some("group:-100"))]
    #[case("discord:channel:42", None, None, "discord:channel:42", None)]
    #[case("channel:42", Some("slack"), Some("channel"), "slack:channel:42", None)]
    #[case("-100123", Some("telegram"), Some("group"), "telegram:group:-100123", None)]
    #[case("C777", Some("slack"), Some("channel"), "slack:channel:C777", None)]
    #[case("mychat:group:9", Some("mychat"), None, "mychat:group:9", None)]
    #[case("Telegram:Group:5", None, None, "telegram:group:5", None)]
    fn group_keys(
        #[case] from: &str,
        #[case] surface: Option<&str>,
        #[case] chat_type: Option<&str>,
        #[case] key: &str,
        #[case] legacy: Option<&str>,
    ) {
        let resolved = resolve_group_key(&ctx(from, surface, chat_type)).unwrap();
        assert_eq!(resolved.key, key);
        assert_eq!(resolved.legacy_key.as_deref(), legacy);
    }

    #[rstest]
    #[case("+15551234", Some("whatsapp"), None)]
    #[case("user:42", Some("discord"), Some("direct"))]
    #[case("", None, None)]
    fn direct_contexts_have_no_group(
        #[case] from: &str,
        #[case] surface: Option<&str>,
        #[case] chat_type: Option<&str>,
    ) {
        assert!(resolve_group_key(&ctx(from, surface, chat_type)).is_none());
    }

    #[test]
    fn channel_kind_maps_to_room() {
        let resolved = resolve_group_key(&ctx("discord:channel:1", None, None)).unwrap();
        assert_eq!(resolved.chat_type, ChatType::Room);
        let resolved = resolve_group_key(&ctx("group:1", None, None)).unwrap();
        assert_eq!(resolved.chat_type, ChatType::Group);
    }

    #[test]
    fn malformed_group_input_degrades() {
        let resolved = resolve_group_key(&ctx("", Some("telegram"), Some("group"))).unwrap();
        assert_eq!(resolved.key, "telegram:group:unknown");
        let resolved = resolve_group_key(&ctx("group:", None, None)).unwrap();
        assert_eq!(resolved.key, "group:unknown");
    }

    #[rstest]
    #[case("whatsapp:group:123@g.us", None)]
    #[case("123@g.us", Some("whatsapp"))]
    #[case("group:abc", None)]
    #[case("C777", Some("slack"))]
    fn resolution_is_idempotent(#[case] from: &str, #[case] surface: Option<&str>) {
        let first = resolve_group_key(&ctx(from, surface, Some("group"))).unwrap();
        let second = resolve_group_key(&ctx(&first.key, surface, Some("group"))).unwrap();
        assert_eq!(first.key, second.key);
    }

    #[test]
    fn direct_goes_to_main_key() {
        let routing = SessionRouting {
            scope: SessionScope::PerSender,
            main_key: "home".into(),
        };
        let resolved = resolve_session_key(&ctx("+1555", Some("signal"), None), &routing);
        assert_eq!(resolved.key, "home");
        assert_eq!(resolved.chat_type, ChatType::Direct);
        assert!(resolved.group.is_none());

        let blank = SessionRouting {
            main_key: " ".into(),
            ..SessionRouting::default()
        };
        assert_eq!(
            resolve_session_key(&ctx("+1555", None, None), &blank).key,
            "main"
        );
    }

    #[test]
    fn global_scope_shares_one_key() {
        let routing = SessionRouting {
            scope: SessionScope::Global,
            ..SessionRouting::default()
        };
        let dm = resolve_session_key(&ctx("+1555", None, None), &routing);
        let group = resolve_session_key(&ctx("telegram:group:1", None, None), &routing);
        assert_eq!(dm.key, "global");
        assert_eq!(group.key, "global");
        assert_eq!(group.chat_type, ChatType::Group);
        assert!(group.legacy_key.is_none());
    }

    #[test]
    fn group_goes_to_group_key() {
        let resolved = resolve_session_key(
            &ctx("123@g.us", Some("whatsapp"), None),
            &SessionRouting::default(),
        );
        assert_eq!(resolved.key, "whatsapp:group:123@g.us");
        assert_eq!(resolved.legacy_key.as_deref(), Some("group:123@g.us"));
        assert_eq!(resolved.group.unwrap().surface.as_deref(), Some("whatsapp"));
    }
}
