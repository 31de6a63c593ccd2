//! Legacy session key rewrites applied when the store is loaded.
//!
//! Each migration is a pure function from `(key, entry)` to an optional new
//! key. They run in version order; a later migration sees the keys produced
//! by earlier ones.

use std::{collections::HashSet, sync::Mutex};

use tracing::warn;

use crate::{
    entry::SessionEntry,
    key::{GroupKey, GroupKind, LEGACY_GROUP_PREFIX, is_known_surface},
    store::SessionMap,
};

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub apply: fn(&str, &SessionEntry) -> Option<String>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "strip-nested-group-prefix",
        apply: strip_nested_group_prefix,
    },
    Migration {
        version: 2,
        name: "qualify-legacy-group",
        apply: qualify_legacy_group,
    },
    Migration {
        version: 3,
        name: "lowercase-surface",
        apply: lowercase_surface,
    },
];

/// `group:whatsapp:group:123` → `whatsapp:group:123`
fn strip_nested_group_prefix(key: &str, _entry: &SessionEntry) -> Option<String> {
    let rest = key.strip_prefix(LEGACY_GROUP_PREFIX)?;
    let (surface, tail) = rest.split_once(':')?;
    let (kind, id) = tail.split_once(':')?;
    (is_known_surface(surface) && GroupKind::parse(kind).is_some() && !id.is_empty())
        .then(|| rest.to_string())
}

/// `group:123` → `<surface>:group:123` once the entry tells us the surface.
fn qualify_legacy_group(key: &str, entry: &SessionEntry) -> Option<String> {
    let id = key.strip_prefix(LEGACY_GROUP_PREFIX)?;
    if id.is_empty() {
        return None;
    }
    let surface = entry
        .surface
        .as_deref()
        .or(entry.last_channel.as_deref())
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())?;
    let kind = match entry.chat_type {
        Some(switchboard_common::ChatType::Room) => GroupKind::Channel,
        _ => GroupKind::Group,
    };
    Some(
        GroupKey {
            surface: Some(surface),
            kind,
            id: id.to_string(),
        }
        .render(),
    )
}

/// `WhatsApp:Group:123` → `whatsapp:group:123`
fn lowercase_surface(key: &str, _entry: &SessionEntry) -> Option<String> {
    if key.starts_with(LEGACY_GROUP_PREFIX) {
        return None;
    }
    let (surface, tail) = key.split_once(':')?;
    let (kind, _) = tail.split_once(':')?;
    GroupKind::parse(kind)?;
    let lowered = surface.chars().chain(kind.chars()).any(|c| c.is_ascii_uppercase());
    lowered.then(|| GroupKey::parse(key).map(|k| k.render()))?
}

/// One rewritten key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRewrite {
    pub from: String,
    pub to: String,
    pub migration: &'static str,
}

/// Apply every migration. When the target key already exists, the entry
/// with the newer `updatedAt` is kept.
pub fn migrate_keys(mut map: SessionMap) -> (SessionMap, Vec<KeyRewrite>) {
    let mut rewrites = Vec::new();
    for migration in MIGRATIONS {
        let keys: Vec<String> = map.keys().cloned().collect();
        for key in keys {
            let Some(entry) = map.get(&key) else {
                continue;
            };
            let Some(target) = (migration.apply)(&key, entry) else {
                continue;
            };
            if target == key {
                continue;
            }
            let Some(entry) = map.remove(&key) else {
                continue;
            };
            match map.get(&target) {
                Some(existing) if existing.updated_at >= entry.updated_at => {},
                _ => {
                    map.insert(target.clone(), entry);
                },
            }
            rewrites.push(KeyRewrite {
                from: key,
                to: target,
                migration: migration.name,
            });
        }
    }
    (map, rewrites)
}

/// Warnings that should be logged once per process rather than on every load.
#[derive(Debug, Default)]
pub struct Notices {
    seen: Mutex<HashSet<String>>,
}

impl Notices {
    /// `true` the first time `id` is seen.
    pub fn first(&self, id: &str) -> bool {
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(id.to_string()),
            Err(_) => false,
        }
    }

    pub fn report(&self, rewrites: &[KeyRewrite]) {
        for rewrite in rewrites {
            if self.first(&format!("{}:{}", rewrite.migration, rewrite.from)) {
                warn!(
                    from = %rewrite.from,
                    to = %rewrite.to,
                    migration = rewrite.migration,
                    "legacy session key rewritten"
                );
            }
        }
    }
}
