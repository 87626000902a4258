//! Object cache
//!
//! In-memory store for every entity the client has seen. Gateway sessions and
//! REST responses write; application code reads.

use cord_core::{Channel, Guild, GuildParts, Member, Message, Role, Snowflake, User};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::key::{Entity, EntityKey, EntityKind};

/// Default number of cached messages
pub const DEFAULT_MAX_MESSAGES: usize = 1_000;

/// Thread-safe entity cache
///
/// Each kind has its own lock. Operations spanning kinds (guild purge, shard
/// invalidation, channel removal) take every lock they need up front, always in
/// the order guilds, channels, roles, members, messages. Users are global and
/// never purged with a guild.
pub struct ObjectCache {
    users: RwLock<HashMap<Snowflake, User>>,
    guilds: RwLock<HashMap<Snowflake, Guild>>,
    channels: RwLock<HashMap<Snowflake, Channel>>,
    roles: RwLock<HashMap<Snowflake, Role>>,
    members: RwLock<HashMap<(Snowflake, Snowflake), Member>>,
    messages: RwLock<MessageStore>,
}

/// Bounded message storage, evicting the oldest insert first
struct MessageStore {
    max: usize,
    by_id: HashMap<Snowflake, Message>,
    order: VecDeque<Snowflake>,
}

impl MessageStore {
    fn new(max: usize) -> Self {
        Self {
            max,
            by_id: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn upsert(&mut self, message: Message) -> bool {
        if self.max == 0 {
            return false;
        }

        if let Some(existing) = self.by_id.get_mut(&message.id) {
            if *existing == message {
                return false;
            }
            *existing = message;
            return true;
        }

        self.order.push_back(message.id);
        self.by_id.insert(message.id, message);

        while self.by_id.len() > self.max {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.by_id.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    fn remove(&mut self, id: Snowflake) -> Option<Message> {
        let removed = self.by_id.remove(&id)?;
        if let Some(pos) = self.order.iter().position(|&m| m == id) {
            self.order.remove(pos);
        }
        Some(removed)
    }

    fn retain(&mut self, mut keep: impl FnMut(&Message) -> bool) -> usize {
        let before = self.by_id.len();
        self.by_id.retain(|_, message| keep(message));
        let by_id = &self.by_id;
        self.order.retain(|id| by_id.contains_key(id));
        before - self.by_id.len()
    }
}

/// Counts of entities removed by a bulk purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub guilds: usize,
    pub channels: usize,
    pub roles: usize,
    pub members: usize,
    pub messages: usize,
}

impl ObjectCache {
    /// Create a cache keeping at most `max_messages` messages
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            guilds: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
            messages: RwLock::new(MessageStore::new(max_messages)),
        }
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    /// Look up an entity by key
    pub fn get(&self, key: &EntityKey) -> Option<Entity> {
        match *key {
            EntityKey::User(id) => self.users.read().get(&id).cloned().map(Entity::User),
            EntityKey::Guild(id) => self.guilds.read().get(&id).cloned().map(Entity::Guild),
            EntityKey::Channel(id) => {
                self.channels.read().get(&id).cloned().map(Entity::Channel)
            }
            EntityKey::Role(id) => self.roles.read().get(&id).cloned().map(Entity::Role),
            EntityKey::Member { guild_id, user_id } => self
                .members
                .read()
                .get(&(guild_id, user_id))
                .cloned()
                .map(Entity::Member),
            EntityKey::Message(id) => self
                .messages
                .read()
                .by_id
                .get(&id)
                .cloned()
                .map(Entity::Message),
        }
    }

    /// Insert or replace an entity
    ///
    /// Returns `false` when the cache already held an identical value, so
    /// applying the same update twice is observably a no-op.
    pub fn upsert(&self, entity: impl Into<Entity>) -> bool {
        match entity.into() {
            Entity::User(user) => replace(&mut self.users.write(), user.id, user),
            Entity::Guild(guild) => replace(&mut self.guilds.write(), guild.id, guild),
            Entity::Channel(channel) => replace(&mut self.channels.write(), channel.id, channel),
            Entity::Role(role) => replace(&mut self.roles.write(), role.id, role),
            Entity::Member(member) => replace(
                &mut self.members.write(),
                (member.guild_id, member.user_id),
                member,
            ),
            Entity::Message(message) => self.messages.write().upsert(message),
        }
    }

    /// Upsert many entities, returning how many changed
    pub fn upsert_all<I, E>(&self, entities: I) -> usize
    where
        I: IntoIterator<Item = E>,
        E: Into<Entity>,
    {
        entities
            .into_iter()
            .map(|entity| self.upsert(entity))
            .filter(|changed| *changed)
            .count()
    }

    /// Upsert a split guild payload, returning how many entities changed
    pub fn upsert_guild(&self, parts: GuildParts) -> usize {
        let mut changed = 0;
        if let Some(guild) = parts.guild {
            changed += usize::from(self.upsert(guild));
        }
        changed += self.upsert_all(parts.users);
        changed += self.upsert_all(parts.channels);
        changed += self.upsert_all(parts.roles);
        changed + self.upsert_all(parts.members)
    }

    /// Remove an entity
    ///
    /// Removing a guild purges everything it owns; removing a channel drops its messages.
    pub fn remove(&self, key: &EntityKey) -> Option<Entity> {
        match *key {
            EntityKey::User(id) => self.users.write().remove(&id).map(Entity::User),
            EntityKey::Guild(id) => self.purge_guild(id).map(Entity::Guild),
            EntityKey::Channel(id) => {
                let mut channels = self.channels.write();
                let mut messages = self.messages.write();
                let removed = channels.remove(&id)?;
                messages.retain(|m| m.channel_id != id);
                Some(Entity::Channel(removed))
            }
            EntityKey::Role(id) => self.roles.write().remove(&id).map(Entity::Role),
            EntityKey::Member { guild_id, user_id } => self
                .members
                .write()
                .remove(&(guild_id, user_id))
                .map(Entity::Member),
            EntityKey::Message(id) => self.messages.write().remove(id).map(Entity::Message),
        }
    }

    /// All entities of one kind, ordered by key
    pub fn snapshot(&self, kind: EntityKind) -> Vec<Entity> {
        let mut entities: Vec<Entity> = match kind {
            EntityKind::User => self.users.read().values().cloned().map(Entity::User).collect(),
            EntityKind::Guild => self.guilds.read().values().cloned().map(Entity::Guild).collect(),
            EntityKind::Channel => self
                .channels
                .read()
                .values()
                .cloned()
                .map(Entity::Channel)
                .collect(),
            EntityKind::Role => self.roles.read().values().cloned().map(Entity::Role).collect(),
            EntityKind::Member => self
                .members
                .read()
                .values()
                .cloned()
                .map(Entity::Member)
                .collect(),
            EntityKind::Message => self
                .messages
                .read()
                .by_id
                .values()
                .cloned()
                .map(Entity::Message)
                .collect(),
        };
        entities.sort_by_key(Entity::key);
        entities
    }

    /// Number of cached entities of one kind
    pub fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::User => self.users.read().len(),
            EntityKind::Guild => self.guilds.read().len(),
            EntityKind::Channel => self.channels.read().len(),
            EntityKind::Role => self.roles.read().len(),
            EntityKind::Member => self.members.read().len(),
            EntityKind::Message => self.messages.read().by_id.len(),
        }
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut users = self.users.write();
        let mut guilds = self.guilds.write();
        let mut channels = self.channels.write();
        let mut roles = self.roles.write();
        let mut members = self.members.write();
        let mut messages = self.messages.write();

        users.clear();
        guilds.clear();
        channels.clear();
        roles.clear();
        members.clear();
        messages.retain(|_| false);
    }

    // =========================================================================
    // Typed lookups
    // =========================================================================

    pub fn user(&self, id: Snowflake) -> Option<User> {
        self.users.read().get(&id).cloned()
    }

    pub fn guild(&self, id: Snowflake) -> Option<Guild> {
        self.guilds.read().get(&id).cloned()
    }

    pub fn channel(&self, id: Snowflake) -> Option<Channel> {
        self.channels.read().get(&id).cloned()
    }

    pub fn role(&self, id: Snowflake) -> Option<Role> {
        self.roles.read().get(&id).cloned()
    }

    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.members.read().get(&(guild_id, user_id)).cloned()
    }

    pub fn message(&self, id: Snowflake) -> Option<Message> {
        self.messages.read().by_id.get(&id).cloned()
    }

    // =========================================================================
    // Relationship resolution
    // =========================================================================

    /// Guild owning a channel, resolved through the channel's guild ID
    pub fn guild_of_channel(&self, channel_id: Snowflake) -> Option<Guild> {
        let guild_id = self.channels.read().get(&channel_id)?.guild_id?;
        self.guild(guild_id)
    }

    /// Channels belonging to a guild, ordered by ID
    pub fn channels_of_guild(&self, guild_id: Snowflake) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .channels
            .read()
            .values()
            .filter(|c| c.guild_id == Some(guild_id))
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.id);
        channels
    }

    /// Roles belonging to a guild, ordered by position then ID
    pub fn roles_of_guild(&self, guild_id: Snowflake) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .roles
            .read()
            .values()
            .filter(|r| r.guild_id == guild_id)
            .cloned()
            .collect();
        roles.sort_by_key(|r| (r.position, r.id));
        roles
    }

    /// Members of a guild, ordered by user ID
    pub fn members_of_guild(&self, guild_id: Snowflake) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .members
            .read()
            .values()
            .filter(|m| m.guild_id == guild_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.user_id);
        members
    }

    /// Cached messages in a channel, oldest first
    pub fn messages_in_channel(&self, channel_id: Snowflake) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .read()
            .by_id
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.id);
        messages
    }

    /// Author of a cached message
    pub fn author_of(&self, message_id: Snowflake) -> Option<User> {
        let author_id = self.messages.read().by_id.get(&message_id)?.author_id;
        self.user(author_id)
    }

    // =========================================================================
    // Targeted mutations
    // =========================================================================

    /// Mutate a cached message in place
    ///
    /// Returns the message before and after the change, or `None` if it is not cached.
    pub fn update_message<F>(&self, id: Snowflake, update: F) -> Option<(Message, Message)>
    where
        F: FnOnce(&mut Message),
    {
        let mut messages = self.messages.write();
        let message = messages.by_id.get_mut(&id)?;
        let before = message.clone();
        update(message);
        Some((before, message.clone()))
    }

    /// Remove several messages at once, returning those that were cached
    pub fn remove_messages(&self, ids: &[Snowflake]) -> Vec<Message> {
        let mut messages = self.messages.write();
        ids.iter().filter_map(|id| messages.remove(*id)).collect()
    }

    /// Remove a guild and everything it owns in one step
    pub fn purge_guild(&self, guild_id: Snowflake) -> Option<Guild> {
        let mut guilds = self.guilds.write();
        let removed = guilds.remove(&guild_id);

        let mut channels = self.channels.write();
        let mut roles = self.roles.write();
        let mut members = self.members.write();
        let mut messages = self.messages.write();

        let targets = HashSet::from([guild_id]);
        let stats = purge_owned(&targets, &mut channels, &mut roles, &mut members, &mut messages);

        tracing::debug!(
            guild_id = %guild_id,
            channels = stats.channels,
            roles = stats.roles,
            members = stats.members,
            messages = stats.messages,
            "Purged guild from cache"
        );
        removed
    }

    /// Purge every guild routed to a shard
    ///
    /// Used when a session is invalidated and its guild state can no longer be
    /// trusted. Returns the purged guild IDs.
    pub fn invalidate_shard(&self, shard_id: u32, shard_count: u32) -> Vec<Snowflake> {
        let mut guilds = self.guilds.write();
        let mut channels = self.channels.write();
        let mut roles = self.roles.write();
        let mut members = self.members.write();
        let mut messages = self.messages.write();

        let targets: HashSet<Snowflake> = guilds
            .keys()
            .copied()
            .filter(|id| id.shard_id(shard_count) == shard_id)
            .collect();
        guilds.retain(|id, _| !targets.contains(id));

        let mut stats =
            purge_owned(&targets, &mut channels, &mut roles, &mut members, &mut messages);
        stats.guilds = targets.len();

        tracing::debug!(
            shard_id,
            guilds = stats.guilds,
            channels = stats.channels,
            members = stats.members,
            messages = stats.messages,
            "Invalidated shard cache"
        );

        let mut purged: Vec<Snowflake> = targets.into_iter().collect();
        purged.sort_unstable();
        purged
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

fn replace<K, V>(map: &mut HashMap<K, V>, key: K, value: V) -> bool
where
    K: std::hash::Hash + Eq,
    V: PartialEq,
{
    match map.get(&key) {
        Some(existing) if *existing == value => false,
        _ => {
            map.insert(key, value);
            true
        }
    }
}

/// Remove channels, roles, members and messages owned by `guild_ids`.
/// Callers hold all the write guards.
fn purge_owned(
    guild_ids: &HashSet<Snowflake>,
    channels: &mut HashMap<Snowflake, Channel>,
    roles: &mut HashMap<Snowflake, Role>,
    members: &mut HashMap<(Snowflake, Snowflake), Member>,
    messages: &mut MessageStore,
) -> PurgeStats {
    let mut stats = PurgeStats::default();
    if guild_ids.is_empty() {
        return stats;
    }

    let mut dropped_channels = HashSet::new();
    channels.retain(|id, channel| {
        let owned = channel.guild_id.is_some_and(|g| guild_ids.contains(&g));
        if owned {
            dropped_channels.insert(*id);
        }
        !owned
    });
    stats.channels = dropped_channels.len();

    let before = roles.len();
    roles.retain(|_, role| !guild_ids.contains(&role.guild_id));
    stats.roles = before - roles.len();

    let before = members.len();
    members.retain(|(guild_id, _), _| !guild_ids.contains(guild_id));
    stats.members = before - members.len();

    stats.messages = messages.retain(|m| {
        let in_guild = m.guild_id.is_some_and(|g| guild_ids.contains(&g));
        !in_guild && !dropped_channels.contains(&m.channel_id)
    });

    stats
}
