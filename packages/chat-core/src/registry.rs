//! The consolidated four-index registry: connected set, name index, group
//! table, and pair map, plus the rate-limit and audit state that rides
//! along with a connection's lifecycle.
//!
//! # Locking discipline
//!
//! `connections` is a lock-free `DashMap` keyed by id; simple lookups
//! (`get`, `lookup`, `names`, `stats`) never touch anything else and stay
//! lock-free. Every operation that touches more than one of the four
//! indexes together (registering/removing a connection, opening or closing
//! a pair, any group mutation) takes `ops_lock` first, so the four-index
//! invariants in SPEC_FULL.md §8 always hold between operations.
//!
//! Holding `ops_lock` across the best-effort notification sends inside
//! those operations is safe and does not reintroduce the "slow peer blocks
//! everyone" problem §5 warns about: every send in this module is
//! `ConnectionHandle::try_send_line`, a non-blocking enqueue onto the
//! target's own channel. A full channel just means that peer misses the
//! notification (logged, not retried); the caller never waits on another
//! connection's socket.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::audit::{AuditEntry, AuditLog, Direction};
use crate::connection::{outbound_channel, ConnectionHandle, ConnectionId, ConnectionIdGen, ConnectionInfo};
use crate::error::{ChatError, GroupError, NameError};
use crate::stats::{ClientStats, Stats};

/// The registry of record. One instance per running server; tests construct
/// fresh ones rather than sharing a singleton (SPEC_FULL.md §9).
pub struct Registry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    names: DashMap<String, ConnectionId>,
    groups: DashMap<String, HashSet<ConnectionId>>,
    pairs: DashMap<ConnectionId, ConnectionId>,
    audit: Mutex<AuditLog>,
    ops_lock: Mutex<()>,
    id_gen: ConnectionIdGen,
    outbound_channel_capacity: usize,
}

impl Registry {
    #[must_use]
    pub fn new(outbound_channel_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            names: DashMap::new(),
            groups: DashMap::new(),
            pairs: DashMap::new(),
            audit: Mutex::new(AuditLog::new()),
            ops_lock: Mutex::new(()),
            id_gen: ConnectionIdGen::new(),
            outbound_channel_capacity,
        }
    }

    fn client_id(addr: SocketAddr) -> String {
        format!("{}:{}", addr.ip(), addr.port())
    }

    // ---- connection lifecycle ------------------------------------------------

    /// Accepts a new connection: assigns an id, allocates its outbound
    /// channel, and adds it to the connected set. The connection is not yet
    /// named; callers must follow up with [`Registry::register_name`].
    #[must_use]
    pub fn connect(&self, addr: SocketAddr) -> (Arc<ConnectionHandle>, tokio::sync::mpsc::Receiver<crate::connection::OutboundMessage>) {
        let id = self.id_gen.next();
        let (tx, rx) = outbound_channel(self.outbound_channel_capacity);
        let handle = Arc::new(ConnectionHandle::new(id, tx, ConnectionInfo::new(addr, Instant::now())));
        self.connections.insert(id, Arc::clone(&handle));
        (handle, rx)
    }

    /// Validates and assigns `name` to `id`, per SPEC_FULL.md §4.2.
    ///
    /// On success, broadcasts `USER_CONNECTED:<name>` to every other
    /// connected client.
    pub fn register_name(&self, id: ConnectionId, name: &str, max_name_length: usize) -> Result<(), NameError> {
        let _guard = self.ops_lock.lock();

        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.chars().count() > max_name_length {
            return Err(NameError::TooLong { max: max_name_length, actual: name.chars().count() });
        }
        if name.contains('\n') || name.contains('\r') {
            return Err(NameError::InvalidChars);
        }
        if self.names.contains_key(name) {
            return Err(NameError::Duplicate { name: name.to_string() });
        }

        let Some(handle) = self.connections.get(&id).map(|h| Arc::clone(&h)) else {
            // Connection vanished between accept and registration; nothing to do.
            return Ok(());
        };
        handle.info.lock().name = Some(name.to_string());
        self.names.insert(name.to_string(), id);

        let notification = format!("USER_CONNECTED:{name}");
        for entry in &self.connections {
            if *entry.key() != id {
                let _ = entry.value().try_send_line(notification.clone());
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|h| Arc::clone(&h))
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<ConnectionHandle>> {
        let id = *self.names.get(name)?;
        self.get(id)
    }

    /// Sorted list of every currently registered name.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Renders the `LIST_USERS` reply text (no trailing newline).
    #[must_use]
    pub fn list_users_reply(&self) -> String {
        let names = self.names();
        format!("Connected users ({}): {}", names.len(), names.join(", "))
    }

    /// Renders the `LIST_GROUPS` reply text (no trailing newline).
    #[must_use]
    pub fn list_groups_reply(&self) -> String {
        let mut group_names: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        if group_names.is_empty() {
            return "No groups available".to_string();
        }
        group_names.sort();

        let mut lines = Vec::with_capacity(group_names.len());
        for group_name in &group_names {
            let Some(members) = self.groups.get(group_name) else { continue };
            let mut member_names: Vec<String> = members
                .iter()
                .filter_map(|id| self.get(*id).and_then(|h| h.name()))
                .collect();
            member_names.sort();
            lines.push(format!("{group_name} ({} members: {})", member_names.len(), member_names.join(", ")));
        }

        format!("Available groups ({}):\n{}", group_names.len(), lines.join("\n"))
    }

    /// Full Terminating teardown, in the strict order SPEC_FULL.md §4.7
    /// requires: notify the pair partner (reads the connection's own name,
    /// which must still be present), remove from every group, remove the
    /// name, then remove from the connected set.
    pub fn remove(&self, id: ConnectionId) {
        let _guard = self.ops_lock.lock();

        let Some(handle) = self.connections.get(&id).map(|h| Arc::clone(&h)) else {
            return;
        };
        let (name, groups, partner) = {
            let info = handle.info.lock();
            (info.name.clone(), info.groups.clone(), info.chat_partner)
        };
        let display_name = name.clone().unwrap_or_else(|| "Unknown".to_string());

        if let Some(partner_id) = partner {
            if let Some(partner_handle) = self.get(partner_id) {
                partner_handle.info.lock().chat_partner = None;
                let _ = partner_handle.try_send_line(format!(
                    "[System] {display_name} has disconnected. You can no longer send messages to them."
                ));
            }
            self.pairs.remove(&partner_id);
            self.pairs.remove(&id);
        }

        for group_name in &groups {
            if let Some(mut members) = self.groups.get_mut(group_name) {
                members.remove(&id);
                if members.is_empty() {
                    drop(members);
                    self.groups.remove(group_name);
                }
            }
        }

        if let Some(name) = &name {
            self.names.remove(name);
        }
        self.connections.remove(&id);
    }

    // ---- pair-chat -------------------------------------------------------

    /// Current chat partner of `id`, if any. Callers use this to decide
    /// between [`Registry::forward_chat`] and treating the line as freeform.
    #[must_use]
    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        self.get(id)?.info.lock().chat_partner
    }

    /// Opens a pair-chat from `from` to the client named `target_name`.
    ///
    /// Closes any existing pair for `from` first, notifying the displaced
    /// partner, then sends acknowledgments to both sides of the new pair.
    pub fn open_chat(&self, from: ConnectionId, target_name: &str) -> Result<(), ChatError> {
        let _guard = self.ops_lock.lock();

        let from_handle = self.get(from).ok_or(ChatError::TargetGone { name: target_name.to_string() })?;
        let from_name = from_handle.name().unwrap_or_default();

        if target_name == from_name {
            return Err(ChatError::SelfTarget);
        }
        let Some(target_id) = self.names.get(target_name).map(|e| *e) else {
            return Err(ChatError::UnknownTarget { name: target_name.to_string() });
        };
        let Some(target_handle) = self.get(target_id) else {
            return Err(ChatError::TargetGone { name: target_name.to_string() });
        };
        if from_handle.info.lock().chat_partner == Some(target_id) {
            return Err(ChatError::AlreadyPaired { name: target_name.to_string() });
        }

        if let Some(old_partner_id) = from_handle.info.lock().chat_partner.take() {
            if let Some(old_partner) = self.get(old_partner_id) {
                old_partner.info.lock().chat_partner = None;
                let _ = old_partner.try_send_line(format!(
                    "[System] {from_name} ended the chat to start a new one. The chat session has been closed."
                ));
            }
            self.pairs.remove(&old_partner_id);
            self.pairs.remove(&from);
        }

        from_handle.info.lock().chat_partner = Some(target_id);
        target_handle.info.lock().chat_partner = Some(from);
        self.pairs.insert(from, target_id);
        self.pairs.insert(target_id, from);

        let _ = from_handle.try_send_line(format!("Connected to {target_name}. You can now send messages directly."));
        let _ = target_handle.try_send_line(format!("{from_name} connected to you. You can now send messages directly."));

        Ok(())
    }

    /// Closes `from`'s current pair-chat, notifying the partner.
    pub fn close_chat(&self, from: ConnectionId) -> Result<(), ChatError> {
        let _guard = self.ops_lock.lock();

        let from_handle = self.get(from).ok_or(ChatError::NotInChat)?;
        let from_name = from_handle.name().unwrap_or_default();
        let Some(partner_id) = from_handle.info.lock().chat_partner.take() else {
            return Err(ChatError::NotInChat);
        };

        if let Some(partner) = self.get(partner_id) {
            partner.info.lock().chat_partner = None;
            let _ = partner.try_send_line(format!("[System] {from_name} ended the chat. The chat session has been closed."));
        }
        self.pairs.remove(&from);
        self.pairs.remove(&partner_id);

        let _ = from_handle.try_send_line("Chat disconnected successfully. You can start a new chat with CONNECT:name");
        Ok(())
    }

    /// Forwards `text` from `from` to its current partner.
    ///
    /// Must only be called when [`Registry::partner_of`] returned `Some`;
    /// returns [`ChatError::PartnerGone`] and tears down the (now
    /// one-sided) pair if the partner disappeared between the lookup and
    /// this call.
    pub fn forward_chat(&self, from: ConnectionId, text: &str) -> Result<(), ChatError> {
        let _guard = self.ops_lock.lock();

        let from_handle = self.get(from).ok_or(ChatError::PartnerGone)?;
        let Some(partner_id) = from_handle.info.lock().chat_partner else {
            return Err(ChatError::PartnerGone);
        };
        let from_name = from_handle.name().unwrap_or_default();

        let delivered = match self.get(partner_id) {
            Some(partner) if partner.try_send_line(format!("[{from_name}]: {text}")) => {
                partner.info.lock().messages_received += 1;
                true
            }
            _ => false,
        };

        if !delivered {
            from_handle.info.lock().chat_partner = None;
            if let Some(partner) = self.get(partner_id) {
                partner.info.lock().chat_partner = None;
            }
            self.pairs.remove(&from);
            self.pairs.remove(&partner_id);
            return Err(ChatError::PartnerGone);
        }

        from_handle.info.lock().messages_sent += 1;
        Ok(())
    }

    // ---- groups ------------------------------------------------------------

    fn broadcast_group_updated(&self, exclude: &[ConnectionId], text: String) {
        for entry in &self.connections {
            if !exclude.contains(entry.key()) {
                let _ = entry.value().try_send_line(text.clone());
            }
        }
    }

    /// Creates `group` with `creator` as its sole member.
    ///
    /// `INVITE_TO_GROUP` adds the invitee without asking for consent, even
    /// though its name suggests otherwise; this is preserved intentionally
    /// (SPEC_FULL.md §9) rather than "fixed", since no product decision has
    /// asked for a consent step.
    pub fn create_group(&self, creator: ConnectionId, group: &str) -> Result<(), GroupError> {
        let _guard = self.ops_lock.lock();

        if group.is_empty() {
            return Err(GroupError::EmptyName);
        }
        if self.groups.contains_key(group) {
            return Err(GroupError::AlreadyExists { name: group.to_string() });
        }
        let Some(handle) = self.get(creator) else {
            return Err(GroupError::NotFound { name: group.to_string() });
        };

        self.groups.insert(group.to_string(), HashSet::from([creator]));
        handle.info.lock().groups.insert(group.to_string());

        let _ = handle.try_send_line(format!("Group '{group}' created. You are now a member."));
        self.broadcast_group_updated(&[creator], format!("GROUP_UPDATED: {group} was created"));
        Ok(())
    }

    pub fn join_group(&self, id: ConnectionId, group: &str) -> Result<(), GroupError> {
        let _guard = self.ops_lock.lock();

        let mut members = self.groups.get_mut(group).ok_or_else(|| GroupError::NotFound { name: group.to_string() })?;
        if members.contains(&id) {
            return Err(GroupError::AlreadyMember { name: group.to_string() });
        }
        let Some(handle) = self.get(id) else {
            return Err(GroupError::NotFound { name: group.to_string() });
        };
        let name = handle.name().unwrap_or_default();

        members.insert(id);
        let snapshot: Vec<ConnectionId> = members.iter().copied().collect();
        drop(members);
        handle.info.lock().groups.insert(group.to_string());

        let _ = handle.try_send_line(format!("Joined group '{group}'"));
        for member_id in &snapshot {
            if *member_id != id {
                if let Some(member) = self.get(*member_id) {
                    let _ = member.try_send_line(format!("{name} joined group '{group}'"));
                }
            }
        }
        self.broadcast_group_updated(&[id], format!("GROUP_UPDATED: {name} joined {group}"));
        Ok(())
    }

    pub fn invite_to_group(&self, inviter: ConnectionId, group: &str, invitee_name: &str) -> Result<(), GroupError> {
        let _guard = self.ops_lock.lock();

        let mut members = self.groups.get_mut(group).ok_or_else(|| GroupError::NotFound { name: group.to_string() })?;
        if !members.contains(&inviter) {
            return Err(GroupError::NotMember { name: group.to_string() });
        }
        let Some(invitee_id) = self.names.get(invitee_name).map(|e| *e) else {
            return Err(GroupError::InviteeUnknown { name: invitee_name.to_string() });
        };
        if members.contains(&invitee_id) {
            return Err(GroupError::InviteeAlreadyMember { group: group.to_string(), name: invitee_name.to_string() });
        }
        let Some(invitee_handle) = self.get(invitee_id) else {
            return Err(GroupError::InviteeUnknown { name: invitee_name.to_string() });
        };
        let Some(inviter_handle) = self.get(inviter) else {
            return Err(GroupError::NotMember { name: group.to_string() });
        };
        let inviter_name = inviter_handle.name().unwrap_or_default();

        members.insert(invitee_id);
        let snapshot: Vec<ConnectionId> = members.iter().copied().collect();
        drop(members);
        invitee_handle.info.lock().groups.insert(group.to_string());

        let _ = invitee_handle.try_send_line(format!("You were added to group '{group}' by {inviter_name}"));
        for member_id in &snapshot {
            if *member_id != inviter && *member_id != invitee_id {
                if let Some(member) = self.get(*member_id) {
                    let _ = member.try_send_line(format!("{invitee_name} was added to group '{group}' by {inviter_name}"));
                }
            }
        }
        self.broadcast_group_updated(&[inviter, invitee_id], format!("GROUP_UPDATED: {invitee_name} was added to {group}"));
        let _ = inviter_handle.try_send_line(format!("User '{invitee_name}' was added to group '{group}'"));
        Ok(())
    }

    /// Removes `id` from `group`. If this empties the group, remaining
    /// members (there are none) are notified first and the group is
    /// deleted only afterward -- the REDESIGN FLAG in SPEC_FULL.md §9 fixes
    /// the source's bug of deleting the group before computing who to
    /// notify.
    pub fn leave_group(&self, id: ConnectionId, group: &str) -> Result<(), GroupError> {
        let _guard = self.ops_lock.lock();

        let mut members = self.groups.get_mut(group).ok_or_else(|| GroupError::NotFound { name: group.to_string() })?;
        if !members.contains(&id) {
            return Err(GroupError::NotMember { name: group.to_string() });
        }
        let Some(handle) = self.get(id) else {
            return Err(GroupError::NotMember { name: group.to_string() });
        };
        let name = handle.name().unwrap_or_default();

        members.remove(&id);
        let remaining: Vec<ConnectionId> = members.iter().copied().collect();
        let now_empty = remaining.is_empty();
        drop(members);
        handle.info.lock().groups.remove(group);

        for member_id in &remaining {
            if let Some(member) = self.get(*member_id) {
                let _ = member.try_send_line(format!("{name} left group '{group}'"));
            }
        }

        let ack = if now_empty {
            self.groups.remove(group);
            format!("Left group '{group}' (group removed as it's now empty)")
        } else {
            format!("Left group '{group}'")
        };
        let _ = handle.try_send_line(ack);
        self.broadcast_group_updated(&[id], format!("GROUP_UPDATED: {name} left {group}"));
        Ok(())
    }

    /// Broadcasts `text` to every other member of `group`, returning the
    /// number of members it was actually delivered to.
    pub fn group_message(&self, id: ConnectionId, group: &str, text: &str) -> Result<usize, GroupError> {
        let _guard = self.ops_lock.lock();

        let members = self.groups.get(group).ok_or_else(|| GroupError::NotFound { name: group.to_string() })?;
        if !members.contains(&id) {
            return Err(GroupError::NotMember { name: group.to_string() });
        }
        let Some(handle) = self.get(id) else {
            return Err(GroupError::NotMember { name: group.to_string() });
        };
        let name = handle.name().unwrap_or_default();
        let snapshot: Vec<ConnectionId> = members.iter().copied().collect();
        drop(members);

        let forward_text = format!("[{group}] {name}: {text}");
        let mut sent = 0usize;
        for member_id in &snapshot {
            if *member_id == id {
                continue;
            }
            if let Some(member) = self.get(*member_id) {
                if member.try_send_line(forward_text.clone()) {
                    member.info.lock().messages_received += 1;
                    sent += 1;
                }
            }
        }

        let ack = if sent > 0 {
            format!("Message sent to {sent} member(s) in group '{group}'")
        } else {
            format!("Message sent to group '{group}' (no other members online)")
        };
        let _ = handle.try_send_line(ack);
        handle.info.lock().messages_sent += sent as u64;

        Ok(sent)
    }

    /// Requests every connected client close, for graceful shutdown.
    /// Best-effort, same semantics as the per-connection sends elsewhere in
    /// this module; a peer whose channel is already full or closed is
    /// simply skipped.
    pub fn close_all(&self) -> usize {
        let mut count = 0;
        for entry in &self.connections {
            if entry.value().try_close() {
                count += 1;
            }
        }
        count
    }

    // ---- audit & stats -------------------------------------------------------

    pub fn record_audit(&self, entry: AuditEntry) {
        self.audit.lock().push(entry);
    }

    pub fn received_audit_entry(&self, id: ConnectionId, text: &str, timestamp: String) {
        let Some(handle) = self.get(id) else { return };
        let info = handle.info.lock();
        let Some(name) = info.name.clone() else { return };
        let client_id = Self::client_id(info.address);
        drop(info);
        self.record_audit(AuditEntry { timestamp, client_id, client_name: name, direction: Direction::Received, message: text.to_string() });
    }

    pub fn sent_audit_entry(&self, id: ConnectionId, text: &str, timestamp: String) {
        let Some(handle) = self.get(id) else { return };
        let info = handle.info.lock();
        let Some(name) = info.name.clone() else { return };
        let client_id = Self::client_id(info.address);
        drop(info);
        self.record_audit(AuditEntry { timestamp, client_id, client_name: name, direction: Direction::Sent, message: text.to_string() });
    }

    /// # Errors
    ///
    /// Only fails if the audit log somehow contains unserializable data,
    /// which cannot happen for this plain-data struct under normal use.
    pub fn export_audit_json(&self) -> serde_json::Result<String> {
        self.audit.lock().export_json()
    }

    /// Computes a full [`Stats`] snapshot, per SPEC_FULL.md §6.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let audit = self.audit.lock();
        let total_messages = audit.len();
        let messages_received = audit.entries().iter().filter(|e| matches!(e.direction, Direction::Received)).count();
        let messages_sent = audit.entries().iter().filter(|e| matches!(e.direction, Direction::Sent)).count();
        drop(audit);

        let mut clients_info = std::collections::HashMap::new();
        let mut chat_connections = std::collections::HashMap::new();

        // Snapshot every connection's info before resolving partner names, so
        // the lookups below never call back into `self.connections` while its
        // own iterator still holds a shard lock.
        let snapshot: Vec<(String, ConnectionInfo)> = self
            .connections
            .iter()
            .map(|entry| {
                let info = entry.value().info.lock().clone();
                (Self::client_id(info.address), info)
            })
            .collect();

        for (client_id, info) in snapshot {
            let partner_name = info.chat_partner.and_then(|pid| self.get(pid)).and_then(|h| h.name());

            if let Some(partner_name) = &partner_name {
                chat_connections.insert(client_id.clone(), partner_name.clone());
            }

            clients_info.insert(
                client_id,
                ClientStats {
                    address: info.address.to_string(),
                    name: info.name.clone(),
                    connected_at: format!("{:?}", info.connected_at),
                    messages_sent: info.messages_sent,
                    messages_received: info.messages_received,
                    chat_partner: info.chat_partner.is_some(),
                    chat_partner_name: partner_name,
                    groups: {
                        let mut groups: Vec<String> = info.groups.iter().cloned().collect();
                        groups.sort();
                        groups
                    },
                },
            );
        }

        let mut groups = std::collections::HashMap::new();
        for entry in &self.groups {
            let mut names: Vec<String> = entry.value().iter().filter_map(|id| self.get(*id).and_then(|h| h.name())).collect();
            names.sort();
            groups.insert(entry.key().clone(), names);
        }

        Stats {
            connected_clients: self.connections.len(),
            total_messages,
            messages_received,
            messages_sent,
            clients_info,
            groups,
            chat_connections,
        }
    }
}
