//! Wire verb parsing: a frame (already split off a newline and trimmed) to a
//! typed [`Command`].
//!
//! Framing (bytes -> frame) lives in `chat-server`'s codec, one layer below
//! this; this module only ever sees a `&str` with no trailing `\r`/`\n`, so
//! it can be unit tested with no socket involved.

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ListUsers,
    ListGroups,
    CreateGroup(String),
    JoinGroup(String),
    /// `INVITE_TO_GROUP:<group>:<user>`, already split on the first colon
    /// after the prefix. `None` when the shape didn't contain that colon.
    InviteToGroup(Option<(String, String)>),
    LeaveGroup(String),
    /// `GROUP:<group>:<message>`, `None` when the shape didn't contain that colon.
    GroupMessage(Option<(String, String)>),
    Connect(String),
    DisconnectChat,
    /// Anything that doesn't match a known verb: forwarded if paired, echoed otherwise.
    Freeform(String),
}

/// Parses one frame into a [`Command`].
///
/// Dispatch is prefix-first rather than a chain of `==`/`starts_with` checks,
/// per the design note that overlapping prefixes (`GROUP:` vs. the
/// server-to-client-only `GROUP_UPDATED:`) are an ordering hazard otherwise.
/// The table is checked in order; the first matching entry wins, and
/// `GROUP:` is listed ahead of nothing that could collide with it because
/// `GROUP_UPDATED` is never parsed as client input (the server never reads
/// back what it emits).
#[must_use]
pub fn parse(line: &str) -> Command {
    const TABLE: &[(&str, fn(&str) -> Command)] = &[
        ("CREATE_GROUP:", |rest| Command::CreateGroup(rest.trim().to_string())),
        ("JOIN_GROUP:", |rest| Command::JoinGroup(rest.trim().to_string())),
        ("INVITE_TO_GROUP:", |rest| Command::InviteToGroup(split_first_colon(rest))),
        ("LEAVE_GROUP:", |rest| Command::LeaveGroup(rest.trim().to_string())),
        ("GROUP:", |rest| Command::GroupMessage(split_first_colon(rest))),
        ("CONNECT:", |rest| Command::Connect(rest.trim().to_string())),
    ];

    if line == "LIST_USERS" {
        return Command::ListUsers;
    }
    if line == "LIST_GROUPS" {
        return Command::ListGroups;
    }
    if line == "DISCONNECT_CHAT" {
        return Command::DisconnectChat;
    }

    for (prefix, parser) in TABLE {
        if let Some(rest) = line.strip_prefix(prefix) {
            return parser(rest);
        }
    }

    Command::Freeform(line.to_string())
}

/// Splits `rest` on the first `:`, trimming both halves. `None` if there's no colon.
fn split_first_colon(rest: &str) -> Option<(String, String)> {
    let (left, right) = rest.split_once(':')?;
    Some((left.trim().to_string(), right.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_administrative_queries() {
        assert_eq!(parse("LIST_USERS"), Command::ListUsers);
        assert_eq!(parse("LIST_GROUPS"), Command::ListGroups);
        assert_eq!(parse("DISCONNECT_CHAT"), Command::DisconnectChat);
    }

    #[test]
    fn parses_create_join_leave_group() {
        assert_eq!(parse("CREATE_GROUP:room"), Command::CreateGroup("room".into()));
        assert_eq!(parse("JOIN_GROUP:room"), Command::JoinGroup("room".into()));
        assert_eq!(parse("LEAVE_GROUP:room"), Command::LeaveGroup("room".into()));
    }

    #[test]
    fn parses_group_message_splitting_on_first_colon_only() {
        assert_eq!(
            parse("GROUP:room:hi:there"),
            Command::GroupMessage(Some(("room".into(), "hi:there".into())))
        );
    }

    #[test]
    fn parses_invite_to_group() {
        assert_eq!(
            parse("INVITE_TO_GROUP:room:Bob"),
            Command::InviteToGroup(Some(("room".into(), "Bob".into())))
        );
    }

    #[test]
    fn rejects_malformed_group_and_invite_shapes() {
        assert_eq!(parse("GROUP:onlygroup"), Command::GroupMessage(None));
        assert_eq!(parse("INVITE_TO_GROUP:onlygroup"), Command::InviteToGroup(None));
    }

    #[test]
    fn parses_connect() {
        assert_eq!(parse("CONNECT:Bob"), Command::Connect("Bob".into()));
    }

    #[test]
    fn unrecognized_verb_is_freeform() {
        assert_eq!(parse("hello there"), Command::Freeform("hello there".into()));
        // GROUP_UPDATED is server-to-client only; if a client sends it back
        // it must not be misparsed as a GROUP: message.
        assert_eq!(parse("GROUP_UPDATED: something"), Command::Freeform("GROUP_UPDATED: something".into()));
    }
}
