//! Inbound update model.
//!
//! Updates are teloxide's. [`UpdateExt`] adds what routing needs: the chat
//! that owns the conversation and the text used for command and condition
//! matching.

use std::fmt;

use serde::{Deserialize, Serialize};
use teloxide::types::Chat;

pub use teloxide::types::{AllowedUpdate, Update, UpdateKind, User};

/// Conversation identity. For every routable update this is the chat id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub i64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait UpdateExt {
    fn update_id(&self) -> i64;

    /// Chat the update belongs to, if any.
    fn subject(&self) -> Option<SubjectId>;

    /// Message text (or caption), or callback data.
    fn text(&self) -> Option<&str>;

    fn kind_name(&self) -> &'static str;
}

impl UpdateExt for Update {
    fn update_id(&self) -> i64 {
        i64::from(self.id.0)
    }

    fn subject(&self) -> Option<SubjectId> {
        owning_chat(&self.kind).map(|chat| SubjectId(chat.id.0))
    }

    fn text(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::Message(message)
            | UpdateKind::EditedMessage(message)
            | UpdateKind::ChannelPost(message)
            | UpdateKind::EditedChannelPost(message) => message.text().or(message.caption()),
            UpdateKind::BusinessMessage(message) => message.text().or(message.caption()),
            UpdateKind::EditedBusinessMessage(message) => message.text().or(message.caption()),
            UpdateKind::CallbackQuery(query) => query.data.as_deref(),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match &self.kind {
            UpdateKind::Message(_) => "message",
            UpdateKind::EditedMessage(_) => "edited_message",
            UpdateKind::ChannelPost(_) => "channel_post",
            UpdateKind::EditedChannelPost(_) => "edited_channel_post",
            UpdateKind::BusinessMessage(_) => "business_message",
            UpdateKind::EditedBusinessMessage(_) => "edited_business_message",
            UpdateKind::DeletedBusinessMessages(_) => "deleted_business_messages",
            UpdateKind::CallbackQuery(_) => "callback_query",
            UpdateKind::MyChatMember(_) => "my_chat_member",
            UpdateKind::ChatMember(_) => "chat_member",
            UpdateKind::ChatJoinRequest(_) => "chat_join_request",
            UpdateKind::MessageReaction(_) => "message_reaction",
            UpdateKind::MessageReactionCount(_) => "message_reaction_count",
            UpdateKind::ChatBoost(_) => "chat_boost",
            UpdateKind::RemovedChatBoost(_) => "removed_chat_boost",
            UpdateKind::Error(_) => "unreadable",
            _ => "other",
        }
    }
}

/// Arms follow the resolution order: message kinds first, then callbacks,
/// then membership, reactions and boosts. A callback query resolves through
/// its attached message even when that message is no longer accessible;
/// an inline-mode callback has no chat.
fn owning_chat(kind: &UpdateKind) -> Option<&Chat> {
    match kind {
        UpdateKind::Message(message)
        | UpdateKind::EditedMessage(message)
        | UpdateKind::ChannelPost(message)
        | UpdateKind::EditedChannelPost(message) => Some(&message.chat),
        UpdateKind::BusinessMessage(message) => Some(&message.chat),
        UpdateKind::EditedBusinessMessage(message) => Some(&message.chat),
        UpdateKind::DeletedBusinessMessages(deleted) => Some(&deleted.chat),
        UpdateKind::CallbackQuery(query) => query.message.as_ref().map(|message| message.chat()),
        UpdateKind::MyChatMember(updated) | UpdateKind::ChatMember(updated) => Some(&updated.chat),
        UpdateKind::ChatJoinRequest(request) => Some(&request.chat),
        UpdateKind::MessageReaction(reaction) => Some(&reaction.chat),
        UpdateKind::MessageReactionCount(counts) => Some(&counts.chat),
        UpdateKind::ChatBoost(boost) => Some(&boost.chat),
        UpdateKind::RemovedChatBoost(removed) => Some(&removed.chat),
        _ => None,
    }
}
