//! Rule resolution: which rules fire for an inbound message.
//!
//! A message fires the enabled rules whose source is its chat ("direct"), and,
//! when its chat is the linked discussion group of some channel, that
//! channel's enabled rules with comment forwarding on ("comment").

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    dedup::MediaGroupDedup,
    domain::{ForwardRule, InboundEvent, MessageId, PlatformChatId},
    links::LinkResolver,
    ports::{DispatchSink, RuleRepository},
};

/// One forward to perform for one inbound event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DispatchJob {
    pub rule: ForwardRule,
    pub is_comment: bool,
    /// Channel whose discussion group the event came from (comment jobs only).
    pub parent_channel_platform_id: Option<PlatformChatId>,
}

/// Decoration inputs for a comment job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentContext<'a> {
    pub parent_channel: PlatformChatId,
    pub prefix: &'a str,
    pub include_context_link: bool,
    pub original_message_id: Option<MessageId>,
}

impl DispatchJob {
    pub fn direct(rule: ForwardRule) -> Self {
        Self {
            rule,
            is_comment: false,
            parent_channel_platform_id: None,
        }
    }

    pub fn comment(rule: ForwardRule, parent: PlatformChatId) -> Self {
        Self {
            rule,
            is_comment: true,
            parent_channel_platform_id: Some(parent),
        }
    }

    pub fn comment_context<'a>(&'a self, event: &InboundEvent) -> Option<CommentContext<'a>> {
        if !self.is_comment {
            return None;
        }
        let parent_channel = self.parent_channel_platform_id?;
        Some(CommentContext {
            parent_channel,
            prefix: self.rule.comment_prefix(),
            include_context_link: self.rule.comment_context_enabled,
            original_message_id: event.reply_to_channel_post,
        })
    }
}

pub struct RuleEngine {
    rules: Arc<dyn RuleRepository>,
    links: Arc<LinkResolver>,
    dedup: MediaGroupDedup,
}

impl RuleEngine {
    pub fn new(rules: Arc<dyn RuleRepository>, links: Arc<LinkResolver>, dedup: MediaGroupDedup) -> Self {
        Self { rules, links, dedup }
    }

    /// Every rule that should fire for `event`, in no particular order.
    ///
    /// Never fails: an unknown chat, a store failure, or no matching rules all
    /// yield an empty list. Link refresh problems never suppress direct jobs.
    pub async fn resolve_dispatch(&self, event: &InboundEvent) -> Vec<DispatchJob> {
        let set = match self.rules.dispatch_set(event.chat_id).await {
            Ok(Some(set)) => set,
            Ok(None) => {
                debug!(chat = %event.chat_id, "chat is not registered, nothing to dispatch");
                return Vec::new();
            }
            Err(e) => {
                warn!(chat = %event.chat_id, error = %e, "failed to read rules");
                return Vec::new();
            }
        };

        // Warm the mapping so comments in the linked group match from the first one.
        if set.direct.iter().any(|r| r.comment_forward_enabled) {
            if let Err(e) = self.links.resolve(set.chat.id).await {
                warn!(chat = %event.chat_id, error = %e, "could not refresh linked discussion group");
            }
        }

        let mut jobs: Vec<DispatchJob> = set.direct.into_iter().map(DispatchJob::direct).collect();
        if !jobs.is_empty() {
            info!(chat = %event.chat_id, count = jobs.len(), "matched direct rules");
        }

        if let Some(parent) = set.parent {
            let channel = parent.channel.platform_chat_id;
            let before = jobs.len();
            jobs.extend(
                parent
                    .rules
                    .into_iter()
                    .map(|rule| DispatchJob::comment(rule, channel)),
            );
            if jobs.len() > before {
                info!(chat = %event.chat_id, %channel, count = jobs.len() - before, "matched comment rules");
            }
        }

        jobs
    }

    /// Dedup, resolve and hand each job to `sink`. Returns the number of jobs
    /// the sink accepted.
    pub async fn handle(&self, event: &InboundEvent, sink: &dyn DispatchSink) -> usize {
        if let Some(group_id) = event.media_group_id.as_deref() {
            if !self.dedup.try_mark(event.chat_id, group_id).await {
                debug!(chat = %event.chat_id, group_id, "media group already handled");
                return 0;
            }
        }

        let jobs = self.resolve_dispatch(event).await;
        let mut delivered = 0;
        for job in &jobs {
            match sink.dispatch(event, job).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    chat = %event.chat_id,
                    rule = job.rule.id,
                    target = %job.rule.target_platform_id,
                    source = ?event.source,
                    error = %e,
                    "dispatch failed"
                ),
            }
        }
        delivered
    }
}
