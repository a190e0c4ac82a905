//! In-memory fakes for the core ports.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    dispatch::DispatchJob,
    domain::{
        ChannelLinkMapping, ChatDbId, ChatIdentity, ForwardRule, InboundEvent, MessageId,
        PlatformChatId,
    },
    errors::{Error, PlatformError, PlatformResult},
    ports::{
        ChannelEntity, ChatSummary, DispatchSet, DispatchSink, FullChannel, ParentRules,
        PlatformClient, RelationshipStore, RuleFilter, RuleRepository, WriteOutcome,
    },
    Result,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

// ============== Store ==============

#[derive(Default)]
struct State {
    next_id: i64,
    chats: Vec<ChatIdentity>,
    rules: Vec<ForwardRule>,
    mappings: HashMap<ChatDbId, ChannelLinkMapping>,
}

impl State {
    fn alloc(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn chat(&self, id: PlatformChatId) -> Option<&ChatIdentity> {
        self.chats.iter().find(|c| c.platform_chat_id == id)
    }

    fn ensure_chat(&mut self, id: PlatformChatId, name: Option<&str>) -> ChatIdentity {
        if let Some(existing) = self.chat(id) {
            return existing.clone();
        }
        let chat = ChatIdentity {
            id: ChatDbId(self.alloc()),
            platform_chat_id: id,
            name: name.map(str::to_string),
        };
        self.chats.push(chat.clone());
        chat
    }

    fn rules_for(&self, source: ChatDbId, filter: RuleFilter) -> Vec<ForwardRule> {
        self.rules
            .iter()
            .filter(|r| r.source_chat_id == source && filter.matches(r))
            .cloned()
            .collect()
    }
}

pub struct NewRule {
    source: PlatformChatId,
    target: PlatformChatId,
    enabled: bool,
    comments: bool,
}

impl NewRule {
    pub fn new(source: PlatformChatId, target: PlatformChatId) -> Self {
        Self {
            source,
            target,
            enabled: true,
            comments: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn comments(mut self) -> Self {
        self.comments = true;
        self
    }
}

/// Store fake with switches for failure and race injection.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_writes: AtomicBool,
    race_chat: AtomicBool,
    race_mapping: AtomicBool,
    conflicts: AtomicUsize,
    dispatch_reads: AtomicUsize,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_chat(&self, id: PlatformChatId, name: Option<&str>) -> ChatIdentity {
        self.lock().ensure_chat(id, name)
    }

    pub fn add_rule(&self, new: NewRule) -> ForwardRule {
        let mut state = self.lock();
        let source = state.ensure_chat(new.source, None);
        let target = state.ensure_chat(new.target, None);
        let rule = ForwardRule {
            id: state.alloc(),
            source_chat_id: source.id,
            source_platform_id: source.platform_chat_id,
            target_chat_id: target.id,
            target_platform_id: target.platform_chat_id,
            enabled: new.enabled,
            comment_forward_enabled: new.comments,
            comment_message_prefix: None,
            comment_context_enabled: false,
        };
        state.rules.push(rule.clone());
        rule
    }

    pub fn set_comment_forward(&self, rule_id: i64, on: bool) {
        let mut state = self.lock();
        if let Some(rule) = state.rules.iter_mut().find(|r| r.id == rule_id) {
            rule.comment_forward_enabled = on;
        }
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// The next chat insert loses a race against a concurrent writer.
    pub fn race_next_chat_insert(&self) {
        self.race_chat.store(true, Ordering::SeqCst);
    }

    /// The next mapping insert loses a race against a concurrent writer.
    pub fn race_next_mapping_insert(&self) {
        self.race_mapping.store(true, Ordering::SeqCst);
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    pub fn dispatch_reads(&self) -> usize {
        self.dispatch_reads.load(Ordering::SeqCst)
    }

    pub fn mapping_count(&self) -> usize {
        self.lock().mappings.len()
    }

    pub fn chat_count(&self, id: PlatformChatId) -> usize {
        self.lock()
            .chats
            .iter()
            .filter(|c| c.platform_chat_id == id)
            .count()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store("disk I/O error".to_string()));
        }
        Ok(())
    }

    fn conflict<T>(&self) -> Result<WriteOutcome<T>> {
        self.conflicts.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Conflict)
    }
}

#[async_trait]
impl RelationshipStore for MemoryStore {
    async fn chat_by_id(&self, id: ChatDbId) -> Result<Option<ChatIdentity>> {
        Ok(self.lock().chats.iter().find(|c| c.id == id).cloned())
    }

    async fn chat_by_platform_id(&self, id: PlatformChatId) -> Result<Option<ChatIdentity>> {
        Ok(self.lock().chat(id).cloned())
    }

    async fn insert_chat(
        &self,
        id: PlatformChatId,
        name: Option<&str>,
    ) -> Result<WriteOutcome<ChatIdentity>> {
        self.check_writable()?;
        tokio::task::yield_now().await;

        if self.race_chat.swap(false, Ordering::SeqCst) {
            self.lock().ensure_chat(id, name);
            return self.conflict();
        }

        let mut state = self.lock();
        if state.chat(id).is_some() {
            drop(state);
            return self.conflict();
        }
        Ok(WriteOutcome::Written(state.ensure_chat(id, name)))
    }

    async fn mapping_for_channel(&self, channel: ChatDbId) -> Result<Option<ChannelLinkMapping>> {
        Ok(self.lock().mappings.get(&channel).cloned())
    }

    async fn save_mapping(
        &self,
        mapping: &ChannelLinkMapping,
    ) -> Result<WriteOutcome<ChannelLinkMapping>> {
        self.check_writable()?;
        let channel = mapping.channel_chat_id;

        let updated = {
            let mut state = self.lock();
            match state.mappings.get_mut(&channel) {
                Some(existing) => {
                    *existing = mapping.clone();
                    true
                }
                None => false,
            }
        };
        if updated {
            return Ok(WriteOutcome::Written(mapping.clone()));
        }

        // Window between "row absent" and the insert, as in a SQL upsert.
        tokio::task::yield_now().await;

        if self.race_mapping.swap(false, Ordering::SeqCst) {
            self.lock().mappings.insert(
                channel,
                ChannelLinkMapping {
                    channel_chat_id: channel,
                    linked_chat_id: None,
                    last_checked: t0(),
                },
            );
            return self.conflict();
        }

        let mut state = self.lock();
        if state.mappings.contains_key(&channel) {
            drop(state);
            return self.conflict();
        }
        state.mappings.insert(channel, mapping.clone());
        Ok(WriteOutcome::Written(mapping.clone()))
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn rules_for_source(
        &self,
        source: ChatDbId,
        filter: RuleFilter,
    ) -> Result<Vec<ForwardRule>> {
        Ok(self.lock().rules_for(source, filter))
    }

    async fn dispatch_set(&self, chat: PlatformChatId) -> Result<Option<DispatchSet>> {
        self.dispatch_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        let Some(chat) = state.chat(chat).cloned() else {
            return Ok(None);
        };

        let direct = state.rules_for(chat.id, RuleFilter::enabled());
        let parent = state
            .mappings
            .values()
            .filter(|m| m.linked_chat_id == Some(chat.id))
            .max_by_key(|m| m.last_checked)
            .and_then(|m| state.chats.iter().find(|c| c.id == m.channel_chat_id))
            .map(|channel| ParentRules {
                channel: channel.clone(),
                rules: state.rules_for(channel.id, RuleFilter::comment_forwarding()),
            });

        Ok(Some(DispatchSet {
            chat,
            direct,
            parent,
        }))
    }
}

// ============== Platform ==============

/// Platform fake answering per channel from a response table.
#[derive(Default)]
pub struct FakePlatform {
    responses: Mutex<HashMap<PlatformChatId, PlatformResult<FullChannel>>>,
    yield_on_call: bool,
    calls: AtomicUsize,
}

impl FakePlatform {
    pub fn with_linked(self, channel: PlatformChatId, group: PlatformChatId, title: Option<&str>) -> Self {
        self.insert(
            channel,
            Ok(FullChannel {
                linked_chat_id: Some(group),
                chats: vec![ChatSummary {
                    id: group,
                    title: title.map(str::to_string),
                }],
            }),
        );
        self
    }

    pub fn with_unlinked(self, channel: PlatformChatId) -> Self {
        self.insert(channel, Ok(FullChannel::default()));
        self
    }

    pub fn with_error(self, channel: PlatformChatId, err: PlatformError) -> Self {
        self.insert(channel, Err(err));
        self
    }

    /// Suspend inside every full-channel call so concurrent callers interleave.
    pub fn yielding(mut self) -> Self {
        self.yield_on_call = true;
        self
    }

    pub fn set_response(&self, channel: PlatformChatId, linked: PlatformResult<Option<PlatformChatId>>) {
        self.insert(
            channel,
            linked.map(|linked_chat_id| FullChannel {
                linked_chat_id,
                chats: Vec::new(),
            }),
        );
    }

    pub fn full_channel_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn insert(&self, channel: PlatformChatId, response: PlatformResult<FullChannel>) {
        self.responses.lock().unwrap().insert(channel, response);
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_entity(&self, id: PlatformChatId) -> PlatformResult<ChannelEntity> {
        if !self.responses.lock().unwrap().contains_key(&id) {
            return Err(PlatformError::PrivateOrUnavailable(format!("no such chat {id}")));
        }
        Ok(ChannelEntity { id, title: None })
    }

    async fn get_full_channel(&self, entity: &ChannelEntity) -> PlatformResult<FullChannel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.yield_on_call {
            tokio::task::yield_now().await;
        }
        self.responses
            .lock()
            .unwrap()
            .get(&entity.id)
            .cloned()
            .unwrap_or_else(|| Err(PlatformError::Other("unexpected channel".to_string())))
    }
}

// ============== Sink ==============

#[derive(Default)]
pub struct RecordingSink {
    failing: HashSet<PlatformChatId>,
    delivered: Mutex<Vec<(MessageId, PlatformChatId)>>,
}

impl RecordingSink {
    pub fn failing_for(target: PlatformChatId) -> Self {
        Self {
            failing: HashSet::from([target]),
            ..Default::default()
        }
    }

    pub fn delivered(&self) -> Vec<(MessageId, PlatformChatId)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DispatchSink for RecordingSink {
    async fn dispatch(&self, event: &InboundEvent, job: &DispatchJob) -> Result<()> {
        let target = job.rule.target_platform_id;
        if self.failing.contains(&target) {
            return Err(Error::External(format!("chat {target} not found")));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((event.message_id, target));
        Ok(())
    }
}
