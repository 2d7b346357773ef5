//! Scripted provider mocks
//!
//! Each mock counts calls per operation and can be told to fail the next N
//! calls of an operation with a chosen [`ProviderError`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mailpilot_core::{CalendarProvider, Clock, CompletionService, MailProvider};
use mailpilot_domain::{
    ConnectedMailbox, EventDraft, FreeBusyQuery, HistoryPage, HistoryRecord, IntentParse,
    OutgoingReply, PromptVariant, ProviderError, ProviderResult, RawMessage, ReplyRequest,
    SendReceipt, TimeWindow, WatchRegistration,
};

/// Call counters and one-shot failure queues keyed by operation name.
#[derive(Default)]
pub struct Script {
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, VecDeque<ProviderError>>>,
}

impl Script {
    pub fn fail_next(&self, operation: &'static str, error: ProviderError) {
        self.failures.lock().unwrap().entry(operation).or_default().push_back(error);
    }

    pub fn fail_times(&self, operation: &'static str, error: ProviderError, times: usize) {
        for _ in 0..times {
            self.fail_next(operation, error.clone());
        }
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn enter(&self, operation: &'static str) -> ProviderResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        match self.failures.lock().unwrap().get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Mailbox history and message store served by [`ScriptedMail`].
pub struct ScriptedMail {
    pub script: Script,
    clock: Arc<dyn Clock>,
    messages: Mutex<HashMap<String, RawMessage>>,
    history: Mutex<Vec<HistoryRecord>>,
    page_size: Mutex<usize>,
    current_history_id: Mutex<u64>,
    recent: Mutex<Vec<String>>,
    delivered: Mutex<Vec<OutgoingReply>>,
    /// Deliver the reply but report a transient failure, as a lost response would.
    drop_send_ack: Mutex<bool>,
    watch_ttl: Duration,
    next_watch_history: Mutex<u64>,
}

impl ScriptedMail {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            script: Script::default(),
            clock,
            messages: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            page_size: Mutex::new(100),
            current_history_id: Mutex::new(0),
            recent: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            drop_send_ack: Mutex::new(false),
            watch_ttl: Duration::days(7),
            next_watch_history: Mutex::new(100),
        }
    }

    pub fn add_message(&self, message: RawMessage) {
        self.recent.lock().unwrap().insert(0, message.id.clone());
        self.messages.lock().unwrap().insert(message.id.clone(), message);
    }

    pub fn add_history(&self, history_id: u64, message_ids: &[&str]) {
        self.history.lock().unwrap().push(HistoryRecord {
            history_id,
            added_message_ids: message_ids.iter().map(ToString::to_string).collect(),
        });
        let mut current = self.current_history_id.lock().unwrap();
        *current = (*current).max(history_id);
    }

    pub fn set_page_size(&self, size: usize) {
        *self.page_size.lock().unwrap() = size.max(1);
    }

    pub fn set_current_history_id(&self, history_id: u64) {
        *self.current_history_id.lock().unwrap() = history_id;
    }

    pub fn set_watch_history_id(&self, history_id: u64) {
        *self.next_watch_history.lock().unwrap() = history_id;
    }

    pub fn drop_next_send_ack(&self) {
        *self.drop_send_ack.lock().unwrap() = true;
    }

    pub fn delivered(&self) -> Vec<OutgoingReply> {
        self.delivered.lock().unwrap().clone()
    }

    fn receipt_for(reply: &OutgoingReply, index: usize, sent_at: DateTime<Utc>) -> SendReceipt {
        SendReceipt {
            provider_message_id: format!("sent-{index}"),
            thread_id: Some(reply.thread_id.clone()),
            sent_at,
        }
    }
}

#[async_trait]
impl MailProvider for ScriptedMail {
    async fn fetch_message(&self, _mailbox: &ConnectedMailbox, message_id: &str) -> ProviderResult<RawMessage> {
        self.script.enter("fetch_message")?;
        self.messages
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("message {message_id}")))
    }

    async fn list_history_since(
        &self,
        _mailbox: &ConnectedMailbox,
        start_history_id: u64,
        page_token: Option<&str>,
    ) -> ProviderResult<HistoryPage> {
        self.script.enter("list_history_since")?;
        let page_size = *self.page_size.lock().unwrap();
        let offset: usize = page_token.map_or(0, |token| token.parse().unwrap());
        let mut records: Vec<HistoryRecord> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.history_id > start_history_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.history_id);
        let next = offset + page_size;
        let next_page_token = (next < records.len()).then(|| next.to_string());
        let records = records.into_iter().skip(offset).take(page_size).collect();
        Ok(HistoryPage { records, next_page_token })
    }

    async fn send_reply(&self, _mailbox: &ConnectedMailbox, reply: &OutgoingReply) -> ProviderResult<SendReceipt> {
        self.script.enter("send_reply")?;
        let mut delivered = self.delivered.lock().unwrap();
        delivered.push(reply.clone());
        let receipt = Self::receipt_for(reply, delivered.len(), self.clock.now());
        let mut drop_ack = self.drop_send_ack.lock().unwrap();
        if *drop_ack {
            *drop_ack = false;
            return Err(ProviderError::Transient("connection reset after write".into()));
        }
        Ok(receipt)
    }

    async fn find_sent_reply(
        &self,
        _mailbox: &ConnectedMailbox,
        rfc822_message_id: &str,
    ) -> ProviderResult<Option<SendReceipt>> {
        self.script.enter("find_sent_reply")?;
        let delivered = self.delivered.lock().unwrap();
        Ok(delivered
            .iter()
            .enumerate()
            .find(|(_, reply)| reply.rfc822_message_id == rfc822_message_id)
            .map(|(index, reply)| Self::receipt_for(reply, index + 1, self.clock.now())))
    }

    async fn start_watch(&self, mailbox: &ConnectedMailbox) -> ProviderResult<WatchRegistration> {
        self.script.enter("start_watch")?;
        Ok(WatchRegistration {
            resource_id: format!("watch-{}", mailbox.mailbox_id),
            history_id: *self.next_watch_history.lock().unwrap(),
            expires_at: self.clock.now() + self.watch_ttl,
        })
    }

    async fn stop_watch(&self, _mailbox: &ConnectedMailbox) -> ProviderResult<()> {
        self.script.enter("stop_watch")
    }

    async fn current_history_id(&self, _mailbox: &ConnectedMailbox) -> ProviderResult<u64> {
        self.script.enter("current_history_id")?;
        Ok(*self.current_history_id.lock().unwrap())
    }

    async fn list_recent_message_ids(&self, _mailbox: &ConnectedMailbox, limit: usize) -> ProviderResult<Vec<String>> {
        self.script.enter("list_recent_message_ids")?;
        Ok(self.recent.lock().unwrap().iter().take(limit).cloned().collect())
    }
}

/// Calendar with a fixed busy list; records created events.
pub struct ScriptedCalendar {
    pub script: Script,
    busy: Mutex<Vec<TimeWindow>>,
    queries: Mutex<Vec<FreeBusyQuery>>,
    events: Mutex<Vec<EventDraft>>,
}

impl Default for ScriptedCalendar {
    fn default() -> Self {
        Self {
            script: Script::default(),
            busy: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedCalendar {
    pub fn set_busy(&self, busy: Vec<TimeWindow>) {
        *self.busy.lock().unwrap() = busy;
    }

    pub fn queries(&self) -> Vec<FreeBusyQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<EventDraft> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarProvider for ScriptedCalendar {
    async fn query_free_busy(&self, _mailbox: &ConnectedMailbox, query: &FreeBusyQuery) -> ProviderResult<Vec<TimeWindow>> {
        self.script.enter("query_free_busy")?;
        self.queries.lock().unwrap().push(query.clone());
        Ok(self.busy.lock().unwrap().clone())
    }

    async fn create_event(&self, _mailbox: &ConnectedMailbox, event: &EventDraft) -> ProviderResult<String> {
        self.script.enter("create_event")?;
        self.events.lock().unwrap().push(event.clone());
        Ok(event.event_id.clone())
    }
}

/// Model stub answering intents from a queue and drafting a fixed template.
pub struct ScriptedCompletion {
    pub script: Script,
    intents: Mutex<VecDeque<IntentParse>>,
    fallback: Mutex<Option<IntentParse>>,
    variants: Mutex<Vec<PromptVariant>>,
    requests: Mutex<Vec<ReplyRequest>>,
    reply_template: Mutex<String>,
}

impl ScriptedCompletion {
    pub fn new(fallback: IntentParse) -> Self {
        Self {
            script: Script::default(),
            intents: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Some(fallback)),
            variants: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            reply_template: Mutex::new("Hi,\n\nThanks for reaching out. {{TIMES}}\n\nBest,\nAssistant".to_string()),
        }
    }

    /// Queue a one-off answer served before the fallback.
    pub fn push_intent(&self, parse: IntentParse) {
        self.intents.lock().unwrap().push_back(parse);
    }

    pub fn set_fallback(&self, parse: IntentParse) {
        *self.fallback.lock().unwrap() = Some(parse);
    }

    pub fn set_reply_template(&self, template: &str) {
        *self.reply_template.lock().unwrap() = template.to_string();
    }

    pub fn variants(&self) -> Vec<PromptVariant> {
        self.variants.lock().unwrap().clone()
    }

    pub fn reply_requests(&self) -> Vec<ReplyRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn parse_intent(
        &self,
        _message: &RawMessage,
        variant: PromptVariant,
        _reference_time: DateTime<Utc>,
        _default_timezone: &str,
    ) -> ProviderResult<IntentParse> {
        self.script.enter("parse_intent")?;
        self.variants.lock().unwrap().push(variant);
        if let Some(parse) = self.intents.lock().unwrap().pop_front() {
            return Ok(parse);
        }
        self.fallback
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::Malformed("no scripted intent".into()))
    }

    async fn generate_reply(&self, request: &ReplyRequest) -> ProviderResult<String> {
        self.script.enter("generate_reply")?;
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.reply_template.lock().unwrap().clone())
    }
}
