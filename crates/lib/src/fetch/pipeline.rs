//! Hierarchy walk: users → phone numbers → conversations (→ messages) and calls (→ transcripts).
//!
//! Every API call goes through the retry tracker. A task that gives up is written to the
//! failure ledger with the cursor it stopped at, and the walk carries on with its siblings.

use crate::api::{ApiClient, ApiError};
use crate::fetch::{FetchKind, FetchTask, Page, Paginator, RetryPolicy, RetryTracker, TaskError, TaskState};
use crate::ledger::{FailureLedger, FailureRecord};
use crate::model::{
    parse_record, parse_transcript, ApiRecord, Call, Conversation, EntityNode, Message, Parsed,
    PhoneNumber, User,
};
use std::collections::HashSet;

/// Errors that stop a walk instead of landing in the ledger.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The user listing was refused with 401/403; every other call would be refused too.
    #[error("API key rejected while listing users")]
    KeyRejected(#[source] ApiError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

pub struct Pipeline<'a> {
    client: &'a dyn ApiClient,
    policy: &'a RetryPolicy,
    ledger: &'a mut FailureLedger,
    rejected: Option<ApiError>,
}

impl<'a> Pipeline<'a> {
    pub fn new(client: &'a dyn ApiClient, policy: &'a RetryPolicy, ledger: &'a mut FailureLedger) -> Self {
        Self {
            client,
            policy,
            ledger,
            rejected: None,
        }
    }

    /// Walk the whole account. `max_users` stops the user listing early.
    pub async fn run(&mut self, max_users: Option<usize>) -> Result<Vec<EntityNode>, PipelineError> {
        let users = self.list::<User>(FetchTask::users(), max_users).await;
        self.check_key()?;
        log::info!("found {} user(s)", users.len());
        Ok(self.walk_users(users).await)
    }

    /// Reissue one task read back from a ledger and walk whatever hangs below it.
    /// A single-page task fetches just that page and returns its items without children.
    pub async fn resume(&mut self, task: &FetchTask) -> Result<Vec<EntityNode>, PipelineError> {
        task.validate()?;
        log::info!("retrying {}", task.describe());
        let call_id = task.params.call_id.as_deref().unwrap_or_default();
        if task.single_page {
            let nodes = match task.kind {
                FetchKind::Users => self.one_page::<User>(task).await,
                FetchKind::PhoneNumbers => self.one_page::<PhoneNumber>(task).await,
                FetchKind::Conversations => self.one_page::<Conversation>(task).await,
                FetchKind::Calls => self.one_page::<Call>(task).await,
                FetchKind::Messages => self.one_page::<Message>(task).await,
                FetchKind::Transcript => self.fetch_transcript(call_id).await.into_iter().collect(),
            };
            self.check_key()?;
            return Ok(nodes);
        }
        let pn_id = task.params.phone_number_id.clone().unwrap_or_default();
        let nodes = match task.kind {
            FetchKind::Users => {
                let users = self.list::<User>(task.clone(), None).await;
                self.check_key()?;
                self.walk_users(users).await
            }
            FetchKind::PhoneNumbers => {
                let numbers = self.list::<PhoneNumber>(task.clone(), None).await;
                let mut out = Vec::with_capacity(numbers.len());
                for pn in numbers {
                    out.push(self.walk_phone_number(pn).await);
                }
                out
            }
            FetchKind::Conversations => self.conversations_and_calls(task.clone(), &pn_id).await,
            FetchKind::Calls => self.walk_calls(task.clone(), &mut HashSet::new()).await,
            FetchKind::Messages => self
                .list::<Message>(task.clone(), None)
                .await
                .into_iter()
                .map(|m| m.node)
                .collect(),
            FetchKind::Transcript => self.fetch_transcript(call_id).await.into_iter().collect(),
        };
        Ok(nodes)
    }

    fn check_key(&mut self) -> Result<(), PipelineError> {
        match self.rejected.take() {
            Some(e) => Err(PipelineError::KeyRejected(e)),
            None => Ok(()),
        }
    }

    async fn walk_users(&mut self, users: Vec<Parsed<User>>) -> Vec<EntityNode> {
        let total = users.len();
        let mut out = Vec::with_capacity(total);
        for (i, user) in users.into_iter().enumerate() {
            log::info!(
                "[{}/{}] user {} ({})",
                i + 1,
                total,
                user.record.display_name(),
                user.record.id
            );
            out.push(self.walk_user(user).await);
        }
        out
    }

    async fn walk_user(&mut self, user: Parsed<User>) -> EntityNode {
        let mut node = user.node;
        let numbers = self
            .list::<PhoneNumber>(FetchTask::phone_numbers(&user.record.id), None)
            .await;
        for pn in numbers {
            let child = self.walk_phone_number(pn).await;
            node.push_child(child);
        }
        node
    }

    async fn walk_phone_number(&mut self, pn: Parsed<PhoneNumber>) -> EntityNode {
        let mut node = pn.node;
        log::debug!(
            "phone number {} ({}) owned by {}",
            pn.record.id,
            pn.record.number.as_deref().unwrap_or("no number"),
            pn.record.owner().unwrap_or("requesting user")
        );
        let task = FetchTask::conversations(&pn.record.id, pn.record.number.as_deref());
        let children = self.conversations_and_calls(task, &pn.record.id).await;
        node.extend_children(children);
        node
    }

    /// Conversations (with their messages) followed by the calls with every participant seen.
    async fn conversations_and_calls(&mut self, task: FetchTask, pn_id: &str) -> Vec<EntityNode> {
        let conversations = self.list::<Conversation>(task, None).await;
        let mut participants: Vec<String> = Vec::new();
        let mut out = Vec::with_capacity(conversations.len());
        for conv in conversations {
            for p in &conv.record.participants {
                if !participants.contains(p) {
                    participants.push(p.clone());
                }
            }
            out.push(self.walk_conversation(pn_id, conv).await);
        }
        let mut seen = HashSet::new();
        for participant in &participants {
            let calls = self
                .walk_calls(FetchTask::calls(pn_id, participant), &mut seen)
                .await;
            out.extend(calls);
        }
        out
    }

    async fn walk_conversation(&mut self, pn_id: &str, conv: Parsed<Conversation>) -> EntityNode {
        let mut node = conv.node;
        if conv.record.participants.is_empty() {
            log::info!("conversation {} has no participants; skipping messages", conv.record.id);
            return node;
        }
        let task = FetchTask::messages(pn_id, &conv.record.id, &conv.record.participants);
        let messages = self.list::<Message>(task, None).await;
        node.extend_children(messages.into_iter().map(|m| m.node));
        node
    }

    /// Calls from one listing, skipping ids already in `seen`, each with its transcript.
    async fn walk_calls(&mut self, task: FetchTask, seen: &mut HashSet<String>) -> Vec<EntityNode> {
        let calls = self.list::<Call>(task, None).await;
        let mut out = Vec::new();
        for call in calls {
            if !seen.insert(call.record.id.clone()) {
                continue;
            }
            let mut node = call.node;
            if let Some(transcript) = self.fetch_transcript(&call.record.id).await {
                node.push_child(transcript);
            }
            out.push(node);
        }
        out
    }

    /// Transcript for one call. A 404 means the call has none and is not a failure.
    async fn fetch_transcript(&mut self, call_id: &str) -> Option<EntityNode> {
        let task = FetchTask::transcript(call_id);
        let path = task.path();
        let mut tracker = RetryTracker::new(self.policy);
        loop {
            match self.client.get(&path, &[]).await {
                Ok(body) => {
                    tracker.succeeded();
                    return match parse_transcript(call_id, body) {
                        Ok(node) => node,
                        Err(e) => {
                            log::warn!("{}: {}", task.describe(), e);
                            let attempts = tracker.attempts();
                            self.ledger
                                .record(FailureRecord::new(task, e.to_string(), attempts, true));
                            None
                        }
                    };
                }
                Err(e) if e.is_not_found() => {
                    log::debug!("call {} has no transcript", call_id);
                    return None;
                }
                Err(e) => match tracker.failed(&e) {
                    Some(delay) => {
                        log::warn!(
                            "{} attempt {} failed: {}; retrying in {:?}",
                            task.describe(),
                            tracker.attempts() - 1,
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        self.give_up(task, &e, &tracker);
                        return None;
                    }
                },
            }
        }
    }

    /// Every valid record of a listing, up to `limit`.
    async fn list<T: ApiRecord>(&mut self, task: FetchTask, limit: Option<usize>) -> Vec<Parsed<T>> {
        let mut pager = Paginator::for_task(self.client, &task);
        let mut out = Vec::new();
        let reached = |n: usize| limit.is_some_and(|l| n >= l);
        if reached(0) {
            return out;
        }
        while let Some(page) = self.next_page(&mut pager, &task).await {
            let room = limit.map(|l| l.saturating_sub(out.len()));
            out.extend(self.parse_page::<T>(&task, page, room));
            if reached(out.len()) {
                log::info!("{}: stopping at limit of {}", task.kind, out.len());
                break;
            }
        }
        out
    }

    /// Only the page at the task's cursor, as bare nodes.
    async fn one_page<T: ApiRecord>(&mut self, task: &FetchTask) -> Vec<EntityNode> {
        let mut pager = Paginator::for_task(self.client, task);
        match self.next_page(&mut pager, task).await {
            Some(page) => self
                .parse_page::<T>(task, page, None)
                .into_iter()
                .map(|p| p.node)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Valid records of one page, at most `room` of them. Malformed items are dropped and
    /// the page is recorded once as a permanent single-page failure.
    fn parse_page<T: ApiRecord>(
        &mut self,
        task: &FetchTask,
        page: Page,
        room: Option<usize>,
    ) -> Vec<Parsed<T>> {
        let mut out = Vec::new();
        let mut malformed = Vec::new();
        for raw in page.items {
            if room.is_some_and(|r| out.len() >= r) {
                break;
            }
            match parse_record::<T>(raw) {
                Ok(parsed) => out.push(parsed),
                Err(e) => malformed.push(e),
            }
        }
        if let Some(first) = malformed.first() {
            let failed = task.clone().with_cursor(page.cursor).as_single_page();
            log::warn!(
                "{}: dropped {} malformed item(s): {}",
                failed.describe(),
                malformed.len(),
                first
            );
            let error = format!("{} malformed item(s): {}", malformed.len(), first);
            self.ledger.record(FailureRecord::new(failed, error, 1, true));
        }
        out
    }

    /// Next page with retries. None when the listing is exhausted or the page gave up.
    async fn next_page(&mut self, pager: &mut Paginator<'_>, task: &FetchTask) -> Option<Page> {
        let mut tracker = RetryTracker::new(self.policy);
        loop {
            match pager.next_page().await? {
                Ok(page) => {
                    tracker.succeeded();
                    return Some(page);
                }
                Err(e) => match tracker.failed(&e.source) {
                    Some(delay) => {
                        log::warn!(
                            "{}: {}; retry {} in {:?}",
                            task.describe(),
                            e,
                            tracker.attempts() - 1,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None if task.kind == FetchKind::Users && e.source.is_auth_rejected() => {
                        log::error!("{}: {}", task.describe(), e);
                        self.rejected = Some(e.source);
                        return None;
                    }
                    None => {
                        self.give_up(task.clone().with_cursor(e.cursor), &e.source, &tracker);
                        return None;
                    }
                },
            }
        }
    }

    fn give_up(&mut self, task: FetchTask, err: &ApiError, tracker: &RetryTracker<'_>) {
        let permanent = tracker.state() == TaskState::FailedPermanent;
        log::error!(
            "{} failed after {} attempt(s){}: {}",
            task.describe(),
            tracker.attempts(),
            if permanent { "" } else { ", retries exhausted" },
            err
        );
        self.ledger.record(FailureRecord::new(
            task,
            err.to_string(),
            tracker.attempts(),
            permanent,
        ));
    }
}
