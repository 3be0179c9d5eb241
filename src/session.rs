//! Conversation State
//!
//! A [`Session`] owns named conversations, the cooldown deadline set by a
//! provider rate limit, and a handle to the process-wide token bucket.
//! Each conversation keeps its turns and render artifacts index-aligned:
//! the only way to add either is [`Conversation::push`], which adds both.

use crate::chart::Chart;
use crate::rate_limiter::TokenBucket;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

pub const GREETING: &str = "Hello! I am a SQL assistant. Ask me anything about the database.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Human,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    text: String,
}

impl Turn {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A file offered for download instead of an inline table
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// What the UI shows next to a turn. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct RenderArtifact {
    pub chart: Option<Chart>,
    pub table: Option<DataFrame>,
    pub download: Option<DownloadFile>,
}

impl RenderArtifact {
    pub fn is_empty(&self) -> bool {
        self.chart.is_none() && self.table.is_none() && self.download.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    name: String,
    turns: Vec<Turn>,
    artifacts: Vec<RenderArtifact>,
    last_sql_query: Option<String>,
}

impl Conversation {
    /// New conversation opening with the assistant greeting
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            turns: vec![Turn::assistant(GREETING)],
            artifacts: vec![RenderArtifact::default()],
            last_sql_query: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn artifacts(&self) -> &[RenderArtifact] {
        &self.artifacts
    }

    /// Append a turn and its artifact together
    pub fn push(&mut self, turn: Turn, artifact: RenderArtifact) {
        self.turns.push(turn);
        self.artifacts.push(artifact);
    }

    /// The last `limit` turns, oldest first
    pub fn recent_turns(&self, limit: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }

    pub fn last_sql_query(&self) -> Option<&str> {
        self.last_sql_query.as_deref()
    }

    pub fn set_last_sql_query(&mut self, sql: impl Into<String>) {
        self.last_sql_query = Some(sql.into());
    }
}

pub struct Session {
    id: Uuid,
    conversations: Vec<Conversation>,
    active: usize,
    bucket: Arc<TokenBucket>,
    cooldown_until: Option<DateTime<Utc>>,
    cooldown_notice_sent: bool,
}

impl Session {
    /// New session with "Conversation 1" active
    pub fn new(bucket: Arc<TokenBucket>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversations: vec![Conversation::new("Conversation 1")],
            active: 0,
            bucket,
            cooldown_until: None,
            cooldown_notice_sent: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }

    pub fn active(&self) -> &Conversation {
        &self.conversations[self.active]
    }

    pub fn active_mut(&mut self) -> &mut Conversation {
        &mut self.conversations[self.active]
    }

    pub fn conversation(&self, name: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.name == name)
    }

    pub fn conversation_names(&self) -> Vec<&str> {
        self.conversations.iter().map(|c| c.name.as_str()).collect()
    }

    /// Create "Conversation N" and make it active
    pub fn new_conversation(&mut self) -> &str {
        let mut n = self.conversations.len() + 1;
        while self.conversation(&format!("Conversation {}", n)).is_some() {
            n += 1;
        }
        let name = format!("Conversation {}", n);
        info!("{} created and selected", name);
        self.conversations.push(Conversation::new(name));
        self.active = self.conversations.len() - 1;
        self.conversations[self.active].name()
    }

    /// Activate a conversation by name; false when it does not exist
    pub fn switch_conversation(&mut self, name: &str) -> bool {
        match self.conversations.iter().position(|c| c.name == name) {
            Some(idx) => {
                self.active = idx;
                info!("Conversation selected: {}", name);
                true
            }
            None => false,
        }
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    pub fn start_cooldown(&mut self, now: DateTime<Utc>, wait: Duration) {
        let wait = chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::seconds(60));
        self.cooldown_until = Some(now + wait);
        self.cooldown_notice_sent = false;
    }

    /// True the first time it is called for the current cooldown
    pub fn claim_cooldown_notice(&mut self) -> bool {
        !std::mem::replace(&mut self.cooldown_notice_sent, true)
    }

    /// Time left on the cooldown; clears it once expired
    pub fn cooldown_remaining(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.cooldown_until?;
        if now < until {
            (until - now).to_std().ok()
        } else {
            info!("Cooldown period ended");
            self.cooldown_until = None;
            None
        }
    }
}

/// In-memory sessions keyed by id, all sharing one token bucket
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<Mutex<Session>>>,
    bucket: Arc<TokenBucket>,
}

impl SessionStore {
    pub fn new(tokens_per_minute: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            bucket: Arc::new(TokenBucket::new(tokens_per_minute)),
        }
    }

    pub fn create(&self) -> (Uuid, Arc<Mutex<Session>>) {
        let session = Session::new(Arc::clone(&self.bucket));
        let id = session.id();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(id, Arc::clone(&handle));
        info!("🆕 Session {} created", id);
        (id, handle)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
