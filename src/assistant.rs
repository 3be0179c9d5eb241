//! Query-orchestration pipeline
//!
//! One call to [`Assistant::handle_user_turn`] takes an utterance through
//! classification, SQL generation, execution and reply composition, and
//! records both sides of the exchange in the session's active conversation.
//!
//! ```text
//! utterance ─► classify ─┬─ follow-up ─► re-run last SQL ─► chart
//!                        └─ new query ─► SQL prompt ─► LLM ─► extract ─► execute ─► compose
//! ```

use crate::chart::ChartTypeResolver;
use crate::classifier::{RequestClassifier, RequestKind};
use crate::composer::{Reply, ResponseComposer};
use crate::config::AssistantConfig;
use crate::db::SqlExecutor;
use crate::error::{ChatError, Result};
use crate::llm::{translate_llm_error, LanguageModel};
use crate::prompt::{build_sql_prompt, estimate_tokens, extract_sql, inline_view_definition};
use crate::rate_limiter::throttled;
use crate::schema::{inspect_view, ColumnCatalog, SchemaDescription, SchemaInspector, ViewDefinition};
use crate::session::{RenderArtifact, Session, Turn};
use chrono::{Datelike, Local, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, info_span, warn, Instrument};

pub const NOTHING_TO_VISUALIZE: &str =
    "There is no previous query to visualize. Please ask a question first.";

pub struct Assistant {
    llm: Arc<dyn LanguageModel>,
    executor: Arc<dyn SqlExecutor>,
    inspector: Arc<dyn SchemaInspector>,
    catalog: ColumnCatalog,
    view: ViewDefinition,
    schema: OnceCell<SchemaDescription>,
    classifier: RequestClassifier,
    composer: ResponseComposer,
    history_limit: usize,
    currency: String,
}

impl Assistant {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        executor: Arc<dyn SqlExecutor>,
        inspector: Arc<dyn SchemaInspector>,
        catalog: ColumnCatalog,
        view: ViewDefinition,
        config: &AssistantConfig,
        currency: impl Into<String>,
    ) -> Result<Self> {
        let resolver = ChartTypeResolver::new(config.chart_match_threshold);
        let classifier = RequestClassifier::new(&resolver)?;
        Ok(Self {
            llm,
            executor,
            inspector,
            catalog,
            view,
            schema: OnceCell::new(),
            classifier,
            composer: ResponseComposer::new(config.composer.clone(), resolver),
            history_limit: config.history_limit,
            currency: currency.into(),
        })
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Answer one user utterance in the session's active conversation
    pub async fn handle_user_turn(&self, session: &mut Session, utterance: &str) -> Reply {
        let span = info_span!(
            "turn",
            session = %session.id(),
            conversation = %session.active().name()
        );
        self.turn(session, utterance).instrument(span).await
    }

    async fn turn(&self, session: &mut Session, utterance: &str) -> Reply {
        if let Some(remaining) = session.cooldown_remaining(Utc::now()) {
            let message = ChatError::RateLimited { wait: remaining }.user_message();
            if session.claim_cooldown_notice() {
                info!("Rate limit active, notice added to the conversation");
                session
                    .active_mut()
                    .push(Turn::assistant(message.clone()), RenderArtifact::default());
            }
            return Reply::text(message);
        }

        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Reply::default();
        }

        info!("Question received: {}", utterance);
        let history = session.active().recent_turns(self.history_limit).to_vec();
        session
            .active_mut()
            .push(Turn::human(utterance), RenderArtifact::default());

        let reply = match self.answer(session, utterance, &history).await {
            Ok(reply) => reply,
            Err(e) => {
                if let ChatError::RateLimited { wait } = &e {
                    warn!("Rate limit exceeded, cooling down for {}s", wait.as_secs());
                    session.start_cooldown(Utc::now(), *wait);
                } else {
                    error!("Turn failed: {}", e);
                }
                Reply::text(e.user_message())
            }
        };

        session
            .active_mut()
            .push(Turn::assistant(reply.text.clone()), reply.artifact());
        reply
    }

    async fn answer(&self, session: &mut Session, utterance: &str, history: &[Turn]) -> Result<Reply> {
        match self.classifier.classify(utterance) {
            RequestKind::VisualizeFollowUp { phrase } => self.visualize_previous(session, &phrase).await,
            RequestKind::NewQuery => self.new_query(session, utterance, history).await,
        }
    }

    async fn visualize_previous(&self, session: &Session, phrase: &str) -> Result<Reply> {
        let sql = match session.active().last_sql_query() {
            Some(sql) => sql.to_string(),
            None => {
                info!("Visualization requested without a previous query");
                return Ok(Reply::text(NOTHING_TO_VISUALIZE));
            }
        };

        let frame = self.executor.run(&sql).await?;
        self.composer.compose_visualization(phrase, &frame, &self.currency)
    }

    async fn schema(&self) -> &SchemaDescription {
        self.schema
            .get_or_init(|| inspect_view(self.inspector.as_ref(), &self.catalog, &self.view))
            .await
    }

    async fn new_query(&self, session: &mut Session, utterance: &str, history: &[Turn]) -> Result<Reply> {
        let schema = self.schema().await;
        let prompt = build_sql_prompt(
            utterance,
            schema,
            &self.currency,
            Local::now().year(),
            history,
        );

        let bucket = Arc::clone(session.bucket());
        let tokens = estimate_tokens(&prompt) + self.composer.policy().reserved_response_tokens;
        let tokens = u32::try_from(tokens).unwrap_or(u32::MAX);
        let raw = throttled(&bucket, tokens, || self.llm.invoke(&prompt))
            .await
            .map_err(translate_llm_error)?;

        let extraction = extract_sql(&raw)?;
        info!(
            "Extracted SQL: {} (chart required: {}, chart type: {:?})",
            extraction.sql, extraction.chart_required, extraction.chart_type
        );

        let sql = inline_view_definition(&extraction.sql, &self.view)?;
        session.active_mut().set_last_sql_query(sql.clone());

        let frame = self.executor.run(&sql).await?;
        self.composer
            .compose(
                self.llm.as_ref(),
                &bucket,
                utterance,
                &extraction.sql,
                &frame,
                &extraction,
                &self.currency,
            )
            .await
    }
}
