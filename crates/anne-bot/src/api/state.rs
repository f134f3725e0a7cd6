//! Application state shared across handlers.

use std::sync::Arc;

use crate::agent::prompts::ANNE_INSTRUCTIONS;
use crate::agent::{LanguageModel, PersonaAgent};
use crate::db::Database;
use crate::memory::{AgentMemory, SqliteMemory};
use crate::pipeline::ImageAnalysisPipeline;
use crate::threads::{ThreadRepository, ThreadService};

/// Name of the persona agent, also the memory resource prefix.
pub const AGENT_NAME: &str = crate::session::AGENT_RESOURCE_PREFIX;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide database handle.
    pub db: Database,
    /// Agent memory.
    pub memory: Arc<dyn AgentMemory>,
    /// Thread metadata.
    pub threads: Arc<ThreadService>,
    /// Persona agent used for text chat.
    pub agent: Arc<PersonaAgent>,
    /// Vision and persona pipeline used for image messages.
    pub pipeline: Arc<ImageAnalysisPipeline>,
    /// Origins allowed by CORS. Empty means localhost only.
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    /// Wire every service on top of one database handle.
    pub fn new(
        db: Database,
        chat_model: Arc<dyn LanguageModel>,
        vision_model: Arc<dyn LanguageModel>,
    ) -> Self {
        let memory: Arc<dyn AgentMemory> = Arc::new(SqliteMemory::new(db.clone()));
        let threads = ThreadService::new(ThreadRepository::new(db.clone()), memory.clone());
        let agent = PersonaAgent::new(AGENT_NAME, ANNE_INSTRUCTIONS, chat_model, memory.clone());
        let pipeline = ImageAnalysisPipeline::new(vision_model, agent.clone());

        Self {
            db,
            memory,
            threads: Arc::new(threads),
            agent: Arc::new(agent),
            pipeline: Arc::new(pipeline),
            allowed_origins: Arc::new(Vec::new()),
        }
    }

    /// Number of remembered messages the agent sees as context.
    pub fn with_history_window(mut self, window: usize) -> Self {
        let agent = self.agent.as_ref().clone().with_history_window(window);
        self.agent = Arc::new(agent);
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Arc::new(origins);
        self
    }
}
