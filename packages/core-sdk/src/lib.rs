pub mod config;
pub mod gateway;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod profiles;
pub mod server;
pub mod storage;
pub mod summaries;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::gateway::{AssistantGateway, ChatRequest, PaperSource};
    pub use crate::ingest::is_error_reply;
    pub use crate::llm::{CompletionBackend, OpenAiClient};
    pub use crate::models::{ConversationHistory, Message, Profile, ProfileInput, ProfileUpdate};
    pub use crate::profiles::{ProfileError, ProfileStore};
    pub use crate::summaries::SummaryCache;
    pub use crate::telemetry;
}
