use std::{
    path::{Component, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::{
    config::AppConfig,
    gateway::{AssistantGateway, ChatRequest, PaperSource},
    ingest::{self, is_error_reply},
    llm::{CompletionBackend, OpenAiClient},
    models::{ConversationHistory, Message, Profile, ProfileInput, ProfileUpdate},
    profiles::{ProfileError, ProfileStore},
    summaries::SummaryCache,
    telemetry,
};

type ApiError = (StatusCode, String);

/**
 * \brief 服务共享状态。
 * \details 网关与会话历史各由一把异步锁保护，远端调用期间持锁，保证同一存储/会话同时只有一个请求在处理。
 */
pub struct AppState<C> {
    gateway: Arc<Mutex<AssistantGateway<C>>>,
    history: Arc<Mutex<ConversationHistory>>,
    model: String,
    papers_dir: PathBuf,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            history: Arc::clone(&self.history),
            model: self.model.clone(),
            papers_dir: self.papers_dir.clone(),
        }
    }
}

impl<C: CompletionBackend> AppState<C> {
    pub fn new(gateway: AssistantGateway<C>, model: impl Into<String>, papers_dir: PathBuf) -> Self {
        Self {
            gateway: Arc::new(Mutex::new(gateway)),
            history: Arc::new(Mutex::new(ConversationHistory::new())),
            model: model.into(),
            papers_dir,
        }
    }
}

/**
 * \brief 启动本地 HTTP 服务，提供 Profile 管理、会话聊天与论文分析 API。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str, config: &AppConfig) -> Result<()> {
    let client = OpenAiClient::from_config(config)?;
    let profiles = ProfileStore::open(&config.settings_file)?;
    let summaries = SummaryCache::open(&config.summaries_file);
    let gateway = AssistantGateway::new(client, profiles, summaries);
    let state = AppState::new(gateway, config.model.clone(), config.papers_dir.clone());

    let app = router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router<C: CompletionBackend + 'static>(state: AppState<C>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/profiles", get(list_profiles::<C>).post(create_profile::<C>))
        .route(
            "/api/profiles/{name}",
            get(get_profile::<C>)
                .put(replace_profile::<C>)
                .patch(update_profile::<C>)
                .delete(delete_profile::<C>),
        )
        .route("/api/profiles/{name}/select", post(select_profile::<C>))
        .route("/api/chat", post(chat::<C>))
        .route("/api/chat/reset", post(reset_chat::<C>))
        .route("/api/chat/history", get(chat_history::<C>))
        .route("/api/papers", get(list_papers::<C>))
        .route("/api/papers/explain", post(explain_paper::<C>))
        .with_state(state)
}

#[derive(Serialize, Debug)]
struct ProfilesState {
    profiles: Vec<Profile>,
    active: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatInput {
    /** \brief 用户消息 */
    message: String,
    #[serde(default)]
    use_profile: bool,
    /** \brief 覆盖默认模型，可选 */
    #[serde(default)]
    model: Option<String>,
}

#[derive(Serialize, Debug)]
struct ChatOutput {
    reply: String,
    turns: usize,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "source", rename_all = "lowercase")]
enum ExplainInput {
    /** \brief 论文目录下的文件名 */
    File {
        path: String,
        #[serde(default)]
        model: Option<String>,
    },
    Url {
        url: String,
        #[serde(default)]
        model: Option<String>,
    },
}

#[derive(Serialize, Debug)]
struct ExplainOutput {
    summary: String,
}

fn build_profiles_state(store: &ProfileStore) -> ProfilesState {
    ProfilesState {
        profiles: store.list().to_vec(),
        active: store.active_name().map(str::to_string),
    }
}

fn internal_err<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn profile_err(e: ProfileError) -> ApiError {
    let status = match e {
        ProfileError::NotFound(_) => StatusCode::NOT_FOUND,
        ProfileError::DuplicateName(_) => StatusCode::CONFLICT,
        ProfileError::InvalidName => StatusCode::BAD_REQUEST,
        ProfileError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn list_profiles<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
) -> Json<ProfilesState> {
    let gw = state.gateway.lock().await;
    Json(build_profiles_state(gw.profiles()))
}

async fn get_profile<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
) -> Result<Json<Profile>, ApiError> {
    let gw = state.gateway.lock().await;
    match gw.profiles().get_by_name(&name) {
        Some(profile) => Ok(Json(profile.clone())),
        None => Err(profile_err(ProfileError::NotFound(name))),
    }
}

async fn create_profile<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
    Json(input): Json<ProfileInput>,
) -> Result<Json<Profile>, ApiError> {
    let mut gw = state.gateway.lock().await;
    let profile = gw.profiles_mut().create(input).map_err(profile_err)?.clone();
    telemetry::log_event("server.profile", &format!("create name={}", profile.name));
    Ok(Json(profile))
}

/**
 * \brief 整体替换 Profile（保留选中状态）。
 */
async fn replace_profile<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
    Json(input): Json<ProfileInput>,
) -> Result<Json<Profile>, ApiError> {
    let mut gw = state.gateway.lock().await;
    let profile = gw
        .profiles_mut()
        .replace(&name, input)
        .map_err(profile_err)?
        .clone();
    telemetry::log_event("server.profile", &format!("replace name={}", name));
    Ok(Json(profile))
}

/**
 * \brief 合并式更新 Profile。
 */
async fn update_profile<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
    Json(patch): Json<ProfileUpdate>,
) -> Result<Json<Profile>, ApiError> {
    let mut gw = state.gateway.lock().await;
    let profile = gw
        .profiles_mut()
        .update(&name, patch)
        .map_err(profile_err)?
        .clone();
    telemetry::log_event("server.profile", &format!("update name={}", name));
    Ok(Json(profile))
}

async fn delete_profile<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
) -> Result<Json<ProfilesState>, ApiError> {
    let mut gw = state.gateway.lock().await;
    gw.profiles_mut().delete(&name).map_err(profile_err)?;
    telemetry::log_event("server.profile", &format!("delete name={}", name));
    Ok(Json(build_profiles_state(gw.profiles())))
}

async fn select_profile<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
) -> Result<Json<ProfilesState>, ApiError> {
    let mut gw = state.gateway.lock().await;
    gw.profiles_mut().set_active(&name).map_err(profile_err)?;
    telemetry::log_event("server.profile", &format!("select name={}", name));
    Ok(Json(build_profiles_state(gw.profiles())))
}

/**
 * \brief 会话聊天：先记录用户消息，成功后追加助手回复；失败时撤回该用户消息。
 */
async fn chat<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
    Json(input): Json<ChatInput>,
) -> Result<Json<ChatOutput>, ApiError> {
    let message = input.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message cannot be empty".to_string()));
    }
    let model = input.model.unwrap_or_else(|| state.model.clone());

    let mut history = state.history.lock().await;
    history.push_user(message);
    let turns: Vec<Message> = history.turns().to_vec();

    let gw = state.gateway.lock().await;
    let request = ChatRequest::new(message, &model)
        .with_profile(input.use_profile)
        .with_history(&turns);
    match gw.chat(request).await {
        Ok(reply) => {
            history.push_assistant(reply.clone());
            Ok(Json(ChatOutput {
                reply,
                turns: history.len(),
            }))
        }
        Err(err) => {
            history.discard_last();
            telemetry::log_error("server.chat", &format!("{:#}", err));
            Err((StatusCode::BAD_GATEWAY, format!("Failed to get AI response: {:#}", err)))
        }
    }
}

async fn reset_chat<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
) -> Json<serde_json::Value> {
    state.history.lock().await.reset();
    Json(serde_json::json!({"ok": true}))
}

async fn chat_history<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
) -> Json<Vec<Message>> {
    Json(state.history.lock().await.turns().to_vec())
}

async fn list_papers<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let papers = ingest::list_papers(&state.papers_dir).map_err(internal_err)?;
    let names = papers
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    Ok(Json(names))
}

async fn explain_paper<C: CompletionBackend + 'static>(
    State(state): State<AppState<C>>,
    Json(input): Json<ExplainInput>,
) -> Result<Json<ExplainOutput>, ApiError> {
    let mut gw = state.gateway.lock().await;
    let result = match input {
        ExplainInput::File { path, model } => {
            let relative = std::path::Path::new(&path);
            if !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            {
                return Err((StatusCode::BAD_REQUEST, "invalid paper path".to_string()));
            }
            let full = state.papers_dir.join(relative);
            let model = model.unwrap_or_else(|| state.model.clone());
            gw.explain_paper(PaperSource::File(&full), &model).await
        }
        ExplainInput::Url { url, model } => {
            if url.trim().is_empty() {
                return Err((StatusCode::BAD_REQUEST, "a paper URL is required".to_string()));
            }
            let model = model.unwrap_or_else(|| state.model.clone());
            gw.explain_paper(PaperSource::Url(&url), &model).await
        }
    };
    let summary = result.map_err(|e| (StatusCode::BAD_GATEWAY, format!("Failed to analyze paper: {:#}", e)))?;
    if summary.trim().is_empty() {
        return Err((StatusCode::BAD_GATEWAY, "Failed to get analysis result".to_string()));
    }
    if is_error_reply(&summary) {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, summary));
    }
    Ok(Json(ExplainOutput { summary }))
}
