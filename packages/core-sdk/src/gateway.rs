use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::ingest::{self, is_error_reply};
use crate::llm::CompletionBackend;
use crate::models::Message;
use crate::profiles::ProfileStore;
use crate::summaries::SummaryCache;
use crate::telemetry;

const EXPLAIN_FILE_PROMPT: &str = "Please analyze and explain the following paper:";

/**
 * \brief 待分析论文的来源。
 */
#[derive(Debug, Clone, Copy)]
pub enum PaperSource<'a> {
    /** \brief 本地文件（PDF 或文本） */
    File(&'a Path),
    /** \brief 论文 URL，原样作为缓存内容 */
    Url(&'a str),
}

/**
 * \brief 单次对话请求。
 * \details `history` 的最后一条应为当前用户消息，回放时会被排除。
 */
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub file: Option<&'a Path>,
    pub model: &'a str,
    pub use_profile: bool,
    pub history: &'a [Message],
}

impl<'a> ChatRequest<'a> {
    pub fn new(message: &'a str, model: &'a str) -> Self {
        Self {
            message,
            file: None,
            model,
            use_profile: false,
            history: &[],
        }
    }

    pub fn with_file(mut self, file: &'a Path) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_profile(mut self, use_profile: bool) -> Self {
        self.use_profile = use_profile;
        self
    }

    pub fn with_history(mut self, history: &'a [Message]) -> Self {
        self.history = history;
        self
    }
}

/**
 * \brief 组装上下文并发起远端调用；论文分析路径通过摘要缓存去重。
 */
pub struct AssistantGateway<C> {
    client: C,
    profiles: ProfileStore,
    summaries: SummaryCache,
}

impl<C: CompletionBackend> AssistantGateway<C> {
    pub fn new(client: C, profiles: ProfileStore, summaries: SummaryCache) -> Self {
        Self {
            client,
            profiles,
            summaries,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ProfileStore {
        &mut self.profiles
    }

    pub fn summaries(&self) -> &SummaryCache {
        &self.summaries
    }

    /**
     * \brief 发送一条消息，返回首个候选的文本。
     * \details 文件读取失败时不调用模型，直接返回以 `Error:` 开头的错误文本。
     */
    pub async fn chat(&self, request: ChatRequest<'_>) -> Result<String> {
        let file_content = match request.file {
            Some(path) => match ingest::read_file_content(path) {
                Ok(content) => Some(content),
                Err(err) => {
                    telemetry::log_error("gateway.chat", &err.to_string());
                    return Ok(err.to_string());
                }
            },
            None => None,
        };
        self.send(
            request.message,
            file_content.as_deref(),
            request.model,
            request.use_profile,
            request.history,
        )
        .await
    }

    /**
     * \brief 解释论文：命中缓存直接返回；否则调用模型并在成功后写入缓存。
     */
    pub async fn explain_paper(&mut self, source: PaperSource<'_>, model: &str) -> Result<String> {
        let (content, message, attach) = match source {
            PaperSource::File(path) => match ingest::read_file_content(path) {
                Ok(content) => (content, EXPLAIN_FILE_PROMPT.to_string(), true),
                Err(err) => {
                    telemetry::log_error("gateway.explain", &err.to_string());
                    return Ok(err.to_string());
                }
            },
            PaperSource::Url(url) => {
                let url = url.trim();
                if url.is_empty() {
                    bail!("a paper URL is required");
                }
                let message = format!("Please analyze and explain the paper at this URL: {}", url);
                (url.to_string(), message, false)
            }
        };

        let profile_name = self.profiles.active_name().map(str::to_string);
        if let Some(cached) = self.summaries.get(&content, profile_name.as_deref()) {
            info!("serving paper summary from cache");
            telemetry::log_event("gateway.explain", "cache hit");
            return Ok(cached.to_string());
        }

        let file_content = if attach { Some(content.as_str()) } else { None };
        let result = self
            .send(&message, file_content, model, true, &[])
            .await?;

        if result.trim().is_empty() || is_error_reply(&result) {
            telemetry::log_error("gateway.explain", "model returned no usable summary");
            return Ok(result);
        }
        self.summaries
            .put(&content, &result, profile_name.as_deref())
            .context("save paper summary failed")?;
        telemetry::log_event(
            "gateway.explain",
            &format!("stored summary len={} profile={:?}", result.len(), profile_name),
        );
        Ok(result)
    }

    /**
     * \brief 拼装最终的用户消息：Profile 指令 + 文件内容 + 原始消息。
     */
    fn compose_prompt(&self, message: &str, file_content: Option<&str>, use_profile: bool) -> String {
        let mut prompt = match file_content {
            Some(content) => format!(
                "Here is the content of the file:\n\n{}\n\n{}",
                content, message
            ),
            None => message.to_string(),
        };
        if use_profile {
            if let Some(profile) = self.profiles.get_active() {
                prompt.insert_str(0, &profile.instructions());
            }
        }
        prompt
    }

    async fn send(
        &self,
        message: &str,
        file_content: Option<&str>,
        model: &str,
        use_profile: bool,
        history: &[Message],
    ) -> Result<String> {
        let prompt = self.compose_prompt(message, file_content, use_profile);
        let mut messages = Vec::with_capacity(history.len().max(1));
        if let Some((_, prior)) = history.split_last() {
            messages.extend_from_slice(prior);
        }
        messages.push(Message::user(prompt));

        telemetry::log_event("gateway.chat", &request_summary(model, &messages, use_profile));
        self.client
            .complete(model, &messages)
            .await
            .context("chat completion failed")
    }
}

/** \brief 遥测摘要；`prompt_len` 为最终发送的用户消息长度。 */
fn request_summary(model: &str, messages: &[Message], use_profile: bool) -> String {
    format!(
        "model={} turns={} use_profile={} prompt_len={}",
        model,
        messages.len(),
        use_profile,
        messages.last().map(|m| m.content.len()).unwrap_or(0)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileInput;
    use anyhow::anyhow;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /** 记录调用次数与请求内容的桩客户端。 */
    #[derive(Default)]
    struct StubBackend {
        calls: AtomicUsize,
        requests: Mutex<Vec<Vec<Message>>>,
        reply: Option<String>,
    }

    impl StubBackend {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self::default()
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_request(&self) -> Vec<Message> {
            self.requests
                .lock()
                .expect("lock requests")
                .last()
                .cloned()
                .expect("at least one request")
        }
    }

    impl CompletionBackend for StubBackend {
        async fn complete(&self, _model: &str, messages: &[Message]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .expect("lock requests")
                .push(messages.to_vec());
            self.reply
                .clone()
                .ok_or_else(|| anyhow!("connection refused"))
        }
    }

    fn gateway(backend: StubBackend) -> (TempDir, AssistantGateway<StubBackend>) {
        let dir = tempdir().expect("tempdir");
        let profiles = ProfileStore::open(dir.path().join("settings.json")).expect("profiles");
        let summaries = SummaryCache::open(dir.path().join("paper_summaries.json"));
        (dir, AssistantGateway::new(backend, profiles, summaries))
    }

    fn write_paper(dir: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).expect("write paper");
        path
    }

    #[tokio::test]
    async fn test_chat_sends_plain_message() {
        let (_dir, gw) = gateway(StubBackend::replying("pong"));
        let reply = gw.chat(ChatRequest::new("ping", "m")).await.expect("chat");
        assert_eq!(reply, "pong");
        assert_eq!(gw.client().last_request(), vec![Message::user("ping")]);
    }

    #[tokio::test]
    async fn test_chat_prefixes_active_profile() {
        let (_dir, gw) = gateway(StubBackend::replying("ok"));
        gw.chat(ChatRequest::new("question", "m").with_profile(true))
            .await
            .expect("chat");
        let sent = gw.client().last_request();
        let text = &sent[0].content;
        assert!(text.starts_with("Please provide your response according to the following profile:"));
        assert!(text.contains("Name: Default Profile"));
        assert!(text.ends_with("\n\nquestion"));
    }

    #[tokio::test]
    async fn test_chat_without_active_profile_has_no_prefix() {
        let (_dir, mut gw) = gateway(StubBackend::replying("ok"));
        gw.profiles_mut()
            .delete("Default Profile")
            .expect("delete default");
        gw.chat(ChatRequest::new("question", "m").with_profile(true))
            .await
            .expect("chat");
        assert_eq!(gw.client().last_request()[0].content, "question");
    }

    #[tokio::test]
    async fn test_chat_attaches_file_content() {
        let (dir, gw) = gateway(StubBackend::replying("ok"));
        let path = write_paper(&dir, "notes.txt", "line one");
        gw.chat(ChatRequest::new("summarize", "m").with_file(&path))
            .await
            .expect("chat");
        assert_eq!(
            gw.client().last_request()[0].content,
            "Here is the content of the file:\n\nline one\n\nsummarize"
        );
    }

    #[tokio::test]
    async fn test_chat_unreadable_file_skips_model() {
        let (dir, gw) = gateway(StubBackend::replying("ok"));
        let path = dir.path().join("missing.txt");
        let reply = gw
            .chat(ChatRequest::new("summarize", "m").with_file(&path))
            .await
            .expect("chat");
        assert!(is_error_reply(&reply));
        assert_eq!(gw.client().calls(), 0);
    }

    #[tokio::test]
    async fn test_chat_replays_history_without_current_turn() {
        let (_dir, gw) = gateway(StubBackend::replying("fine"));
        let history = vec![
            Message::user("hello"),
            Message::assistant("hi"),
            Message::user("how are you"),
        ];
        gw.chat(ChatRequest::new("how are you", "m").with_history(&history))
            .await
            .expect("chat");
        let sent = gw.client().last_request();
        assert_eq!(
            sent,
            vec![
                Message::user("hello"),
                Message::assistant("hi"),
                Message::user("how are you"),
            ]
        );
    }

    #[tokio::test]
    async fn test_request_summary_counts_composed_prompt() {
        let (dir, gw) = gateway(StubBackend::replying("ok"));
        let path = write_paper(&dir, "notes.txt", "line one");
        gw.chat(
            ChatRequest::new("summarize", "m")
                .with_file(&path)
                .with_profile(true),
        )
        .await
        .expect("chat");
        let sent = gw.client().last_request();
        let composed = sent[0].content.len();
        assert!(composed > "summarize".len());
        assert_eq!(
            request_summary("m", &sent, true),
            format!("model=m turns=1 use_profile=true prompt_len={}", composed)
        );
    }

    #[tokio::test]
    async fn test_chat_transport_error_propagates() {
        let (_dir, gw) = gateway(StubBackend::failing());
        let err = gw
            .chat(ChatRequest::new("ping", "m"))
            .await
            .expect_err("transport failure");
        assert!(format!("{:#}", err).contains("connection refused"));
    }

    #[tokio::test]
    async fn test_explain_file_twice_calls_model_once() {
        let (dir, mut gw) = gateway(StubBackend::replying("A summary"));
        let path = write_paper(&dir, "paper.txt", "Deep learning results");

        let first = gw
            .explain_paper(PaperSource::File(&path), "m")
            .await
            .expect("first explain");
        let second = gw
            .explain_paper(PaperSource::File(&path), "m")
            .await
            .expect("second explain");
        assert_eq!(first, "A summary");
        assert_eq!(first, second);
        assert_eq!(gw.client().calls(), 1);

        let sent = gw.client().last_request();
        assert!(sent[0].content.contains("Here is the content of the file:\n\nDeep learning results\n\n"));
        assert!(sent[0].content.ends_with(EXPLAIN_FILE_PROMPT));
    }

    #[tokio::test]
    async fn test_explain_cache_is_per_profile() {
        let (dir, mut gw) = gateway(StubBackend::replying("A summary"));
        let path = write_paper(&dir, "paper.txt", "Same content");
        gw.explain_paper(PaperSource::File(&path), "m")
            .await
            .expect("explain default");

        gw.profiles_mut()
            .create(ProfileInput::named("Skeptic"))
            .expect("create");
        gw.profiles_mut().set_active("Skeptic").expect("activate");
        gw.explain_paper(PaperSource::File(&path), "m")
            .await
            .expect("explain skeptic");
        assert_eq!(gw.client().calls(), 2);
        assert_eq!(gw.summaries().len(), 2);
        assert_eq!(
            gw.summaries().get("Same content", Some("Skeptic")),
            Some("A summary")
        );
    }

    #[tokio::test]
    async fn test_explain_same_content_in_renamed_file_hits_cache() {
        let (dir, mut gw) = gateway(StubBackend::replying("A summary"));
        let a = write_paper(&dir, "a.txt", "Identical");
        let b = write_paper(&dir, "b.txt", "Identical");
        gw.explain_paper(PaperSource::File(&a), "m").await.expect("a");
        gw.explain_paper(PaperSource::File(&b), "m").await.expect("b");
        assert_eq!(gw.client().calls(), 1);
    }

    #[tokio::test]
    async fn test_explain_empty_reply_is_not_cached() {
        let (dir, mut gw) = gateway(StubBackend::replying(""));
        let path = write_paper(&dir, "paper.txt", "Content");
        let result = gw
            .explain_paper(PaperSource::File(&path), "m")
            .await
            .expect("explain");
        assert!(result.is_empty());
        assert!(gw.summaries().is_empty());
        gw.explain_paper(PaperSource::File(&path), "m")
            .await
            .expect("explain again");
        assert_eq!(gw.client().calls(), 2);
    }

    #[tokio::test]
    async fn test_explain_transport_error_stores_nothing() {
        let (dir, mut gw) = gateway(StubBackend::failing());
        let path = write_paper(&dir, "paper.txt", "Content");
        assert!(gw
            .explain_paper(PaperSource::File(&path), "m")
            .await
            .is_err());
        assert!(gw.summaries().is_empty());
    }

    #[tokio::test]
    async fn test_explain_unreadable_file_short_circuits() {
        let (dir, mut gw) = gateway(StubBackend::replying("A summary"));
        let path = dir.path().join("ghost.pdf");
        let result = gw
            .explain_paper(PaperSource::File(&path), "m")
            .await
            .expect("explain");
        assert!(result.starts_with("Error: Failed to read file"));
        assert_eq!(gw.client().calls(), 0);
        assert!(gw.summaries().is_empty());
    }

    #[tokio::test]
    async fn test_explain_url_uses_url_as_cache_content() {
        let (_dir, mut gw) = gateway(StubBackend::replying("URL summary"));
        let url = "https://arxiv.org/abs/1706.03762";
        let first = gw
            .explain_paper(PaperSource::Url(url), "m")
            .await
            .expect("explain url");
        assert_eq!(first, "URL summary");
        let sent = gw.client().last_request();
        assert!(sent[0]
            .content
            .ends_with(&format!("Please analyze and explain the paper at this URL: {}", url)));

        gw.explain_paper(PaperSource::Url(url), "m")
            .await
            .expect("explain url again");
        assert_eq!(gw.client().calls(), 1);
        assert_eq!(
            gw.summaries().get(url, Some("Default Profile")),
            Some("URL summary")
        );
    }

    #[tokio::test]
    async fn test_explain_empty_url_is_usage_error() {
        let (_dir, mut gw) = gateway(StubBackend::replying("x"));
        assert!(gw.explain_paper(PaperSource::Url("  "), "m").await.is_err());
        assert_eq!(gw.client().calls(), 0);
    }
}
