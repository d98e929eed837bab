use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use scisift_core_sdk::{
    config::AppConfig,
    gateway::{AssistantGateway, ChatRequest, PaperSource},
    ingest::{self, is_error_reply},
    llm::OpenAiClient,
    models::{
        ConversationHistory, Language, OutputStylePatch, ProfileInput, ProfileUpdate,
        StructurePreference, TechnicalLevel,
    },
    profiles::ProfileStore,
    server,
    summaries::SummaryCache,
    telemetry,
};

/**
 * \brief CLI 程序入口：聊天、论文分析、Profile 管理与本地服务。
 */
#[derive(Parser, Debug)]
#[command(
    name = "scisift",
    version,
    about = "SciSift - Scientific Paper Analysis Tool"
)]
struct Cli {
    /** \brief 覆盖默认模型（SCISIFT_MODEL） */
    #[arg(long, global = true)]
    model: Option<String>,
    /** \brief Profile 设置文件 */
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /** \brief 摘要缓存文件 */
    #[arg(long, global = true)]
    summaries: Option<PathBuf>,
    #[arg(long, global = true)]
    papers_dir: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    telemetry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 与模型对话；不带 --prompt 时进入交互模式。
     */
    Chat {
        #[arg(long)]
        prompt: Option<String>,
        /** \brief 附带的文件（PDF 或文本） */
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        use_profile: bool,
    },

    /**
     * \brief 分析论文，结果按内容与激活 Profile 缓存。
     */
    Explain {
        #[command(flatten)]
        target: ExplainTarget,
    },

    /** \brief 管理回复风格 Profile。 */
    Profiles {
        #[command(subcommand)]
        action: ProfileCommand,
    },

    /** \brief 列出论文目录中的文件。 */
    Papers,

    /**
     * \brief 启动本地 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ExplainTarget {
    /** \brief 任意路径下的论文文件 */
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long)]
    url: Option<String>,
    /** \brief 论文目录中的序号（从 1 开始）或文件名 */
    #[arg(long)]
    paper: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    List,
    Show {
        name: String,
    },
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /** \brief 约束条目，可重复 */
        #[arg(long = "constraint")]
        constraints: Vec<String>,
        #[command(flatten)]
        style: StyleArgs,
    },
    Update {
        name: String,
        #[arg(long)]
        rename: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /** \brief 给出时整体替换约束列表 */
        #[arg(long = "constraint")]
        constraints: Vec<String>,
        #[arg(long, default_value_t = false)]
        clear_constraints: bool,
        #[command(flatten)]
        style: StyleArgs,
    },
    Activate {
        name: String,
    },
    Delete {
        name: String,
        /** \brief 跳过确认 */
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,
    },
}

#[derive(Args, Debug, Default)]
struct StyleArgs {
    /** \brief formal / conversational */
    #[arg(long)]
    language: Option<Language>,
    /** \brief basic / intermediate / advanced */
    #[arg(long)]
    technical_level: Option<TechnicalLevel>,
    /** \brief paragraph / bullet-points */
    #[arg(long)]
    structure: Option<StructurePreference>,
    #[arg(long)]
    response_language: Option<String>,
    #[arg(long)]
    visual_aids: Option<bool>,
}

impl StyleArgs {
    fn into_patch(self) -> OutputStylePatch {
        OutputStylePatch {
            language: self.language,
            technical_level: self.technical_level,
            structure_preference: self.structure,
            response_language: self.response_language,
            visual_aids: self.visual_aids,
        }
    }

    fn is_empty(&self) -> bool {
        self.language.is_none()
            && self.technical_level.is_none()
            && self.structure.is_none()
            && self.response_language.is_none()
            && self.visual_aids.is_none()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = apply_overrides(AppConfig::from_env(), &cli);
    telemetry::configure(config.telemetry_enabled, config.telemetry_file.clone());
    tracing::debug!("model={} papers={:?}", config.model, config.papers_dir);

    match cli.command {
        Commands::Chat {
            prompt,
            file,
            use_profile,
        } => {
            let gateway = open_gateway(&config)?;
            match prompt {
                Some(prompt) => {
                    let mut request =
                        ChatRequest::new(&prompt, &config.model).with_profile(use_profile);
                    if let Some(path) = file.as_deref() {
                        request = request.with_file(path);
                    }
                    let reply = gateway.chat(request).await.context("chat failed")?;
                    if is_error_reply(&reply) {
                        bail!("{}", reply);
                    }
                    println!("{}", reply);
                }
                None => interactive_chat(&gateway, &config.model, use_profile).await?,
            }
        }
        Commands::Explain { target } => {
            let mut gateway = open_gateway(&config)?;
            let result = if let Some(url) = target.url.as_deref() {
                println!("Analyzing paper from {}...\n", url);
                gateway
                    .explain_paper(PaperSource::Url(url), &config.model)
                    .await?
            } else {
                let path = match (target.file, target.paper) {
                    (Some(file), _) => file,
                    (None, Some(selector)) => {
                        let papers = ingest::list_papers(&config.papers_dir)
                            .context("list papers failed")?;
                        resolve_paper(&papers, &selector)?
                    }
                    (None, None) => bail!("one of --file, --url or --paper is required"),
                };
                println!("Analyzing paper {}...\n", path.display());
                gateway
                    .explain_paper(PaperSource::File(&path), &config.model)
                    .await?
            };
            if result.trim().is_empty() {
                bail!("Failed to analyze paper");
            }
            if is_error_reply(&result) {
                bail!("{}", result);
            }
            println!("{}", result);
        }
        Commands::Profiles { action } => {
            let mut store =
                ProfileStore::open(&config.settings_file).context("load profiles failed")?;
            manage_profiles(&mut store, action)?;
        }
        Commands::Papers => {
            let papers = ingest::list_papers(&config.papers_dir).context("list papers failed")?;
            if papers.is_empty() {
                println!("No papers found in {}", config.papers_dir.display());
            }
            for (i, paper) in papers.iter().enumerate() {
                println!("{}. {}", i + 1, file_name(paper));
            }
        }
        Commands::Serve { addr } => {
            server::run(&addr, &config).await?;
        }
    }

    Ok(())
}

fn apply_overrides(mut config: AppConfig, cli: &Cli) -> AppConfig {
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(path) = &cli.settings {
        config.settings_file = path.clone();
    }
    if let Some(path) = &cli.summaries {
        config.summaries_file = path.clone();
    }
    if let Some(dir) = &cli.papers_dir {
        config.papers_dir = dir.clone();
    }
    config.telemetry_enabled |= cli.telemetry;
    config
}

fn open_gateway(config: &AppConfig) -> Result<AssistantGateway<OpenAiClient>> {
    let client = OpenAiClient::from_config(config)?;
    let profiles = ProfileStore::open(&config.settings_file).context("load profiles failed")?;
    let summaries = SummaryCache::open(&config.summaries_file);
    tracing::debug!(
        "api_base={} settings={:?} summaries={:?} cached={}",
        client.api_base(),
        profiles.path(),
        summaries.path(),
        summaries.len()
    );
    Ok(AssistantGateway::new(client, profiles, summaries))
}

/**
 * \brief 交互式聊天：`exit` 退出，`profile` 切换是否附加 Profile，`reset` 清空历史。
 */
async fn interactive_chat(
    gateway: &AssistantGateway<OpenAiClient>,
    model: &str,
    mut use_profile: bool,
) -> Result<()> {
    match gateway.profiles().active_name() {
        Some(name) => println!("Active Profile: {}", name),
        None => println!("No active profile selected"),
    }
    println!(
        "Profile usage {}. Commands: 'profile' to toggle, 'reset' to clear history, 'exit' to quit.",
        if use_profile { "enabled" } else { "disabled" }
    );

    let mut history = ConversationHistory::new();
    let stdin = io::stdin();
    loop {
        print!("\nYou: ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        match message.to_ascii_lowercase().as_str() {
            "" => continue,
            "exit" => break,
            "profile" => {
                use_profile = !use_profile;
                println!(
                    "Profile usage {}",
                    if use_profile { "enabled" } else { "disabled" }
                );
                continue;
            }
            "reset" => {
                history.reset();
                println!("Conversation reset.");
                continue;
            }
            _ => {}
        }

        history.push_user(message);
        let request = ChatRequest::new(message, model)
            .with_profile(use_profile)
            .with_history(history.turns());
        match gateway.chat(request).await {
            Ok(reply) => {
                println!("\nAI: {}", reply);
                history.push_assistant(reply);
            }
            Err(err) => {
                history.discard_last();
                telemetry::log_error("cli.chat", &format!("{:#}", err));
                eprintln!("Failed to get AI response: {:#}", err);
            }
        }
    }
    Ok(())
}

fn manage_profiles(store: &mut ProfileStore, action: ProfileCommand) -> Result<()> {
    match action {
        ProfileCommand::List => {
            if store.is_empty() {
                println!("No profiles found.");
            }
            for profile in store.list() {
                println!("{}", profile.render_details());
            }
        }
        ProfileCommand::Show { name } => {
            let profile = store
                .get_by_name(&name)
                .ok_or_else(|| anyhow!("Profile '{}' not found", name))?;
            print!("{}", profile.render_details());
        }
        ProfileCommand::Create {
            name,
            description,
            constraints,
            style,
        } => {
            let input = ProfileInput {
                name,
                description,
                constraints,
                output_style: style.into_patch(),
            };
            let created = store.create(input)?;
            telemetry::log_event("cli.profile", &format!("create name={}", created.name));
            println!("Profile '{}' created successfully!", created.name);
        }
        ProfileCommand::Update {
            name,
            rename,
            description,
            constraints,
            clear_constraints,
            style,
        } => {
            let constraints = if clear_constraints {
                Some(Vec::new())
            } else if constraints.is_empty() {
                None
            } else {
                Some(constraints)
            };
            let output_style = if style.is_empty() {
                None
            } else {
                Some(style.into_patch())
            };
            let patch = ProfileUpdate {
                name: rename,
                description,
                constraints,
                output_style,
            };
            if patch.is_empty() {
                println!("Nothing to update.");
                return Ok(());
            }
            let updated = store.update(&name, patch)?;
            telemetry::log_event("cli.profile", &format!("update name={}", name));
            println!("Profile '{}' updated successfully!", updated.name);
        }
        ProfileCommand::Activate { name } => {
            store.set_active(&name)?;
            println!("Active profile set to: {}", name);
        }
        ProfileCommand::Delete { name, yes } => {
            if !yes && !confirm(&format!("Are you sure you want to delete profile '{}'?", name))? {
                println!("Cancelled.");
                return Ok(());
            }
            store.delete(&name)?;
            telemetry::log_event("cli.profile", &format!("delete name={}", name));
            println!("Profile '{}' deleted successfully!", name);
            match store.active_name() {
                Some(active) => println!("Active profile: {}", active),
                None => println!("No active profile selected"),
            }
        }
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} (yes/no): ", question);
    io::stdout().flush().ok();
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

/**
 * \brief 按序号（从 1 开始）或文件名选择论文。
 */
fn resolve_paper(papers: &[PathBuf], selector: &str) -> Result<PathBuf> {
    if papers.is_empty() {
        bail!("No papers found in papers directory");
    }
    if let Ok(index) = selector.trim().parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| papers.get(i))
            .cloned()
            .ok_or_else(|| anyhow!("Invalid paper number {} (1-{})", index, papers.len()));
    }
    papers
        .iter()
        .find(|p| file_name(p) == selector)
        .cloned()
        .ok_or_else(|| anyhow!("Paper '{}' not found", selector))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
