use std::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/**
 * \brief 交互会话的对话历史（仅内存，不落盘）。
 * \details 调用方先追加当前用户消息再发起请求；网关回放除最后一条以外的全部历史。
 */
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationHistory {
    turns: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Message::assistant(content));
    }

    /**
     * \brief 丢弃最后一条消息（请求失败时撤回未得到回复的用户消息）。
     */
    pub fn discard_last(&mut self) -> Option<Message> {
        self.turns.pop()
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

/** \brief 行文语气。 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Formal,
    Conversational,
}

/** \brief 技术深度。 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechnicalLevel {
    #[default]
    Basic,
    Intermediate,
    Advanced,
}

/** \brief 回复结构偏好。 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructurePreference {
    #[default]
    #[serde(rename = "paragraph")]
    Paragraph,
    #[serde(rename = "bullet-points")]
    BulletPoints,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Formal => "formal",
            Language::Conversational => "conversational",
        }
    }
}

impl TechnicalLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechnicalLevel::Basic => "basic",
            TechnicalLevel::Intermediate => "intermediate",
            TechnicalLevel::Advanced => "advanced",
        }
    }
}

impl StructurePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructurePreference::Paragraph => "paragraph",
            StructurePreference::BulletPoints => "bullet-points",
        }
    }
}

macro_rules! str_enum_impls {
    ($ty:ident { $($text:literal => $variant:ident),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!(
                        "unsupported {} value '{}' (expected one of: {})",
                        stringify!($ty),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }
    };
}

str_enum_impls!(Language { "formal" => Formal, "conversational" => Conversational });
str_enum_impls!(TechnicalLevel {
    "basic" => Basic,
    "intermediate" => Intermediate,
    "advanced" => Advanced,
});
str_enum_impls!(StructurePreference {
    "paragraph" => Paragraph,
    "bullet-points" => BulletPoints,
});

/** \brief 缺失、null、类型不符或未识别的取值回落为默认值，避免手工编辑的设置文件整体失效。 */
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn default_response_language() -> String {
    "English".to_string()
}

fn lenient_response_language<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(lang) => lang,
        _ => default_response_language(),
    })
}

/**
 * \brief Profile 的输出风格：五个固定字段均有默认值，其余键原样保留。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputStyle {
    #[serde(default, deserialize_with = "lenient")]
    pub language: Language,
    #[serde(default, deserialize_with = "lenient")]
    pub technical_level: TechnicalLevel,
    #[serde(default, deserialize_with = "lenient")]
    pub structure_preference: StructurePreference,
    #[serde(
        default = "default_response_language",
        deserialize_with = "lenient_response_language"
    )]
    pub response_language: String,
    #[serde(default, deserialize_with = "lenient")]
    pub visual_aids: bool,
    /** \brief 手工添加的其他风格键，原样保存并附加到提示词 */
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for OutputStyle {
    fn default() -> Self {
        Self {
            language: Language::default(),
            technical_level: TechnicalLevel::default(),
            structure_preference: StructurePreference::default(),
            response_language: default_response_language(),
            visual_aids: false,
            extra: serde_json::Map::new(),
        }
    }
}

impl OutputStyle {
    /**
     * \brief 以设置文件中的键名列出全部字段，用于拼装提示词与展示。
     */
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            ("language".to_string(), self.language.to_string()),
            ("technicalLevel".to_string(), self.technical_level.to_string()),
            (
                "structurePreference".to_string(),
                self.structure_preference.to_string(),
            ),
            ("responseLanguage".to_string(), self.response_language.clone()),
            ("visualAids".to_string(), self.visual_aids.to_string()),
        ];
        for (key, value) in &self.extra {
            let text = match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            entries.push((key.clone(), text));
        }
        entries
    }
}

/**
 * \brief 输出风格的部分字段，未给出的字段保留原值（或取默认值）。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputStylePatch {
    pub language: Option<Language>,
    pub technical_level: Option<TechnicalLevel>,
    pub structure_preference: Option<StructurePreference>,
    pub response_language: Option<String>,
    pub visual_aids: Option<bool>,
}

impl OutputStylePatch {
    pub fn apply_to(&self, style: &mut OutputStyle) {
        if let Some(language) = self.language {
            style.language = language;
        }
        if let Some(level) = self.technical_level {
            style.technical_level = level;
        }
        if let Some(structure) = self.structure_preference {
            style.structure_preference = structure;
        }
        if let Some(lang) = &self.response_language {
            style.response_language = lang.clone();
        }
        if let Some(visual_aids) = self.visual_aids {
            style.visual_aids = visual_aids;
        }
    }

    /** \brief 在默认风格上补齐缺省字段。 */
    pub fn into_style(self) -> OutputStyle {
        let mut style = OutputStyle::default();
        self.apply_to(&mut style);
        style
    }
}

/**
 * \brief 回复风格 Profile。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /** \brief 唯一名称（区分大小写） */
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub description: String,
    /** \brief 有序的约束条目 */
    #[serde(default, deserialize_with = "lenient")]
    pub constraints: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub output_style: OutputStyle,
    /** \brief 是否为当前激活的 Profile，整个存储中至多一个为 true */
    #[serde(default, deserialize_with = "lenient")]
    pub selected: bool,
}

impl Profile {
    /**
     * \brief 生成附加在用户消息之前的 Profile 指令。
     */
    pub fn instructions(&self) -> String {
        let constraints = self
            .constraints
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n");
        let style = self
            .output_style
            .entries()
            .into_iter()
            .map(|(k, v)| format!("- {}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Please provide your response according to the following profile:\n\
             Name: {}\n\
             Description: {}\n\
             Constraints:\n\
             {}\n\
             Output Style:\n\
             {}\n\n",
            self.name, self.description, constraints, style
        )
    }

    /**
     * \brief 面向终端的 Profile 详情文本。
     */
    pub fn render_details(&self) -> String {
        let mut out = format!(
            "Name: {}\nDescription: {}\nActive: {}\nConstraints:\n",
            self.name,
            self.description,
            if self.selected { "Yes" } else { "No" }
        );
        for constraint in &self.constraints {
            out.push_str(&format!("  - {}\n", constraint));
        }
        out.push_str("Output Style:\n");
        for (key, value) in self.output_style.entries() {
            out.push_str(&format!("  - {}: {}\n", key, value));
        }
        out
    }
}

/**
 * \brief 创建或整体替换 Profile 时的输入。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub output_style: OutputStylePatch,
}

impl ProfileInput {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn into_profile(self, selected: bool) -> Profile {
        Profile {
            name: self.name,
            description: self.description,
            constraints: self.constraints,
            output_style: self.output_style.into_style(),
            selected,
        }
    }
}

/**
 * \brief 合并式更新：仅覆盖给出的顶层字段，输出风格按子键合并。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdate {
    /** \brief 新名称（重命名），可选 */
    pub name: Option<String>,
    pub description: Option<String>,
    pub constraints: Option<Vec<String>>,
    pub output_style: Option<OutputStylePatch>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.constraints.is_none()
            && self.output_style.is_none()
    }
}
