use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{
    Language, OutputStyle, Profile, ProfileInput, ProfileUpdate, StructurePreference,
    TechnicalLevel,
};
use crate::storage::{self, Loaded};

/**
 * \brief Profile 存储的错误类型。
 */
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Profile '{0}' already exists")]
    DuplicateName(String),

    #[error("Profile '{0}' not found")]
    NotFound(String),

    #[error("Profile name cannot be empty")]
    InvalidName,

    #[error("failed to persist profiles: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profiles: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct ProfileFileRef<'a> {
    profiles: &'a [Profile],
}

/**
 * \brief 首次启动或设置文件损坏时写入的默认 Profile。
 */
pub fn default_profile() -> Profile {
    Profile {
        name: "Default Profile".to_string(),
        description: "A balanced profile suitable for general research paper analysis"
            .to_string(),
        constraints: vec![
            "Maximum 500 words for summary".to_string(),
            "Focus on key findings and methodology".to_string(),
            "Include practical implications".to_string(),
            "Highlight limitations and future work".to_string(),
            "Use clear, accessible language".to_string(),
        ],
        output_style: OutputStyle {
            language: Language::Formal,
            technical_level: TechnicalLevel::Intermediate,
            structure_preference: StructurePreference::Paragraph,
            response_language: "English".to_string(),
            visual_aids: true,
            extra: serde_json::Map::new(),
        },
        selected: true,
    }
}

/**
 * \brief 基于单个 JSON 文件的 Profile 存储。
 * \details 维护"非空时恰好一个 selected"的不变式；每次修改后同步整体重写文件。
 */
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    profiles: Vec<Profile>,
}

impl ProfileStore {
    /**
     * \brief 加载设置文件。
     * \details 文件缺失、损坏或不含任何 Profile 时重置为默认 Profile 并落盘；随后修复选中状态。
     */
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let path = path.into();
        let (profiles, reset) = match storage::read_json::<ProfileFile>(&path)? {
            Loaded::Parsed(file) => {
                let profiles = usable_profiles(&path, file.profiles);
                if profiles.is_empty() {
                    warn!("no profiles in {:?}, restoring default profile", path);
                    (vec![default_profile()], true)
                } else {
                    (profiles, false)
                }
            }
            Loaded::Missing => {
                info!("creating profile settings at {:?}", path);
                (vec![default_profile()], true)
            }
            Loaded::Corrupt(err) => {
                warn!(
                    "profile settings {:?} unreadable ({}), restoring default profile",
                    path, err
                );
                (vec![default_profile()], true)
            }
        };

        let mut store = Self { path, profiles };
        if store.repair_selection() {
            warn!("repaired active profile selection in {:?}", store.path);
        }
        if reset {
            store.save()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /** \brief 按存储顺序列出全部 Profile。 */
    pub fn list(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn get_active(&self) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.selected)
    }

    pub fn active_name(&self) -> Option<&str> {
        self.get_active().map(|p| p.name.as_str())
    }

    /**
     * \brief 获取约束列表：指定名称优先，否则取激活的 Profile；都不存在时为空。
     */
    pub fn constraints(&self, name: Option<&str>) -> &[String] {
        let profile = match name {
            Some(name) => self.get_by_name(name),
            None => self.get_active(),
        };
        profile.map(|p| p.constraints.as_slice()).unwrap_or(&[])
    }

    /**
     * \brief 新建 Profile，缺省的输出风格字段取默认值。
     */
    pub fn create(&mut self, input: ProfileInput) -> Result<&Profile, ProfileError> {
        validate_name(&input.name)?;
        if self.get_by_name(&input.name).is_some() {
            return Err(ProfileError::DuplicateName(input.name));
        }
        let previous = self.profiles.clone();
        let selected = self.profiles.is_empty();
        self.profiles.push(input.into_profile(selected));
        self.commit(previous)?;
        let idx = self.profiles.len() - 1;
        info!("created profile '{}'", self.profiles[idx].name);
        Ok(&self.profiles[idx])
    }

    /**
     * \brief 合并式更新，保留未给出的字段与选中状态。
     */
    pub fn update(&mut self, name: &str, patch: ProfileUpdate) -> Result<&Profile, ProfileError> {
        let idx = self.index_of(name)?;
        if let Some(new_name) = &patch.name {
            self.check_rename(idx, new_name)?;
        }

        let previous = self.profiles.clone();
        let profile = &mut self.profiles[idx];
        if let Some(new_name) = patch.name {
            profile.name = new_name;
        }
        if let Some(description) = patch.description {
            profile.description = description;
        }
        if let Some(constraints) = patch.constraints {
            profile.constraints = constraints;
        }
        if let Some(style) = patch.output_style {
            style.apply_to(&mut profile.output_style);
        }
        self.commit(previous)?;
        info!("updated profile '{}'", name);
        Ok(&self.profiles[idx])
    }

    /**
     * \brief 整体替换 Profile，仅沿用原有的选中状态。
     */
    pub fn replace(&mut self, name: &str, input: ProfileInput) -> Result<&Profile, ProfileError> {
        let idx = self.index_of(name)?;
        self.check_rename(idx, &input.name)?;
        let previous = self.profiles.clone();
        let was_selected = self.profiles[idx].selected;
        self.profiles[idx] = input.into_profile(was_selected);
        self.commit(previous)?;
        info!("replaced profile '{}'", name);
        Ok(&self.profiles[idx])
    }

    /**
     * \brief 设为激活 Profile，其余全部取消选中。
     */
    pub fn set_active(&mut self, name: &str) -> Result<(), ProfileError> {
        let idx = self.index_of(name)?;
        let previous = self.profiles.clone();
        for (i, profile) in self.profiles.iter_mut().enumerate() {
            profile.selected = i == idx;
        }
        self.commit(previous)?;
        info!("active profile set to '{}'", name);
        Ok(())
    }

    /**
     * \brief 删除 Profile；若删除的是激活项，则激活剩余的第一个。
     */
    pub fn delete(&mut self, name: &str) -> Result<Profile, ProfileError> {
        let idx = self.index_of(name)?;
        let previous = self.profiles.clone();
        let removed = self.profiles.remove(idx);
        if removed.selected {
            if let Some(first) = self.profiles.first_mut() {
                first.selected = true;
            }
        }
        self.commit(previous)?;
        info!("deleted profile '{}'", name);
        Ok(removed)
    }

    fn index_of(&self, name: &str) -> Result<usize, ProfileError> {
        self.profiles
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    fn check_rename(&self, idx: usize, new_name: &str) -> Result<(), ProfileError> {
        validate_name(new_name)?;
        let clash = self
            .profiles
            .iter()
            .enumerate()
            .any(|(i, p)| i != idx && p.name == new_name);
        if clash {
            return Err(ProfileError::DuplicateName(new_name.to_string()));
        }
        Ok(())
    }

    /** \brief 保留第一个选中项；无选中项时选中第一个。返回是否有改动。 */
    fn repair_selection(&mut self) -> bool {
        let mut changed = false;
        let mut found = false;
        for profile in self.profiles.iter_mut() {
            if profile.selected {
                if found {
                    profile.selected = false;
                    changed = true;
                } else {
                    found = true;
                }
            }
        }
        if !found {
            if let Some(first) = self.profiles.first_mut() {
                first.selected = true;
                changed = true;
            }
        }
        changed
    }

    /** \brief 落盘；写入失败时恢复到修改前的内存状态。 */
    fn commit(&mut self, previous: Vec<Profile>) -> Result<(), ProfileError> {
        if let Err(err) = self.save() {
            self.profiles = previous;
            return Err(err);
        }
        Ok(())
    }

    fn save(&self) -> Result<(), ProfileError> {
        storage::write_json(
            &self.path,
            &ProfileFileRef {
                profiles: &self.profiles,
            },
        )?;
        Ok(())
    }
}

/**
 * \brief 逐条解析设置文件中的 Profile。
 * \details 无法解析、名称为空或与前面重名的条目被跳过；其余字段的异常取值已在反序列化时回落为默认值。
 */
fn usable_profiles(path: &Path, entries: Vec<serde_json::Value>) -> Vec<Profile> {
    let mut profiles: Vec<Profile> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Profile>(entry) {
            Ok(profile) if profile.name.trim().is_empty() => {
                warn!("skipping unnamed profile #{} in {:?}", i, path);
            }
            Ok(profile) if profiles.iter().any(|p| p.name == profile.name) => {
                warn!("skipping duplicate profile '{}' in {:?}", profile.name, path);
            }
            Ok(profile) => profiles.push(profile),
            Err(err) => warn!("skipping profile #{} in {:?}: {}", i, path, err),
        }
    }
    profiles
}

fn validate_name(name: &str) -> Result<(), ProfileError> {
    if name.trim().is_empty() {
        return Err(ProfileError::InvalidName);
    }
    Ok(())
}
