use std::{fs, io, path::Path};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};

/**
 * \brief 读取 JSON 文件的结果：不存在 / 无法解析 / 已解析。
 */
#[derive(Debug)]
pub enum Loaded<T> {
    Missing,
    Corrupt(serde_json::Error),
    Parsed(T),
}

/**
 * \brief 读取并解析整个 JSON 文件。
 * \details 文件不存在与内容损坏都不算错误，交由调用方决定如何恢复；其他 I/O 错误向上传递。
 */
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Loaded<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(err) => return Err(err),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Loaded::Parsed(value)),
        Err(err) => Ok(Loaded::Corrupt(err)),
    }
}

/**
 * \brief 以 4 空格缩进整体重写 JSON 文件（无追加、无文件锁）。
 */
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut ser).map_err(io::Error::from)?;
    fs::write(path, buf)
}
