use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

/** \brief 以此前缀开头的回复表示失败，不能缓存或当作答案展示。 */
pub const ERROR_MARKER: &str = "Error:";

/**
 * \brief 文件读取失败。`Display` 文本即返回给调用方的错误回复。
 */
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Error: File format not supported. Please provide a text or PDF file.")]
    UnsupportedFormat,

    #[error("Error: Failed to read file: {0}")]
    Read(String),
}

pub fn is_error_reply(text: &str) -> bool {
    text.starts_with(ERROR_MARKER)
}

/**
 * \brief 读取文件文本：PDF 逐页抽取文本（每页后追加换行），其他文件按 UTF-8 解码。
 */
pub fn read_file_content(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path).map_err(|e| IngestError::Read(e.to_string()))?;
    if is_pdf(path, &bytes) {
        debug!("extracting pdf text from {:?}", path);
        return extract_pdf_text(&bytes);
    }
    String::from_utf8(bytes).map_err(|_| IngestError::UnsupportedFormat)
}

fn is_pdf(path: &Path, bytes: &[u8]) -> bool {
    let by_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    by_extension || bytes.starts_with(b"%PDF-")
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, IngestError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| IngestError::Read(e.to_string()))?;
    let mut content = String::new();
    for page_number in doc.get_pages().keys() {
        let text = doc
            .extract_text(&[*page_number])
            .map_err(|e| IngestError::Read(e.to_string()))?;
        content.push_str(text.trim_end_matches(['\r', '\n']));
        content.push('\n');
    }
    Ok(content)
}

/**
 * \brief 列出论文目录中的普通文件（按名称排序）；目录不存在时创建。
 */
pub fn list_papers(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut papers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            papers.push(entry.path());
        }
    }
    papers.sort();
    Ok(papers)
}
