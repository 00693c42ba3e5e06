use crate::models::grading::PaperFixture;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载数据并转换为 PaperFixture 对象
pub async fn load_toml_to_fixture(toml_file_path: &Path) -> Result<PaperFixture> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut fixture: PaperFixture = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    // 设置文件路径
    fixture.file_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(fixture)
}

/// 从文件夹中加载所有 TOML 文件并转换为 PaperFixture 对象列表
pub async fn load_all_toml_files(folder_path: &str) -> Result<Vec<PaperFixture>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut fixtures = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            tracing::info!(
                "正在加载: {}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );

            match load_toml_to_fixture(&path).await {
                Ok(fixture) => {
                    tracing::info!("成功加载 {} 页评分结果", fixture.pages.len());
                    fixtures.push(fixture);
                }
                Err(e) => {
                    tracing::warn!("加载文件失败 {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(fixtures)
}
