use anyhow::Result;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

use crate::config::CacheConfig;
use crate::llm::client::TokenUsage;

/// LLM响应缓存管理器
///
/// 以提示词的MD5为键，把模型响应落盘复用。命中的重试、调试与断点续跑
/// 都不再重复消耗token。
pub struct CacheManager {
    config: CacheConfig,
}

/// 缓存条目
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: u64,
    /// prompt的MD5哈希值，用于缓存键的生成和验证
    pub prompt_hash: String,
    /// token使用情况（可选，用于准确统计）
    pub token_usage: Option<TokenUsage>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    /// 生成prompt的MD5哈希
    pub fn hash_prompt(&self, prompt: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(prompt.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// 获取缓存文件路径
    fn get_cache_path(&self, category: &str, hash: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(category)
            .join(format!("{}.json", hash))
    }

    /// 检查缓存是否过期
    fn is_expired(&self, timestamp: u64) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let expire_seconds = self.config.expire_hours * 3600;
        now.saturating_sub(timestamp) > expire_seconds
    }

    /// 获取缓存
    pub async fn get<T>(&self, category: &str, prompt: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        if !self.config.enabled {
            return Ok(None);
        }

        let hash = self.hash_prompt(prompt);
        let cache_path = self.get_cache_path(category, &hash);

        if !cache_path.exists() {
            return Ok(None);
        }

        match fs::read_to_string(&cache_path).await {
            Ok(content) => match serde_json::from_str::<CacheEntry<T>>(&content) {
                Ok(entry) => {
                    if self.is_expired(entry.timestamp) {
                        // 删除过期缓存
                        let _ = fs::remove_file(&cache_path).await;
                        return Ok(None);
                    }
                    Ok(Some(entry.data))
                }
                Err(e) => {
                    eprintln!("⚠️ 缓存反序列化失败（按未命中处理）: {}", e);
                    Ok(None)
                }
            },
            Err(e) => {
                eprintln!("⚠️ 缓存读取失败（按未命中处理）: {}", e);
                Ok(None)
            }
        }
    }

    /// 设置缓存（带token使用情况）
    pub async fn set_with_tokens<T>(
        &self,
        category: &str,
        prompt: &str,
        data: T,
        token_usage: TokenUsage,
    ) -> Result<()>
    where
        T: Serialize,
    {
        self.set_inner(category, prompt, data, Some(token_usage))
            .await
    }

    pub async fn set<T>(&self, category: &str, prompt: &str, data: T) -> Result<()>
    where
        T: Serialize,
    {
        self.set_inner(category, prompt, data, None).await
    }

    async fn set_inner<T>(
        &self,
        category: &str,
        prompt: &str,
        data: T,
        token_usage: Option<TokenUsage>,
    ) -> Result<()>
    where
        T: Serialize,
    {
        if !self.config.enabled {
            return Ok(());
        }

        let hash = self.hash_prompt(prompt);
        let cache_path = self.get_cache_path(category, &hash);

        // 确保目录存在
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let entry = CacheEntry {
            data,
            timestamp,
            prompt_hash: hash,
            token_usage,
        };

        let content = serde_json::to_string_pretty(&entry)?;
        fs::write(&cache_path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cache(enabled: bool, dir: &TempDir) -> CacheManager {
        CacheManager::new(CacheConfig {
            enabled,
            cache_dir: dir.path().to_path_buf(),
            expire_hours: 1,
        })
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(true, &dir);

        cache
            .set_with_tokens("extract", "some prompt", "result".to_string(), TokenUsage::new(10, 5))
            .await
            .unwrap();

        let hit: Option<String> = cache.get("extract", "some prompt").await.unwrap();
        assert_eq!(hit, Some("result".to_string()));

        // 不同prompt不命中
        let miss: Option<String> = cache.get("extract", "other prompt").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(false, &dir);

        cache.set("plan", "p", "x".to_string()).await.unwrap();
        let hit: Option<String> = cache.get("plan", "p").await.unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn test_hash_is_stable() {
        let dir = TempDir::new().unwrap();
        let cache = test_cache(true, &dir);
        assert_eq!(cache.hash_prompt("abc"), cache.hash_prompt("abc"));
        assert_ne!(cache.hash_prompt("abc"), cache.hash_prompt("abd"));
    }
}
