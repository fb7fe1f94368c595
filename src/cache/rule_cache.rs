//! 规则缓存管理
//! 文件布局：魔数 `RSYC` + 格式版本（1 字节）+ LZ4（长度前缀）压缩的 yara-x 序列化规则集
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::path::Path;

use crate::error::{RsyResult, RsyaraError};

const CACHE_MAGIC: &[u8; 4] = b"RSYC";
/// 缓存文件格式版本
pub const CACHE_FORMAT_VERSION: u8 = 2;

/// 规则缓存管理器
pub struct RuleCacheManager;

impl RuleCacheManager {
    /// 同步加载缓存，返回序列化的规则集
    pub fn load_from_cache(path: &Path) -> RsyResult<Vec<u8>> {
        let bytes = std::fs::read(path)?;
        let rules = Self::decode(&bytes)?;
        log::debug!(
            "Rule cache loaded | Path: {} | Cached bytes: {} | Rules bytes: {}",
            path.display(),
            bytes.len(),
            rules.len()
        );
        Ok(rules)
    }

    /// 同步保存缓存（自动创建父目录）
    pub fn save_to_cache(path: &Path, serialized_rules: &[u8]) -> RsyResult<()> {
        let bytes = Self::encode(serialized_rules);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        log::debug!(
            "Rule cache saved | Path: {} | Rules bytes: {} | Cached bytes: {}",
            path.display(),
            serialized_rules.len(),
            bytes.len()
        );
        Ok(())
    }

    /// 异步加载缓存
    #[cfg(feature = "async-io")]
    pub async fn load_from_cache_async(path: &Path) -> RsyResult<Vec<u8>> {
        let bytes = tokio::fs::read(path).await?;
        Self::decode(&bytes)
    }

    /// 异步保存缓存
    #[cfg(feature = "async-io")]
    pub async fn save_to_cache_async(path: &Path, serialized_rules: &[u8]) -> RsyResult<()> {
        let bytes = Self::encode(serialized_rules);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    /// 清除本地缓存
    pub fn clear_cache(path: &Path) -> RsyResult<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    // 公共逻辑：文件头 + 压缩
    fn encode(serialized_rules: &[u8]) -> Vec<u8> {
        let compressed = compress_prepend_size(serialized_rules);
        let mut bytes = Vec::with_capacity(CACHE_MAGIC.len() + 1 + compressed.len());
        bytes.extend_from_slice(CACHE_MAGIC);
        bytes.push(CACHE_FORMAT_VERSION);
        bytes.extend_from_slice(&compressed);
        bytes
    }

    // 公共逻辑：文件头校验 + 解压
    fn decode(bytes: &[u8]) -> RsyResult<Vec<u8>> {
        let Some(body) = bytes.strip_prefix(CACHE_MAGIC.as_slice()) else {
            return Err(RsyaraError::RuleCacheError("缓存文件头无效".to_string()));
        };
        let Some((&version, compressed)) = body.split_first() else {
            return Err(RsyaraError::RuleCacheError("缓存文件缺少格式版本".to_string()));
        };
        if version != CACHE_FORMAT_VERSION {
            return Err(RsyaraError::RuleCacheError(format!(
                "缓存格式版本不匹配: {} (期望 {})",
                version, CACHE_FORMAT_VERSION
            )));
        }
        decompress_size_prepended(compressed).map_err(|e| {
            RsyaraError::RuleCacheError(format!("LZ4解压缩失败: {:?}, 压缩包字节长度: {}", e, compressed.len()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NativeBackend, NativeCompiler, RuleCompilerBackend, ScanBackend};
    use crate::config::CompilerOptions;

    fn serialized() -> Vec<u8> {
        let mut compiler = NativeCompiler::new(CompilerOptions::default());
        compiler
            .add_source(r#"rule cached : t { meta: level = 2 strings: $a = "needle" nocase condition: $a }"#)
            .unwrap();
        Box::new(compiler).build().unwrap().serialize().unwrap()
    }

    #[test]
    fn test_save_and_load() {
        // 测试场景：缓存落盘后恢复规则集，扫描行为一致
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rules.bin");
        let rules = serialized();
        RuleCacheManager::save_to_cache(&path, &rules).unwrap();

        let loaded = RuleCacheManager::load_from_cache(&path).unwrap();
        assert_eq!(loaded, rules);
        let mut backend = NativeBackend::from_serialized(&loaded, None).unwrap();
        let result = backend.scan(b"a NEEDLE here").unwrap().unwrap();
        assert_eq!(result.matching_rules[0].meta("level"), Some("2"));

        RuleCacheManager::clear_cache(&path).unwrap();
        assert!(!path.exists());
        RuleCacheManager::clear_cache(&path).unwrap();
    }

    #[test]
    fn test_corrupt_cache_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.bin");
        for content in [&b"garbage"[..], &b"RSYC"[..], &b"RSYC\x02\x10\x00\x00\x00xx"[..]] {
            std::fs::write(&path, content).unwrap();
            assert!(matches!(
                RuleCacheManager::load_from_cache(&path),
                Err(RsyaraError::RuleCacheError(_))
            ));
        }
        assert!(matches!(
            RuleCacheManager::load_from_cache(&dir.path().join("missing.bin")),
            Err(RsyaraError::IoError(_))
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut bytes = RuleCacheManager::encode(b"payload");
        bytes[CACHE_MAGIC.len()] = CACHE_FORMAT_VERSION + 1;
        assert!(matches!(
            RuleCacheManager::decode(&bytes),
            Err(RsyaraError::RuleCacheError(_))
        ));
    }

    #[cfg(feature = "async-io")]
    #[tokio::test]
    async fn test_async_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.bin");
        let rules = serialized();
        RuleCacheManager::save_to_cache_async(&path, &rules).await.unwrap();
        let loaded = RuleCacheManager::load_from_cache_async(&path).await.unwrap();
        assert_eq!(loaded, rules);
    }
}
