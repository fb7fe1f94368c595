//! 全局扫描器单例管理
//! 进程内唯一、初始化一次；适合规则集在启动时一次性加载的服务
use once_cell::sync::{Lazy, OnceCell};
use std::sync::Arc;

use super::orchestrator::Scanner;
use crate::config::ScanConfig;
use crate::error::{RsyResult, RsyaraError};

/// 全局扫描器实例
static GLOBAL_SCANNER: Lazy<Arc<OnceCell<Arc<Scanner>>>> = Lazy::new(|| Arc::new(OnceCell::new()));

/// 编译规则源并初始化全局扫描器
/// 已初始化时直接返回 Ok(())，不重复编译
pub fn init_global_scanner(config: &ScanConfig, sources: &[&str]) -> RsyResult<()> {
    if GLOBAL_SCANNER.get().is_some() {
        log::debug!("Global scanner already initialized, skip reinitialization");
        return Ok(());
    }

    let scanner = Scanner::with_config(config);
    for source in sources {
        scanner.add_source(source)?;
    }
    scanner
        .build()
        .map_err(|e| RsyaraError::ScannerInitError(format!("Failed to build global scanner: {}", e)))?;

    init_global_scanner_with(scanner)
}

/// 注入已构建的扫描器
pub fn init_global_scanner_with(scanner: Scanner) -> RsyResult<()> {
    if GLOBAL_SCANNER.get().is_some() {
        log::debug!("Global scanner already initialized, skip injected scanner");
        return Ok(());
    }
    GLOBAL_SCANNER.set(Arc::new(scanner)).map_err(|_| {
        RsyaraError::ScannerInitError(
            "Global scanner initialization failed: instance already initialized by another thread".to_string(),
        )
    })?;
    log::info!("Global scanner initialized successfully");
    Ok(())
}

/// 获取全局扫描器
pub fn global_scanner() -> RsyResult<Arc<Scanner>> {
    GLOBAL_SCANNER.get().cloned().ok_or(RsyaraError::ScannerNotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        // 测试场景：首次初始化生效，后续初始化被忽略
        init_global_scanner(
            &ScanConfig::default(),
            &[r#"rule global_hit { strings: $a = "gl0bal" condition: $a }"#],
        )
        .unwrap();
        init_global_scanner(&ScanConfig::default(), &["rule other { condition: true }"]).unwrap();

        let scanner = global_scanner().unwrap();
        let results = scanner.scan(Some(b"gl0bal".as_slice()), None, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result.matching_rules[0].identifier, "global_hit");
        assert!(scanner.scan(Some(b"".as_slice()), None, None).unwrap().is_empty());
    }
}
