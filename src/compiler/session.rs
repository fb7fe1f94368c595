//! 编译会话：规则源摄入 → 一次性构建 → 绑定扫描端 → 显式关闭
//! 状态由 SessionState 检查，关闭后的任何操作都返回生命周期错误
use std::fmt;
use std::path::{Path, PathBuf};

use crate::backend::{GlobalValue, NativeBackend, NativeCompiler, RuleCompilerBackend, ScanBackend};
use crate::cache::RuleCacheManager;
use crate::config::ScanConfig;
use crate::error::{LifecycleError, RsyResult, RsyaraError};
use crate::result::ScanResult;

/// 会话状态（对外只读视图）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ingesting,
    Built,
    BuildFailed,
    Closed,
}

enum SessionState {
    Ingesting(Box<dyn RuleCompilerBackend>),
    Built(Box<dyn ScanBackend>),
    BuildFailed,
    Closed,
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            SessionState::Ingesting(_) => SessionStatus::Ingesting,
            SessionState::Built(_) => SessionStatus::Built,
            SessionState::BuildFailed => SessionStatus::BuildFailed,
            SessionState::Closed => SessionStatus::Closed,
        }
    }
}

/// 编译会话，独占持有编译端与构建后的扫描端
pub struct CompilerSession {
    state: SessionState,
    current_namespace: Option<String>,
    source_count: usize,
}

impl fmt::Debug for CompilerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerSession")
            .field("status", &self.state.status())
            .field("current_namespace", &self.current_namespace)
            .field("source_count", &self.source_count)
            .finish()
    }
}

impl CompilerSession {
    /// 基于原生引擎创建会话
    pub fn new(config: &ScanConfig) -> Self {
        let compiler = NativeCompiler::new(config.compiler).with_scan_timeout(config.scan_timeout());
        Self::with_backend(Box::new(compiler))
    }

    /// 使用自定义编译端
    pub fn with_backend(compiler: Box<dyn RuleCompilerBackend>) -> Self {
        Self {
            state: SessionState::Ingesting(compiler),
            current_namespace: None,
            source_count: 0,
        }
    }

    /// 直接包装已构建的扫描端
    pub fn from_built(backend: Box<dyn ScanBackend>) -> Self {
        Self {
            state: SessionState::Built(backend),
            current_namespace: None,
            source_count: 0,
        }
    }

    /// 从规则缓存恢复已构建会话
    pub fn from_cache(path: impl AsRef<Path>, config: &ScanConfig) -> RsyResult<Self> {
        let serialized = RuleCacheManager::load_from_cache(path.as_ref())?;
        let backend = NativeBackend::from_serialized(&serialized, config.scan_timeout())?;
        log::info!(
            "Compiler session restored from cache | Path: {} | Rules: {}",
            path.as_ref().display(),
            backend.rule_count()
        );
        Ok(Self::from_built(Box::new(backend)))
    }

    #[inline]
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// 当前命名空间（未设置时为 None，引擎使用默认命名空间）
    pub fn current_namespace(&self) -> Option<&str> {
        self.current_namespace.as_deref()
    }

    /// 已接受的规则源单元数
    pub fn source_count(&self) -> usize {
        self.source_count
    }

    fn misuse(&self) -> RsyaraError {
        let err = match self.state {
            SessionState::Ingesting(_) => LifecycleError::NotBuilt,
            SessionState::Built(_) => LifecycleError::AlreadyBuilt,
            SessionState::BuildFailed => LifecycleError::BuildFailed,
            SessionState::Closed => LifecycleError::Closed,
        };
        log::error!("Compiler session misuse | Status: {:?} | Error: {}", self.status(), err);
        err.into()
    }

    fn compiler(&mut self) -> RsyResult<&mut Box<dyn RuleCompilerBackend>> {
        if !matches!(self.state, SessionState::Ingesting(_)) {
            return Err(self.misuse());
        }
        match &mut self.state {
            SessionState::Ingesting(compiler) => Ok(compiler),
            _ => Err(LifecycleError::AlreadyBuilt.into()),
        }
    }

    fn backend(&mut self) -> RsyResult<&mut Box<dyn ScanBackend>> {
        if !matches!(self.state, SessionState::Built(_)) {
            return Err(self.misuse());
        }
        match &mut self.state {
            SessionState::Built(backend) => Ok(backend),
            _ => Err(LifecycleError::NotBuilt.into()),
        }
    }

    // ===== 摄入 =====

    /// 设置后续规则源的命名空间
    pub fn add_namespace(&mut self, name: &str) -> RsyResult<()> {
        self.compiler()?.add_namespace(name)?;
        self.current_namespace = Some(name.to_string());
        Ok(())
    }

    /// 添加规则源文本
    pub fn add_source(&mut self, source: &str) -> RsyResult<()> {
        self.compiler()?.add_source(source)?;
        self.source_count += 1;
        Ok(())
    }

    /// 添加规则文件，支持 `;` 分隔的多个路径
    pub fn add_file(&mut self, paths: &str) -> RsyResult<()> {
        let paths = split_paths(paths)?;
        for path in &paths {
            self.compiler()?.add_file(path)?;
            self.source_count += 1;
        }
        Ok(())
    }

    /// 添加规则文件/目录，每个文件使用以其路径命名的独立命名空间
    pub fn add_file_with_namespace(&mut self, paths: &str) -> RsyResult<()> {
        let paths = split_paths(paths)?;
        self.add_paths(&paths, true).map(|_| ())
    }

    /// 添加文件/目录，返回实际加入的规则文件数
    pub fn add_paths(&mut self, paths: &[PathBuf], path_as_namespace: bool) -> RsyResult<usize> {
        let added = self.compiler()?.add_paths(paths, path_as_namespace)?;
        self.source_count += added;
        Ok(added)
    }

    /// 忽略规则中导入的模块
    pub fn ignore_module(&mut self, module: &str) -> RsyResult<()> {
        self.compiler()?.ignore_module(module)
    }

    /// 定义外部全局变量
    pub fn define_global(&mut self, ident: &str, value: GlobalValue) -> RsyResult<()> {
        self.compiler()?.define_global(ident, value)
    }

    // ===== 构建 =====

    /// 一次性构建：冻结规则集并绑定扫描端，不可重复调用
    pub fn build(&mut self) -> RsyResult<()> {
        if !matches!(self.state, SessionState::Ingesting(_)) {
            return Err(self.misuse());
        }
        let SessionState::Ingesting(compiler) = std::mem::replace(&mut self.state, SessionState::BuildFailed) else {
            return Err(LifecycleError::AlreadyBuilt.into());
        };
        match compiler.build() {
            Ok(backend) => {
                log::info!(
                    "Compiler session built | Sources: {} | Rules: {}",
                    self.source_count,
                    backend.rule_count()
                );
                self.state = SessionState::Built(backend);
                Ok(())
            }
            Err(e) => {
                log::warn!("Compiler session build failed | Sources: {} | Error: {}", self.source_count, e);
                Err(e)
            }
        }
    }

    // ===== 扫描 =====

    /// 使用绑定的扫描端扫描字节缓冲
    pub fn scan(&mut self, data: &[u8]) -> RsyResult<Option<ScanResult>> {
        self.backend()?.scan(data)
    }

    /// 尚未构建时视为没有原生规则（返回 None），构建失败或已关闭仍为生命周期错误
    pub fn scan_if_built(&mut self, data: &[u8]) -> RsyResult<Option<ScanResult>> {
        if matches!(self.state, SessionState::Ingesting(_)) {
            log::trace!("Native scan skipped, session not built | Bytes: {}", data.len());
            return Ok(None);
        }
        self.scan(data)
    }

    /// 已构建规则数
    pub fn rule_count(&mut self) -> RsyResult<usize> {
        Ok(self.backend()?.rule_count())
    }

    /// 导出序列化的规则集（用于缓存）
    pub fn export(&mut self) -> RsyResult<Vec<u8>> {
        self.backend()?.serialize()
    }

    // ===== 释放 =====

    /// 释放编译端与扫描端，重复调用为空操作
    /// 返回本次调用是否实际释放了资源
    pub fn close(&mut self) -> bool {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Closed => false,
            previous => {
                log::debug!("Compiler session closed | Previous status: {:?}", previous.status());
                drop(previous);
                true
            }
        }
    }
}

impl Drop for CompilerSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn split_paths(paths: &str) -> RsyResult<Vec<PathBuf>> {
    let list: Vec<PathBuf> = paths
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect();
    if list.is_empty() {
        return Err(RsyaraError::InvalidInput(format!("规则文件路径为空: {:?}", paths)));
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn session() -> CompilerSession {
        CompilerSession::new(&ScanConfig::default())
    }

    #[test]
    fn test_build_and_scan() {
        let mut session = session();
        session.add_source(r#"rule foo { strings: $a = "foo" condition: $a }"#).unwrap();
        session.add_namespace("second").unwrap();
        session.add_source(r#"rule foo { strings: $a = "foo" condition: $a }"#).unwrap();
        assert_eq!(session.current_namespace(), Some("second"));
        session.build().unwrap();

        let result = session.scan(b"foo").unwrap().unwrap();
        let mut names: Vec<String> = result.matching_rules.iter().map(|r| r.qualified_name()).collect();
        names.sort();
        assert_eq!(names, vec!["default:foo", "second:foo"]);
        assert!(session.scan(b"bar").unwrap().is_none());
        assert_eq!(session.rule_count().unwrap(), 2);
    }

    #[test]
    fn test_lifecycle_misuse() {
        // 测试场景：构建前扫描、重复构建、构建后添加、关闭后使用
        let mut session = session();
        assert!(matches!(
            session.scan(b"x"),
            Err(RsyaraError::Lifecycle(LifecycleError::NotBuilt))
        ));
        assert!(session.scan_if_built(b"x").unwrap().is_none());
        session.build().unwrap();
        assert!(matches!(
            session.build(),
            Err(RsyaraError::Lifecycle(LifecycleError::AlreadyBuilt))
        ));
        assert!(matches!(
            session.add_source("rule a { condition: true }"),
            Err(RsyaraError::Lifecycle(LifecycleError::AlreadyBuilt))
        ));
        assert!(session.close());
        assert!(!session.close());
        assert!(matches!(
            session.scan(b"x"),
            Err(RsyaraError::Lifecycle(LifecycleError::Closed))
        ));
        assert!(matches!(
            session.scan_if_built(b"x"),
            Err(RsyaraError::Lifecycle(LifecycleError::Closed))
        ));
    }

    #[test]
    fn test_compile_error_keeps_session_usable() {
        let mut session = session();
        assert!(matches!(session.add_source("rule broken {"), Err(RsyaraError::Compile(_))));
        session.add_source("rule ok { condition: true }").unwrap();
        assert_eq!(session.source_count(), 1);
        session.build().unwrap();
        assert!(session.scan(b"").unwrap().is_some());
    }

    #[test]
    fn test_build_error_is_terminal() {
        // 测试场景：规则源均被接受，构建期失败后会话不可再用
        let released = Arc::new(AtomicUsize::new(0));
        let mut session = CompilerSession::with_backend(Box::new(CountingCompiler {
            released: released.clone(),
            fail_build: true,
        }));
        session.add_source("rule a { condition: true }").unwrap();
        assert!(matches!(session.build(), Err(RsyaraError::Build(_))));
        assert_eq!(session.status(), SessionStatus::BuildFailed);
        assert!(matches!(
            session.build(),
            Err(RsyaraError::Lifecycle(LifecycleError::BuildFailed))
        ));
        assert!(matches!(
            session.scan_if_built(b"x"),
            Err(RsyaraError::Lifecycle(LifecycleError::BuildFailed))
        ));
        assert!(session.close());
    }

    #[test]
    fn test_globals_forwarded_before_build() {
        let mut session = session();
        session.define_global("limit", GlobalValue::Integer(4)).unwrap();
        session.ignore_module("unsupported").unwrap();
        session.add_source("rule small { condition: filesize < limit }").unwrap();
        session.build().unwrap();
        assert!(session.scan(b"abc").unwrap().is_some());
        assert!(session.scan(b"abcdef").unwrap().is_none());
        assert!(matches!(
            session.define_global("late", GlobalValue::Bool(true)),
            Err(RsyaraError::Lifecycle(LifecycleError::AlreadyBuilt))
        ));

        let mut mock = CompilerSession::with_backend(Box::new(CountingCompiler {
            released: Arc::new(AtomicUsize::new(0)),
            fail_build: false,
        }));
        assert!(matches!(mock.ignore_module("pe"), Err(RsyaraError::InvalidInput(_))));
    }

    #[test]
    fn test_add_file_split_and_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yar");
        let b = dir.path().join("b.yar");
        std::fs::write(&a, r#"rule ra { strings: $a = "alpha" condition: $a }"#).unwrap();
        std::fs::write(&b, r#"rule rb { strings: $b = "beta" condition: $b }"#).unwrap();

        let mut session = session();
        session
            .add_file(&format!("{};{}", a.display(), b.display()))
            .unwrap();
        assert_eq!(session.source_count(), 2);
        assert!(matches!(session.add_file(" ; "), Err(RsyaraError::InvalidInput(_))));
        assert!(matches!(
            session.add_file("/no/such/rules.yar"),
            Err(RsyaraError::Compile(_))
        ));
        session.build().unwrap();
        assert_eq!(session.scan(b"alpha beta").unwrap().unwrap().matching_rules.len(), 2);

        let mut per_file = CompilerSession::new(&ScanConfig::default());
        per_file.add_file_with_namespace(&a.display().to_string()).unwrap();
        per_file.build().unwrap();
        let result = per_file.scan(b"alpha").unwrap().unwrap();
        assert_eq!(result.matching_rules[0].namespace, a.display().to_string());
    }

    struct CountingCompiler {
        released: Arc<AtomicUsize>,
        fail_build: bool,
    }

    struct CountingBackend {
        released: Arc<AtomicUsize>,
    }

    impl Drop for CountingBackend {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RuleCompilerBackend for CountingCompiler {
        fn add_namespace(&mut self, _name: &str) -> RsyResult<()> {
            Ok(())
        }
        fn add_source(&mut self, _source: &str) -> RsyResult<()> {
            Ok(())
        }
        fn add_file(&mut self, _path: &Path) -> RsyResult<()> {
            Ok(())
        }
        fn add_paths(&mut self, paths: &[PathBuf], _path_as_namespace: bool) -> RsyResult<usize> {
            Ok(paths.len())
        }
        fn build(self: Box<Self>) -> RsyResult<Box<dyn ScanBackend>> {
            if self.fail_build {
                return Err(RsyaraError::Build("unresolved rule reference".to_string()));
            }
            Ok(Box::new(CountingBackend {
                released: self.released.clone(),
            }))
        }
    }

    impl ScanBackend for CountingBackend {
        fn scan(&mut self, _data: &[u8]) -> RsyResult<Option<ScanResult>> {
            Ok(None)
        }
        fn rule_count(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_close_releases_once() {
        // 测试场景：close 两次 + drop，底层资源只释放一次
        let released = Arc::new(AtomicUsize::new(0));
        let mut session = CompilerSession::with_backend(Box::new(CountingCompiler {
            released: released.clone(),
            fail_build: false,
        }));
        session.build().unwrap();
        assert!(session.close());
        assert!(!session.close());
        drop(session);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(matches!(
            CompilerSession::from_built(Box::new(CountingBackend { released: released.clone() })).export(),
            Err(RsyaraError::InvalidInput(_))
        ));
    }
}
