//! yara-x 适配层
//! yara_x::Compiler 不是 Send：编译器驻留在专用线程，编译请求经通道串行提交；
//! 构建产物 yara_x::Rules 可跨线程共享，扫描端每次扫描创建一个 yara_x::Scanner
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use walkdir::WalkDir;
use yara_x::SourceCode;

use crate::backend::convert;
use crate::backend::{GlobalValue, RuleCompilerBackend, ScanBackend};
use crate::config::CompilerOptions;
use crate::error::{RsyResult, RsyaraError};
use crate::result::ScanResult;

// ======================== 编译线程 ========================

/// 对编译器的单次修改
enum CompileRequest {
    Namespace(String),
    IgnoreModule(String),
    DefineGlobal(String, GlobalValue),
    Source { code: Vec<u8>, origin: Option<String> },
}

enum Command {
    Apply(CompileRequest, Sender<Result<(), String>>),
    Build(Sender<yara_x::Rules>),
}

fn new_compiler<'a>(options: CompilerOptions) -> yara_x::Compiler<'a> {
    let mut compiler = yara_x::Compiler::new();
    compiler.relaxed_re_syntax(options.relaxed_re_syntax);
    compiler.error_on_slow_pattern(options.error_on_slow_pattern);
    compiler
}

fn apply(compiler: &mut yara_x::Compiler<'_>, request: CompileRequest) -> Result<(), String> {
    match request {
        CompileRequest::Namespace(name) => {
            compiler.new_namespace(&name);
            Ok(())
        }
        CompileRequest::IgnoreModule(module) => {
            compiler.ignore_module(module);
            Ok(())
        }
        CompileRequest::DefineGlobal(ident, value) => {
            let defined = match value {
                GlobalValue::Bool(v) => compiler.define_global(&ident, v),
                GlobalValue::Integer(v) => compiler.define_global(&ident, v),
                GlobalValue::Float(v) => compiler.define_global(&ident, v),
                GlobalValue::String(v) => compiler.define_global(&ident, v.as_str()),
            };
            defined.map(|_| ()).map_err(|e| e.to_string())
        }
        CompileRequest::Source { code, origin } => {
            let mut source = SourceCode::from(code.as_slice());
            if let Some(origin) = origin.as_deref() {
                source = source.with_origin(origin);
            }
            compiler.add_source(source).map(|_| ()).map_err(|e| e.to_string())
        }
    }
}

fn serve(options: CompilerOptions, commands: Receiver<Command>) {
    let mut compiler = new_compiler(options);
    while let Ok(command) = commands.recv() {
        match command {
            Command::Apply(request, reply) => {
                let _ = reply.send(apply(&mut compiler, request));
            }
            Command::Build(reply) => {
                let _ = reply.send(compiler.build());
                return;
            }
        }
    }
    log::debug!("Compiler worker released without build");
}

/// 持有编译器的工作线程，释放时等待线程退出
struct CompileWorker {
    commands: Option<Sender<Command>>,
    handle: Option<JoinHandle<()>>,
}

impl CompileWorker {
    fn spawn(options: CompilerOptions) -> RsyResult<Self> {
        let (commands, inbox) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("rsyara-compiler".to_string())
            .spawn(move || serve(options, inbox))?;
        log::debug!(
            "Compiler worker started | Relaxed re syntax: {} | Error on slow pattern: {}",
            options.relaxed_re_syntax,
            options.error_on_slow_pattern
        );
        Ok(Self {
            commands: Some(commands),
            handle: Some(handle),
        })
    }

    fn send(&self, command: Command) -> RsyResult<()> {
        self.commands
            .as_ref()
            .ok_or_else(worker_lost)?
            .send(command)
            .map_err(|_| worker_lost())
    }

    fn apply(&self, request: CompileRequest) -> RsyResult<()> {
        let (reply, result) = mpsc::channel();
        self.send(Command::Apply(request, reply))?;
        match result.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(RsyaraError::Compile(message)),
            Err(_) => Err(worker_lost()),
        }
    }

    fn build(self) -> RsyResult<yara_x::Rules> {
        let (reply, rules) = mpsc::channel();
        self.send(Command::Build(reply))?;
        rules.recv().map_err(|_| worker_lost())
    }
}

impl Drop for CompileWorker {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Compiler worker panicked");
            }
        }
    }
}

fn worker_lost() -> RsyaraError {
    RsyaraError::Build("规则编译线程已退出".to_string())
}

// ======================== 编译端 ========================

/// 原生编译端，首个编译请求时启动编译线程
pub struct NativeCompiler {
    options: CompilerOptions,
    scan_timeout: Option<Duration>,
    worker: Option<CompileWorker>,
}

impl fmt::Debug for NativeCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCompiler")
            .field("options", &self.options)
            .field("scan_timeout", &self.scan_timeout)
            .field("worker_started", &self.worker.is_some())
            .finish()
    }
}

impl NativeCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            scan_timeout: None,
            worker: None,
        }
    }

    /// 构建后扫描端使用的超时
    pub fn with_scan_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scan_timeout = timeout;
        self
    }

    fn submit(&mut self, request: CompileRequest) -> RsyResult<()> {
        if self.worker.is_none() {
            self.worker = Some(CompileWorker::spawn(self.options)?);
        }
        match &self.worker {
            Some(worker) => worker.apply(request),
            None => Err(worker_lost()),
        }
    }

    /// 收集待编译文件：文件原样保留，目录递归收集 .yar / .yara（按文件名排序）
    fn collect_rule_files(path: &Path) -> RsyResult<Vec<PathBuf>> {
        if !path.is_dir() {
            return Ok(vec![path.to_path_buf()]);
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| RsyaraError::Compile(format!("遍历规则目录 {} 失败: {}", path.display(), e)))?;
            if entry.file_type().is_file() && is_rule_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

fn is_rule_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yar") || ext.eq_ignore_ascii_case("yara"))
}

impl RuleCompilerBackend for NativeCompiler {
    fn add_namespace(&mut self, name: &str) -> RsyResult<()> {
        if name.trim().is_empty() {
            return Err(RsyaraError::Compile("命名空间不能为空".to_string()));
        }
        self.submit(CompileRequest::Namespace(name.to_string()))
    }

    fn add_source(&mut self, source: &str) -> RsyResult<()> {
        self.submit(CompileRequest::Source {
            code: source.as_bytes().to_vec(),
            origin: None,
        })
    }

    fn add_file(&mut self, path: &Path) -> RsyResult<()> {
        let code = std::fs::read(path)
            .map_err(|e| RsyaraError::Compile(format!("无法读取规则文件 {}: {}", path.display(), e)))?;
        self.submit(CompileRequest::Source {
            code,
            origin: Some(path.display().to_string()),
        })
    }

    fn add_paths(&mut self, paths: &[PathBuf], path_as_namespace: bool) -> RsyResult<usize> {
        let mut added = 0;
        for path in paths {
            for file in Self::collect_rule_files(path)? {
                if path_as_namespace {
                    self.add_namespace(&file.to_string_lossy())?;
                }
                self.add_file(&file)?;
                added += 1;
            }
        }
        log::debug!(
            "Rule paths added | Paths: {} | Files: {} | Path as namespace: {}",
            paths.len(),
            added,
            path_as_namespace
        );
        Ok(added)
    }

    fn ignore_module(&mut self, module: &str) -> RsyResult<()> {
        self.submit(CompileRequest::IgnoreModule(module.to_string()))
    }

    fn define_global(&mut self, ident: &str, value: GlobalValue) -> RsyResult<()> {
        self.submit(CompileRequest::DefineGlobal(ident.to_string(), value))
    }

    fn build(mut self: Box<Self>) -> RsyResult<Box<dyn ScanBackend>> {
        let rules = match self.worker.take() {
            Some(worker) => worker.build()?,
            // 未提交任何请求：当前线程直接构建空规则集
            None => new_compiler(self.options).build(),
        };
        Ok(Box::new(NativeBackend::new(rules, self.scan_timeout)))
    }
}

// ======================== 扫描端 ========================

/// 原生扫描端：持有不可变规则集，每次扫描创建一个 yara_x::Scanner
#[derive(Clone)]
pub struct NativeBackend {
    rules: Arc<yara_x::Rules>,
    scan_timeout: Option<Duration>,
}

impl fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBackend")
            .field("rules", &self.rule_count())
            .field("scan_timeout", &self.scan_timeout)
            .finish()
    }
}

impl NativeBackend {
    pub fn new(rules: yara_x::Rules, scan_timeout: Option<Duration>) -> Self {
        Self::from_shared(Arc::new(rules), scan_timeout)
    }

    pub fn from_shared(rules: Arc<yara_x::Rules>, scan_timeout: Option<Duration>) -> Self {
        Self { rules, scan_timeout }
    }

    /// 从序列化的规则集恢复
    pub fn from_serialized(bytes: &[u8], scan_timeout: Option<Duration>) -> RsyResult<Self> {
        let rules = yara_x::Rules::deserialize(bytes)
            .map_err(|e| RsyaraError::RuleCacheError(format!("规则集反序列化失败: {}", e)))?;
        Ok(Self::new(rules, scan_timeout))
    }

    pub fn rules(&self) -> &Arc<yara_x::Rules> {
        &self.rules
    }
}

impl ScanBackend for NativeBackend {
    fn scan(&mut self, data: &[u8]) -> RsyResult<Option<ScanResult>> {
        let mut scanner = yara_x::Scanner::new(&self.rules);
        if let Some(timeout) = self.scan_timeout {
            scanner.set_timeout(timeout);
        }
        let results = scanner.scan(data).map_err(|e| RsyaraError::Scan(e.to_string()))?;
        Ok(convert::scan_result(&results).into_non_empty())
    }

    fn rule_count(&self) -> usize {
        self.rules.iter().count()
    }

    fn serialize(&self) -> RsyResult<Vec<u8>> {
        self.rules
            .serialize()
            .map_err(|e| RsyaraError::RuleCacheError(format!("规则集序列化失败: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(src: &str) -> Box<dyn ScanBackend> {
        let mut compiler: Box<dyn RuleCompilerBackend> = Box::new(NativeCompiler::new(CompilerOptions::default()));
        compiler.add_source(src).unwrap();
        compiler.build().unwrap()
    }

    #[test]
    fn test_scan_absent_on_no_match() {
        // 测试场景：无命中返回 None 而非空结果
        let mut backend = build(r#"rule r { strings: $a = "foobar" condition: $a }"#);
        assert!(backend.scan(b"nothing here").unwrap().is_none());
        let hit = backend.scan(b"xfoobar").unwrap().unwrap();
        let m = hit.matching_rules[0].patterns[0].matches[0];
        assert_eq!((m.offset, m.length, m.xor_key), (1, 6, false));
        assert_eq!(backend.rule_count(), 1);
    }

    #[test]
    fn test_standard_rules_compile() {
        // 测试场景：常见 YARA 写法（整数读取、模块导入、for 循环）均可编译并扫描
        let mut backend = build(
            r#"
            import "pe"
            rule mz { condition: uint16(0) == 0x5A4D }
            rule not_pe { condition: not pe.is_pe }
            rule early { strings: $a = "abcd" condition: for any i in (1..#a) : (@a[i] < 10) }
            "#,
        );
        let result = backend.scan(b"MZabcd").unwrap().unwrap();
        let mut names: Vec<&str> = result.matching_rules.iter().map(|r| r.identifier.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["early", "mz", "not_pe"]);
        assert!(result.module_outputs.contains_key("pe"));
    }

    #[test]
    fn test_metadata_and_xor_matches() {
        let mut backend = build(
            r#"rule xored {
                meta: author = "me" level = 3 active = true
                strings: $a = "secret" xor(1-255)
                condition: $a
            }"#,
        );
        let encoded: Vec<u8> = b"secret".iter().map(|b| b ^ 0x20).collect();
        let result = backend.scan(&encoded).unwrap().unwrap();
        let rule = &result.matching_rules[0];
        assert_eq!(rule.namespace, "default");
        assert_eq!(rule.meta("author"), Some("me"));
        assert_eq!(rule.meta("level"), Some("3"));
        assert_eq!(rule.meta("active"), Some("true"));
        assert!(rule.patterns[0].matches[0].xor_key);
    }

    #[test]
    fn test_errors_are_mapped() {
        let mut compiler = NativeCompiler::new(CompilerOptions::default());
        assert!(matches!(compiler.add_source("rule {"), Err(RsyaraError::Compile(_))));
        assert!(matches!(compiler.add_namespace(" "), Err(RsyaraError::Compile(_))));
        assert!(matches!(
            compiler.add_source("rule a { condition: nope }"),
            Err(RsyaraError::Compile(_))
        ));
        assert!(matches!(
            compiler.add_file(Path::new("/no/such/rules.yar")),
            Err(RsyaraError::Compile(_))
        ));
        // 被拒绝的规则源不影响后续构建
        compiler.add_source("rule ok { condition: true }").unwrap();
        assert_eq!(Box::new(compiler).build().unwrap().rule_count(), 1);
    }

    #[test]
    fn test_globals_and_ignored_modules() {
        let mut compiler = NativeCompiler::new(CompilerOptions::default());
        compiler.define_global("threshold", GlobalValue::Integer(3)).unwrap();
        compiler.define_global("tag", GlobalValue::String("x".into())).unwrap();
        compiler.ignore_module("no_such_module").unwrap();
        compiler
            .add_source(
                r#"import "no_such_module"
                rule g { condition: threshold == 3 and tag == "x" }"#,
            )
            .unwrap();
        let mut backend = Box::new(compiler).build().unwrap();
        assert_eq!(backend.scan(b"any").unwrap().unwrap().matching_rules[0].identifier, "g");
    }

    #[test]
    fn test_empty_build_without_requests() {
        let mut backend = Box::new(NativeCompiler::new(CompilerOptions::default())).build().unwrap();
        assert_eq!(backend.rule_count(), 0);
        assert!(backend.scan(b"data").unwrap().is_none());
    }

    #[test]
    fn test_add_paths_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.yar"), r#"rule ra { strings: $a = "alpha" condition: $a }"#).unwrap();
        std::fs::write(dir.path().join("sub").join("b.YARA"), r#"rule rb { strings: $b = "bravo" condition: $b }"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a rule").unwrap();

        let mut compiler = NativeCompiler::new(CompilerOptions::default());
        assert_eq!(compiler.add_paths(&[dir.path().to_path_buf()], true).unwrap(), 2);
        let mut backend = Box::new(compiler).build().unwrap();
        let result = backend.scan(b"alpha bravo").unwrap().unwrap();
        let mut namespaces: Vec<String> = result.matching_rules.iter().map(|r| r.namespace.clone()).collect();
        namespaces.sort();
        assert_eq!(
            namespaces,
            vec![
                dir.path().join("a.yar").to_string_lossy().to_string(),
                dir.path().join("sub").join("b.YARA").to_string_lossy().to_string(),
            ]
        );
    }

    #[test]
    fn test_serialize_roundtrip() {
        let backend = build(r#"rule r { strings: $a = "cached" condition: $a }"#);
        let bytes = backend.serialize().unwrap();
        let mut restored = NativeBackend::from_serialized(&bytes, None).unwrap();
        assert_eq!(restored.rule_count(), 1);
        assert!(restored.scan(b"cached").unwrap().is_some());
        assert!(matches!(
            NativeBackend::from_serialized(b"garbage", None),
            Err(RsyaraError::RuleCacheError(_))
        ));
    }
}
