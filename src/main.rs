//! rsyara 命令行入口
//! 编译规则（或从缓存恢复）→ 注册插件 → 多通道扫描 → 输出加权结果 JSON
//!
//! 运行命令：
//! cargo run --features cli -- --rules rules/ --content sample.bin --comments comments.txt

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::{Builder, Env, Target};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rsyara::{ConfigManager, GlobalValue, PacingConfig, RegexPlugin, RuleDefinition, RulePlugin, ScanConfig, Scanner};

#[derive(Parser, Debug)]
#[command(name = "rsyara", version, about = "Weighted multi-channel rule scanner")]
struct Cli {
    /// 规则文件或目录（目录递归收集 .yar/.yara）
    #[arg(short, long, num_args = 1..)]
    rules: Vec<PathBuf>,

    /// 规则命名空间
    #[arg(short, long)]
    namespace: Option<String>,

    /// 每个规则文件使用以其路径命名的命名空间
    #[arg(long)]
    path_as_namespace: bool,

    /// 外部全局变量（NAME=VALUE，可重复）
    #[arg(short, long = "define", value_name = "NAME=VALUE")]
    define: Vec<String>,

    /// 忽略规则中导入的模块（可重复）
    #[arg(long = "ignore-module", value_name = "MODULE")]
    ignore_module: Vec<String>,

    /// 内容通道文件
    #[arg(long)]
    content: Option<PathBuf>,

    /// 注释通道文件
    #[arg(long)]
    comments: Option<PathBuf>,

    /// 元数据通道文件
    #[arg(long)]
    meta: Option<PathBuf>,

    /// 插件描述 JSON（RuleDefinition 数组，按字节正则匹配）
    #[arg(long)]
    plugins: Option<PathBuf>,

    /// 每个通道扫描前的固定延迟（毫秒）
    #[arg(long)]
    delay_ms: Option<u64>,

    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 构建后保存规则缓存
    #[arg(long)]
    save_cache: Option<PathBuf>,

    /// 从规则缓存恢复（忽略 --rules）
    #[arg(long)]
    load_cache: Option<PathBuf>,

    /// 格式化输出
    #[arg(long)]
    pretty: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<ScanConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigManager::from_json_file(path)?,
        None => ConfigManager::get_default(),
    };
    if let Some(delay_ms) = cli.delay_ms {
        config.pacing = PacingConfig::FixedDelay { delay_ms };
    }
    Ok(config)
}

fn build_scanner(cli: &Cli, config: &ScanConfig) -> anyhow::Result<Scanner> {
    if let Some(cache) = &cli.load_cache {
        return Scanner::from_cache(cache, config)
            .with_context(|| format!("failed to restore rules from {}", cache.display()));
    }
    if cli.rules.is_empty() {
        bail!("no rules given: use --rules or --load-cache");
    }

    let scanner = Scanner::with_config(config);
    for module in &cli.ignore_module {
        scanner.ignore_module(module)?;
    }
    for raw in &cli.define {
        let Some((name, value)) = raw.split_once('=') else {
            bail!("invalid --define {raw:?}: expected NAME=VALUE");
        };
        scanner.define_global(name, GlobalValue::parse(value))?;
    }
    if let Some(namespace) = &cli.namespace {
        scanner.add_namespace(namespace)?;
    }
    let files = scanner.add_paths(&cli.rules, cli.path_as_namespace)?;
    scanner.build()?;
    log::info!("Rules compiled | Files: {} | Path as namespace: {}", files, cli.path_as_namespace);

    if let Some(cache) = &cli.save_cache {
        scanner.save_cache(cache)?;
        log::info!("Rule cache saved | Path: {}", cache.display());
    }
    Ok(scanner)
}

fn load_plugins(path: &Path) -> anyhow::Result<Vec<Arc<dyn RulePlugin>>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let definitions: Vec<RuleDefinition> = serde_json::from_str(&content)?;
    let mut plugins: Vec<Arc<dyn RulePlugin>> = Vec::with_capacity(definitions.len());
    for definition in definitions {
        plugins.push(Arc::new(RegexPlugin::from_definition(definition)?));
    }
    Ok(plugins)
}

fn read_channel(path: Option<&Path>) -> anyhow::Result<Option<Vec<u8>>> {
    path
        .map(|p| std::fs::read(p).with_context(|| format!("failed to read {}", p.display())))
        .transpose()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ========== 1. 日志系统初始化 ==========
    let level = if cli.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(level))
        .target(Target::Stderr)
        .init();

    // ========== 2. 配置与规则 ==========
    let config = load_config(&cli)?;
    let scanner = build_scanner(&cli, &config)?;
    if let Some(path) = &cli.plugins {
        scanner.register_all(load_plugins(path)?);
    }

    // ========== 3. 多通道扫描 ==========
    let content = read_channel(cli.content.as_deref())?;
    let comments = read_channel(cli.comments.as_deref())?;
    let meta = read_channel(cli.meta.as_deref())?;

    let start = Instant::now();
    let outcome = scanner.scan_detailed(content.as_deref(), comments.as_deref(), meta.as_deref())?;
    log::info!(
        "Scan finished | Results: {} | Plugin failures: {} | Elapsed: {:?}",
        outcome.results.len(),
        outcome.plugin_failures.len(),
        start.elapsed()
    );

    // ========== 4. 输出 ==========
    let json = if cli.pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{}", json);

    scanner.close();
    Ok(())
}
