//! svg-scraper CLI
//!
//! コレクションページのSVGを一括ダウンロードする。

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use svg_scraper::doctor::run_checks;
use svg_scraper::{CollectionReport, ExtractionStrategy, ScraperConfig, SvgCollector};
use tracing_subscriber::EnvFilter;

/// SVGコレクションダウンローダー
#[derive(Parser, Debug)]
#[command(name = "svg-scraper")]
#[command(version)]
#[command(about = "Download every SVG from an icon collection page", long_about = None)]
struct Cli {
    /// ログを詳細にする (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// エラー以外のログを抑制する
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// コレクションページからSVGをダウンロードする
    Run {
        /// コレクションページのURL
        #[arg(value_name = "URL")]
        url: String,

        /// 成功したダウンロード数の上限（0: 無制限）
        #[arg(long, value_name = "N")]
        max_downloads: Option<usize>,

        /// ヘッドレスで起動する
        #[arg(long, conflicts_with = "no_headless")]
        headless: bool,

        /// ブラウザウィンドウを表示する
        #[arg(long)]
        no_headless: bool,

        /// 操作ごとの遅延（ミリ秒）
        #[arg(long, value_name = "MS")]
        slow_mo: Option<u64>,

        /// 保存先ディレクトリ
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// リンク抽出方式
        #[arg(long, value_name = "STRATEGY")]
        strategy: Option<ExtractionStrategy>,

        /// 2ページ目以降も辿る
        #[arg(long)]
        paginate: bool,

        /// 結果をJSONで出力する
        #[arg(long)]
        json: bool,

        /// ブロック検出時にスクリーンショットをログに残す
        #[arg(long)]
        debug: bool,
    },

    /// 実行環境を診断する
    Doctor {
        /// 保存先ディレクトリ
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// 結果をJSONで出力する
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Command::Run {
            url,
            max_downloads,
            headless,
            no_headless,
            slow_mo,
            output,
            strategy,
            paginate,
            json,
            debug,
        } => {
            let overrides = RunOverrides {
                max_downloads,
                headless: if no_headless {
                    Some(false)
                } else if headless {
                    Some(true)
                } else {
                    None
                },
                slow_mo,
                output,
                strategy,
                paginate,
                debug,
            };
            handle_run(&url, overrides, json).await
        }
        Command::Doctor { output, json } => handle_doctor(output, json),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// ログ出力の設定（RUST_LOGがあればそちらを優先）
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("svg_scraper=info,warn"),
                1 => EnvFilter::new("svg_scraper=debug,info"),
                2 => EnvFilter::new("svg_scraper=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct RunOverrides {
    max_downloads: Option<usize>,
    headless: Option<bool>,
    slow_mo: Option<u64>,
    output: Option<PathBuf>,
    strategy: Option<ExtractionStrategy>,
    paginate: bool,
    debug: bool,
}

impl RunOverrides {
    fn apply(self, mut config: ScraperConfig) -> ScraperConfig {
        if self.max_downloads.is_some() {
            config = config.with_max_downloads(self.max_downloads);
        }
        if let Some(headless) = self.headless {
            config = config.with_headless(headless);
        }
        if let Some(ms) = self.slow_mo {
            config = config.with_slow_mo(Duration::from_millis(ms));
        }
        if let Some(dir) = self.output {
            config = config.with_download_dir(dir);
        }
        if let Some(strategy) = self.strategy {
            config = config.with_strategy(strategy);
        }
        if self.paginate {
            config = config.with_paginate(true);
        }
        if self.debug {
            config = config.with_debug(true);
        }
        config
    }
}

async fn handle_run(url: &str, overrides: RunOverrides, json: bool) -> anyhow::Result<ExitCode> {
    let config = overrides.apply(ScraperConfig::from_env().context("failed to load configuration")?);
    config.validate()?;

    tracing::info!(
        "Saving SVGs to {} (strategy={}, headless={})",
        config.download_dir.display(),
        config.strategy,
        config.headless
    );

    let collector = SvgCollector::new(config);
    let report = collector
        .run(url)
        .await
        .with_context(|| format!("failed to process collection {}", url))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(report: &CollectionReport) {
    if report.no_links_found() {
        println!("No SVG links found on {}", report.collection_url);
    }
    println!(
        "downloaded {} of {}",
        report.succeeded(),
        report.candidates_found()
    );
    let failures: Vec<_> = report.results().filter(|r| !r.is_success()).collect();
    if !failures.is_empty() {
        println!("failed ({}):", failures.len());
        for result in failures {
            println!(
                "  {} ({})",
                result.url,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn handle_doctor(output: Option<PathBuf>, json: bool) -> anyhow::Result<ExitCode> {
    let mut config = ScraperConfig::from_env().context("failed to load configuration")?;
    if let Some(dir) = output {
        config = config.with_download_dir(dir);
    }

    let checks = run_checks(&config);
    if json {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else {
        for check in &checks {
            let mark = if check.passed { "✓" } else { "✗" };
            println!("{} {}: {}", mark, check.name, check.detail);
        }
    }

    if checks.iter().all(|c| c.passed) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
