//! # 图片差异比对：命令行入口
//!
//! ```text
//! image-comparer <left> <right> <output> [threshold] [--background] [--outline] [--profile NAME]
//! ```
//!
//! 输出格式由输出文件扩展名决定（png / jpg）。

use std::path::PathBuf;
use std::time::Duration;

use image_comparer::codec::{self, ResultFormat};
use image_comparer::comparer::{CompareError, CompareService, JobState};
use image_comparer::error::AppError;

const USAGE: &str =
    "用法: image-comparer <left> <right> <output> [threshold] [--background] [--outline] [--profile NAME]";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, PartialEq)]
struct CliArgs {
    left: PathBuf,
    right: PathBuf,
    output: PathBuf,
    threshold: Option<u32>,
    background: bool,
    outline: bool,
    profile: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, AppError> {
    let mut positional = Vec::new();
    let mut background = false;
    let mut outline = false;
    let mut profile = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--background" => background = true,
            "--outline" => outline = true,
            "--profile" => {
                let name = args
                    .next()
                    .ok_or_else(|| AppError::Usage("--profile 缺少档位名称".to_string()))?;
                profile = Some(name);
            }
            flag if flag.starts_with("--") => {
                return Err(AppError::Usage(format!("未知参数 {}\n{}", flag, USAGE)));
            }
            _ => positional.push(arg),
        }
    }

    if background && outline {
        return Err(AppError::Usage("--background 与 --outline 不能同时使用".to_string()));
    }

    let mut positional = positional.into_iter();
    let (Some(left), Some(right), Some(output)) =
        (positional.next(), positional.next(), positional.next())
    else {
        return Err(AppError::Usage(USAGE.to_string()));
    };

    let threshold = positional
        .next()
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|e| AppError::Usage(format!("阈值无效 '{}'：{}", raw, e)))
        })
        .transpose()?;

    if let Some(extra) = positional.next() {
        return Err(AppError::Usage(format!("多余的参数 {}\n{}", extra, USAGE)));
    }

    Ok(CliArgs {
        left: left.into(),
        right: right.into(),
        output: output.into(),
        threshold,
        background,
        outline,
        profile,
    })
}

async fn run(args: CliArgs) -> Result<(), AppError> {
    let format = ResultFormat::from_path(&args.output)?;
    let service = CompareService::new()?;
    if let Some(profile) = &args.profile {
        service.set_profile(profile)?;
    }

    let limits = service.decode_limits();
    let left = codec::decode_upload(&std::fs::read(&args.left)?, &limits)?;
    let right = codec::decode_upload(&std::fs::read(&args.right)?, &limits)?;

    let id = if args.outline {
        service.process_outline(Some(left), Some(right), args.threshold)?
    } else if args.background {
        let job = service.process_in_background(Some(left), Some(right), args.threshold)?;
        let id = job.id().to_string();

        loop {
            let state: JobState = service.get_state(&id)?.parse()?;
            log::info!("任务 {} 状态: {}", id, state);
            match state {
                JobState::Completed => break,
                JobState::Failed => {
                    let event = job.wait().await?;
                    return Err(CompareError::Background(event.error.unwrap_or_default()).into());
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }

        job.id()
    } else {
        service.process(Some(left), Some(right), args.threshold)?
    };

    let image = service.get_image(&id.to_string())?;
    std::fs::write(&args.output, codec::encode_result(&image, format)?)?;

    log::info!(
        "✅ 结果已写入 {} ({})",
        args.output.display(),
        format.mime_type()
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(2);
        }
    };

    if let Err(err) = run(args).await {
        log::error!("❌ 比对失败 [{}]: {}", err.code(), err);
        std::process::exit(1);
    }
}
