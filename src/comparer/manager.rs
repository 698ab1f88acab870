//! # 比对任务管理
//!
//! ## 设计思路
//!
//! `ComparisonJobManager` 串起 “差异检测 → 绘制 → 存储” 三步，提供同步与后台两种处理方式：
//!
//! - `process`：同步完成全部工作后返回标识，状态直接登记为 `Completed`。
//! - `process_in_background`：先复制左图、存入存储、登记 `InProgress`，立即返回；
//!   绘制在 tokio 任务中进行，完成后状态转为 `Completed`（或出错时 `Failed`），
//!   并通过 `oneshot` 通道发出完成事件。
//!
//! ## 实现思路
//!
//! - 输入缺失、尺寸不一致等错误在返回前同步报告，此时不创建任何存储条目。
//! - 后台任务由外层任务监督内层绘制任务：内层 panic 会以 `JoinError` 形式被捕获，状态转为 `Failed`。
//! - 状态表只存放状态枚举，栅格本身由 `ResultStore` 持有；读取结果不需要等待任务结束。
//! - 处理管线（检测器 + 绘制器）放在 `RwLock` 中，每次请求取一次快照，支持运行期切换配置。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use image::RgbaImage;
use tokio::sync::oneshot;
use tokio::task::JoinError;

use super::{CompareError, DifferencePainter, Differ, JobId, RegionStream, ResultStore, SharedRaster};

/// 任务状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = CompareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Pending" => Ok(Self::Pending),
            "InProgress" => Ok(Self::InProgress),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            other => Err(CompareError::InvalidFormat(format!("未知任务状态：{}", other))),
        }
    }
}

/// 一次比对请求。左右图由请求层解码后传入，缺失时为 `None`。
#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub left: Option<RgbaImage>,
    pub right: Option<RgbaImage>,
    pub threshold: u32,
}

impl CompareRequest {
    pub fn new(left: RgbaImage, right: RgbaImage, threshold: u32) -> Self {
        Self {
            left: Some(left),
            right: Some(right),
            threshold,
        }
    }

    fn into_inputs(self) -> Result<(RgbaImage, RgbaImage, u32), CompareError> {
        let left = self.left.ok_or(CompareError::MissingInput("left"))?;
        let right = self.right.ok_or(CompareError::MissingInput("right"))?;
        Ok((left, right, self.threshold))
    }
}

/// 后台任务结束时发出的完成事件。
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub id: JobId,
    pub state: JobState,
    pub painted_regions: usize,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// 已提交的后台任务：标识 + 完成通知。
///
/// 丢弃本结构不会取消任务，状态仍可通过 `get_state` 轮询。
#[derive(Debug)]
pub struct BackgroundJob {
    id: JobId,
    completion: oneshot::Receiver<JobEvent>,
}

impl BackgroundJob {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// 等待任务结束。
    pub async fn wait(self) -> Result<JobEvent, CompareError> {
        let Self { id, completion } = self;
        completion
            .await
            .map_err(|_| CompareError::Background(format!("任务 {} 未发送完成通知", id)))
    }
}

#[derive(Clone)]
struct Pipeline {
    differ: Arc<dyn Differ>,
    painter: Arc<DifferencePainter>,
}

type StateTable = Mutex<HashMap<JobId, JobState>>;

/// 比对任务管理器。
pub struct ComparisonJobManager {
    pipeline: RwLock<Pipeline>,
    store: Arc<ResultStore>,
    states: Arc<StateTable>,
}

impl ComparisonJobManager {
    pub fn new(differ: Arc<dyn Differ>, painter: DifferencePainter, store: Arc<ResultStore>) -> Self {
        Self {
            pipeline: RwLock::new(Pipeline {
                differ,
                painter: Arc::new(painter),
            }),
            store,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 替换后续请求使用的检测器与绘制器。已提交的任务不受影响。
    pub fn replace_pipeline(&self, differ: Arc<dyn Differ>, painter: DifferencePainter) {
        let next = Pipeline {
            differ,
            painter: Arc::new(painter),
        };
        match self.pipeline.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => {
                log::warn!("处理管线锁已中毒，继续使用恢复数据");
                *poisoned.into_inner() = next;
            }
        }
    }

    fn pipeline_snapshot(&self) -> Pipeline {
        match self.pipeline.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                log::warn!("处理管线锁已中毒，继续使用恢复数据");
                poisoned.into_inner().clone()
            }
        }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// 同步比对并绘制，返回结果标识。
    pub fn process(&self, request: CompareRequest) -> Result<JobId, CompareError> {
        let (mut left, right, threshold) = request.into_inputs()?;
        let pipeline = self.pipeline_snapshot();
        let total_start = Instant::now();

        let diff_start = Instant::now();
        let regions: Vec<_> = pipeline.differ.differences(&left, &right, threshold)?.collect();
        let diff_elapsed = diff_start.elapsed();

        let paint_start = Instant::now();
        let painted = pipeline.painter.paint(&mut left, regions);
        let paint_elapsed = paint_start.elapsed();

        let (width, height) = left.dimensions();
        let store_start = Instant::now();
        let id = self.store.create(SharedRaster::new(left));
        set_state(&self.states, id, JobState::Completed);
        let store_elapsed = store_start.elapsed();

        log::info!(
            "✅ 同步比对完成 - id={} size={}x{} regions={} diff={}ms paint={}ms store={}ms total={}ms",
            id,
            width,
            height,
            painted,
            diff_elapsed.as_millis(),
            paint_elapsed.as_millis(),
            store_elapsed.as_millis(),
            total_start.elapsed().as_millis()
        );

        Ok(id)
    }

    /// 提交后台比对任务。返回时结果条目已存在，状态为 `InProgress`。
    ///
    /// 需要在 tokio 运行时内调用。
    pub fn process_in_background(&self, request: CompareRequest) -> Result<BackgroundJob, CompareError> {
        let (left, right, threshold) = request.into_inputs()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CompareError::Runtime(format!("后台比对需要 tokio 运行时：{}", e)))?;
        let pipeline = self.pipeline_snapshot();

        let target = SharedRaster::new(left.clone());
        let differences =
            pipeline
                .differ
                .differences_shared(&SharedRaster::new(left), &SharedRaster::new(right), threshold)?;

        let (width, height) = target.dimensions();
        let id = self.store.create(target.clone());
        set_state(&self.states, id, JobState::InProgress);

        let (sender, completion) = oneshot::channel();
        runtime.spawn(run_background_job(
            id,
            pipeline.painter,
            target,
            differences,
            Arc::clone(&self.states),
            sender,
        ));

        log::info!("🚀 已提交后台比对任务 - id={} size={}x{}", id, width, height);

        Ok(BackgroundJob { id, completion })
    }

    pub fn get_state(&self, id: &JobId) -> Result<JobState, CompareError> {
        lock_states(&self.states)
            .get(id)
            .copied()
            .ok_or_else(|| CompareError::NotFound(format!("任务不存在：'{}'", id)))
    }

    /// 读取结果栅格。任务未结束时返回的是绘制中途的图片。
    pub fn get_image(&self, id: &JobId) -> Result<SharedRaster, CompareError> {
        self.store
            .read(id)
            .ok_or_else(|| CompareError::NotFound(format!("结果不存在：'{}'", id)))
    }

    /// 直接保存一张已完成的结果图。
    pub fn store_result(&self, image: RgbaImage) -> JobId {
        let id = self.store.create(SharedRaster::new(image));
        set_state(&self.states, id, JobState::Completed);
        id
    }

    /// 删除结果条目；状态记录保留，仍可查询。
    pub fn delete_result(&self, id: &JobId) -> Result<(), CompareError> {
        self.store.delete(id)?;
        log::info!("🗑️ 已删除比对结果 - id={}", id);
        Ok(())
    }
}

async fn run_background_job(
    id: JobId,
    painter: Arc<DifferencePainter>,
    target: SharedRaster,
    differences: RegionStream,
    states: Arc<StateTable>,
    sender: oneshot::Sender<JobEvent>,
) {
    let started = Instant::now();
    let worker = tokio::spawn(async move { painter.paint_async(&target, differences).await });

    let (state, painted_regions, error) = match worker.await {
        Ok(Ok(painted)) => (JobState::Completed, painted, None),
        Ok(Err(err)) => (JobState::Failed, 0, Some(err.to_string())),
        Err(join_err) => (
            JobState::Failed,
            0,
            Some(CompareError::Background(describe_join_error(join_err)).to_string()),
        ),
    };
    let elapsed = started.elapsed();

    if !transition(&states, id, JobState::InProgress, state) {
        log::warn!("⚠️ 任务 {} 状态已不是 InProgress，跳过状态更新", id);
    }

    match &error {
        None => log::info!(
            "✅ 后台比对完成 - id={} regions={} total={}ms",
            id,
            painted_regions,
            elapsed.as_millis()
        ),
        Some(message) => log::error!("❌ 后台比对失败 - id={} {}", id, message),
    }

    let event = JobEvent {
        id,
        state,
        painted_regions,
        elapsed,
        error,
    };
    if sender.send(event).is_err() {
        log::debug!("任务 {} 的完成通知无人接收", id);
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "绘制任务被取消".to_string();
    }

    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知原因".to_string());
    format!("绘制任务 panic：{}", message)
}

fn lock_states(states: &StateTable) -> MutexGuard<'_, HashMap<JobId, JobState>> {
    match states.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("任务状态表锁已中毒，继续使用恢复数据");
            poisoned.into_inner()
        }
    }
}

fn set_state(states: &StateTable, id: JobId, state: JobState) {
    lock_states(states).insert(id, state);
}

/// 仅当当前状态为 `expected` 时才更新为 `next`。
fn transition(states: &StateTable, id: JobId, expected: JobState, next: JobState) -> bool {
    let mut guard = lock_states(states);
    match guard.get_mut(&id) {
        Some(current) if *current == expected => {
            *current = next;
            true
        }
        _ => false,
    }
}
