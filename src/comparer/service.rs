//! # 服务层
//!
//! ## 设计思路
//!
//! `CompareService` 面向请求层：入参为已解码的图片（缺失时为 `None`）与字符串形式的任务标识，
//! 出参为字符串状态或图片快照，错误统一为 `CompareError`，可直接取 `code()` 透传。
//!
//! ## 实现思路
//!
//! - 配置放在 `RwLock` 中，每个请求只读取一次快照。
//! - 切换档位或设置时先在副本上装配组件，成功后再一并替换配置与处理管线。
//! - 轮廓比对的结果由源图与透明轮廓层合成后直接登记为已完成。

use std::sync::{Arc, RwLock};

use image::RgbaImage;

use crate::codec::DecodeLimits;

use super::{
    BackgroundJob, CompareConfig, CompareError, CompareProfile, CompareRequest, CompareSettings,
    ComparisonJobManager, JobId, ResultStore,
};

/// 图片比对服务。
pub struct CompareService {
    config: RwLock<CompareConfig>,
    manager: ComparisonJobManager,
}

impl CompareService {
    /// 使用默认配置创建服务。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_comparer::comparer::CompareService;
    ///
    /// let service = CompareService::new()?;
    /// assert_eq!(service.get_profile(), "balanced");
    /// # Ok::<(), image_comparer::comparer::CompareError>(())
    /// ```
    pub fn new() -> Result<Self, CompareError> {
        Self::with_config(CompareConfig::default())
    }

    pub fn with_config(config: CompareConfig) -> Result<Self, CompareError> {
        let differ = config.build_differ()?;
        let manager =
            ComparisonJobManager::new(differ, config.build_painter(), Arc::new(ResultStore::new()));

        log::info!(
            "比对服务已初始化 - profile={} metric={} threshold={}",
            config.infer_profile().as_str(),
            config.metric.as_str(),
            config.default_threshold
        );

        Ok(Self {
            config: RwLock::new(config),
            manager,
        })
    }

    fn config_snapshot(&self) -> CompareConfig {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                log::warn!("比对配置锁已中毒，继续使用恢复数据");
                poisoned.into_inner().clone()
            }
        }
    }

    pub fn manager(&self) -> &ComparisonJobManager {
        &self.manager
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        self.config_snapshot().decode_limits()
    }

    fn request(
        &self,
        left: Option<RgbaImage>,
        right: Option<RgbaImage>,
        threshold: Option<u32>,
    ) -> CompareRequest {
        CompareRequest {
            left,
            right,
            threshold: threshold.unwrap_or_else(|| self.config_snapshot().default_threshold),
        }
    }

    /// 同步比对，返回结果标识。
    pub fn process(
        &self,
        left: Option<RgbaImage>,
        right: Option<RgbaImage>,
        threshold: Option<u32>,
    ) -> Result<JobId, CompareError> {
        self.manager.process(self.request(left, right, threshold))
    }

    /// 提交后台比对。需要在 tokio 运行时内调用。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image::RgbaImage;
    /// use image_comparer::comparer::CompareService;
    ///
    /// # async fn demo() -> Result<(), image_comparer::comparer::CompareError> {
    /// let service = CompareService::new()?;
    /// let job = service.process_in_background(
    ///     Some(RgbaImage::new(64, 64)),
    ///     Some(RgbaImage::new(64, 64)),
    ///     None,
    /// )?;
    /// let id = job.id().to_string();
    /// let event = job.wait().await?;
    /// assert_eq!(service.get_state(&id)?, event.state.as_str());
    /// # Ok(())
    /// # }
    /// ```
    pub fn process_in_background(
        &self,
        left: Option<RgbaImage>,
        right: Option<RgbaImage>,
        threshold: Option<u32>,
    ) -> Result<BackgroundJob, CompareError> {
        self.manager
            .process_in_background(self.request(left, right, threshold))
    }

    /// 轮廓比对：在左图上叠加差异块外轮廓，结果直接登记为已完成。
    pub fn process_outline(
        &self,
        left: Option<RgbaImage>,
        right: Option<RgbaImage>,
        threshold: Option<u32>,
    ) -> Result<JobId, CompareError> {
        let request = self.request(left, right, threshold);
        let mut left = request.left.ok_or(CompareError::MissingInput("left"))?;
        let right = request.right.ok_or(CompareError::MissingInput("right"))?;

        let tracer = self.config_snapshot().build_tracer()?;
        let overlay = tracer.trace(&left, &right, request.threshold)?;
        image::imageops::overlay(&mut left, &overlay, 0, 0);

        let id = self.manager.store_result(left);
        log::info!("✅ 轮廓比对完成 - id={}", id);
        Ok(id)
    }

    /// 查询任务状态字符串。
    pub fn get_state(&self, id: &str) -> Result<String, CompareError> {
        let id: JobId = id.parse()?;
        Ok(self.manager.get_state(&id)?.as_str().to_string())
    }

    /// 读取结果图片快照（任务进行中时为当前进度）。
    pub fn get_image(&self, id: &str) -> Result<RgbaImage, CompareError> {
        let id: JobId = id.parse()?;
        Ok(self.manager.get_image(&id)?.snapshot())
    }

    pub fn delete_result(&self, id: &str) -> Result<(), CompareError> {
        let id: JobId = id.parse()?;
        self.manager.delete_result(&id)
    }

    /// 切换比对档位。
    pub fn set_profile(&self, profile: &str) -> Result<(), CompareError> {
        let profile = CompareProfile::from_str(profile)?;
        self.update_config(|config| {
            config.apply_profile(profile);
            Ok(())
        })?;
        log::info!("比对档位已切换为 {}", profile.as_str());
        Ok(())
    }

    pub fn get_profile(&self) -> String {
        self.config_snapshot().infer_profile().as_str().to_string()
    }

    pub fn set_settings(&self, settings: &CompareSettings) -> Result<(), CompareError> {
        self.update_config(|config| config.apply_settings(settings))
    }

    pub fn get_settings(&self) -> CompareSettings {
        self.config_snapshot().settings()
    }

    fn update_config(
        &self,
        update: impl FnOnce(&mut CompareConfig) -> Result<(), CompareError>,
    ) -> Result<(), CompareError> {
        let mut guard = match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("比对配置锁已中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        };

        let mut next = guard.clone();
        update(&mut next)?;
        let differ = next.build_differ()?;
        next.build_tracer()?;

        self.manager.replace_pipeline(differ, next.build_painter());
        *guard = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::JobState;
    use image::Rgba;
    use std::thread;

    const GRAY: Rgba<u8> = Rgba([100, 100, 100, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn pair() -> (RgbaImage, RgbaImage) {
        let left = RgbaImage::from_pixel(64, 64, GRAY);
        let mut right = left.clone();
        for x in 16..32 {
            for y in 16..32 {
                right.put_pixel(x, y, WHITE);
            }
        }
        (left, right)
    }

    #[test]
    fn set_profile_rejects_unknown_profile() {
        let service = CompareService::new().expect("service init");

        let result = service.set_profile("turbo");

        assert!(matches!(result, Err(CompareError::InvalidFormat(_))));
        assert_eq!(service.get_profile(), "balanced");
    }

    #[test]
    fn set_and_get_profile_round_trip() {
        let service = CompareService::new().expect("service init");

        for profile in ["precise", "balanced", "fast"] {
            service.set_profile(profile).expect("set profile");
            assert_eq!(service.get_profile(), profile);
        }
    }

    #[test]
    fn concurrent_profile_updates_remain_consistent() {
        let service = std::sync::Arc::new(CompareService::new().expect("service init"));
        let profiles = ["precise", "balanced", "fast"];

        let mut handles = Vec::new();
        for worker in 0..8usize {
            let service = std::sync::Arc::clone(&service);
            handles.push(thread::spawn(move || {
                for i in 0..50usize {
                    let profile = profiles[(worker + i) % profiles.len()];
                    service.set_profile(profile).expect("set profile");
                    let current = service.get_profile();
                    assert!(profiles.contains(&current.as_str()));
                }
            }));
        }

        for handle in handles {
            handle.join().expect("worker thread should not panic");
        }

        assert!(profiles.contains(&service.get_profile().as_str()));
    }

    #[test]
    fn process_uses_default_threshold_and_reports_state() {
        let service = CompareService::new().expect("service init");
        let (left, right) = pair();

        let id = service.process(Some(left), Some(right), None).expect("process").to_string();

        assert_eq!(service.get_state(&id).expect("state"), JobState::Completed.as_str());
        let image = service.get_image(&id).expect("image");
        assert_eq!(*image.get_pixel(16, 16), RED);
        assert_eq!(*image.get_pixel(2, 2), GRAY);
    }

    #[test]
    fn process_reports_missing_input() {
        let service = CompareService::new().expect("service init");

        let result = service.process(None, Some(RgbaImage::new(2, 2)), None);

        assert!(matches!(result, Err(CompareError::MissingInput("left"))));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        let service = CompareService::new().expect("service init");

        assert!(matches!(service.get_state("nope"), Err(CompareError::InvalidFormat(_))));
        assert!(matches!(service.get_image("nope"), Err(CompareError::InvalidFormat(_))));
        assert!(matches!(
            service.get_state(&JobId::generate().to_string()),
            Err(CompareError::NotFound(_))
        ));
    }

    #[test]
    fn outline_result_is_composited_over_left() {
        let service = CompareService::new().expect("service init");
        let mut settings = service.get_settings();
        settings.outline_stroke_width = 1;
        service.set_settings(&settings).expect("settings");
        let (left, right) = pair();

        let id = service.process_outline(Some(left), Some(right), Some(10)).expect("outline").to_string();
        let image = service.get_image(&id).expect("image");

        assert_eq!(service.get_state(&id).expect("state"), "Completed");
        assert_eq!(*image.get_pixel(16, 20), RED);
        assert_eq!(*image.get_pixel(24, 24), GRAY);
        assert_eq!(*image.get_pixel(2, 2), GRAY);
    }

    #[test]
    fn invalid_settings_keep_previous_pipeline() {
        let service = CompareService::new().expect("service init");
        let mut settings = service.get_settings();
        settings.grid_levels = vec![[0, 4]];

        assert!(matches!(
            service.set_settings(&settings),
            Err(CompareError::InvalidConfig(_))
        ));
        assert_eq!(service.get_settings().grid_levels, vec![[32, 32]]);
    }

    #[test]
    fn delete_result_removes_image() {
        let service = CompareService::new().expect("service init");
        let (left, right) = pair();
        let id = service.process(Some(left), Some(right), None).expect("process").to_string();

        service.delete_result(&id).expect("delete");

        assert!(matches!(service.get_image(&id), Err(CompareError::NotFound(_))));
        assert!(matches!(service.delete_result(&id), Err(CompareError::NotFound(_))));
    }

    #[tokio::test]
    async fn background_job_reaches_completed() {
        let service = CompareService::new().expect("service init");
        let (left, right) = pair();

        let job = service.process_in_background(Some(left), Some(right), None).expect("submit");
        let id = job.id().to_string();
        assert_eq!(service.get_state(&id).expect("state"), "InProgress");

        let event = job.wait().await.expect("completion");

        assert_eq!(event.state, JobState::Completed);
        assert_eq!(service.get_state(&id).expect("state"), "Completed");
        assert_eq!(*service.get_image(&id).expect("image").get_pixel(16, 16), RED);
    }

    #[test]
    fn profile_switch_recovers_poisoned_config_lock() {
        let service = CompareService::new().expect("service init");

        thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _guard = service.config.write().expect("config lock");
                panic!("poison config lock");
            });
            assert!(poisoner.join().is_err());
        });
        assert!(service.config.is_poisoned());

        service.set_profile("fast").expect("profile after poison");

        assert_eq!(service.get_profile(), "fast");
    }
}
